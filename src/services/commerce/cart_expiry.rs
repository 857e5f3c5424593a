use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use tracing::info;

use crate::errors::ServiceError;
use crate::services::commerce::cart_store::{CartStore, HeaderUpdate, LoadedCart};
use crate::services::inventory::InventoryLedger;

/// Stock handed back by an expired cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredCart {
    pub released_units: i32,
    pub released_lines: usize,
    pub expired_at: DateTime<Utc>,
}

/// Releases an expired cart's reservations and resets it.
///
/// Runs first inside every cart-touching transaction so one operation never
/// sees the same cart as both live and expired.
#[derive(Debug, Clone)]
pub struct CartExpiryReconciler {
    store: CartStore,
    ledger: InventoryLedger,
}

impl CartExpiryReconciler {
    pub fn new(store: CartStore, ledger: InventoryLedger) -> Self {
        Self { store, ledger }
    }

    /// Returns `None` when the cart has not expired at `now`.
    pub async fn reconcile<C>(
        &self,
        conn: &C,
        loaded: &mut LoadedCart,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiredCart>, ServiceError>
    where
        C: ConnectionTrait,
    {
        if !loaded.cart.is_expired(now) {
            return Ok(None);
        }

        let expired_at = loaded.cart.expires_at;
        let released = self.store.remove_all_items(conn, loaded).await?;
        for item in &released {
            self.ledger.release(conn, item.product_id, item.quantity).await?;
        }

        self.store
            .write_header(conn, loaded, HeaderUpdate::reset(self.store.fresh_expiry(now)), now)
            .await?;

        let outcome = ExpiredCart {
            released_units: released.iter().map(|item| item.quantity).sum(),
            released_lines: released.len(),
            expired_at,
        };
        info!(
            cart_id = %loaded.cart.id,
            released_units = outcome.released_units,
            "Expired cart reset"
        );
        Ok(Some(outcome))
    }
}

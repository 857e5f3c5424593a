use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    ///
    /// Events are emitted after commit, so a dropped event never affects the
    /// outcome of the operation that produced it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted once the producing transaction has committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    CartItemAdded {
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        user_id: Uuid,
        product_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
    },
    CartItemRemoved {
        user_id: Uuid,
        product_id: Uuid,
        released: i32,
    },
    CartCleared {
        user_id: Uuid,
        released: i32,
    },
    CouponApplied {
        user_id: Uuid,
        code: String,
        discount: Decimal,
    },
    CartExpired {
        user_id: Uuid,
        released: i32,
        expired_at: DateTime<Utc>,
    },

    OrderCreated(Uuid),
    PaymentCompleted {
        payment_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    CheckoutCompleted {
        user_id: Uuid,
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

/// Drains the event channel, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CartExpired {
                user_id, released, ..
            } => {
                info!(%user_id, released, "Cart expired and reservations released");
            }
            Event::CheckoutCompleted {
                order_id,
                order_number,
                ..
            } => {
                info!(%order_id, %order_number, "Checkout completed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            other => debug!("Received event: {:?}", other),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

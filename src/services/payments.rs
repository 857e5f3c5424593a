//! Payment gateways consulted by checkout.
//!
//! Each payment method has one [`PaymentGateway`]. Checkout depends only on the
//! trait and looks gateways up through [`PaymentGateways`].

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::entities::payment::PaymentMethod;
use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Generated once per checkout request and reused by every retried attempt
    pub idempotency_key: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_ref: String },
    Declined { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Checks that the method-specific fields are present and well formed.
    fn validate_details(&self, details: &Value) -> Result<(), ServiceError>;

    /// Copy of `details` that is safe to persist.
    fn masked_details(&self, details: &Value) -> Value;

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError>;

    /// The checkout that charged under `idempotency_key` committed.
    async fn settle(&self, idempotency_key: &str);

    /// The checkout that charged under `idempotency_key` gave up; any approval
    /// taken under the key is released.
    async fn void(&self, idempotency_key: &str);
}

fn required_str<'a>(details: &'a Value, field: &str) -> Result<&'a str, ServiceError> {
    details
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Payment details require '{}'", field))
        })
}

fn transaction_ref(prefix: &str, idempotency_key: &str) -> String {
    format!("{}-{}", prefix, idempotency_key.replace(':', "-"))
}

#[derive(Debug, Clone)]
struct Authorization {
    amount: Decimal,
    outcome: ChargeOutcome,
}

/// Open approvals per idempotency key so a retried attempt is not charged twice.
///
/// Declines are not remembered; the customer may retry with other details.
/// An entry lives only while its checkout is in flight: `settle` and `void`
/// remove it.
#[derive(Debug, Default)]
struct IdempotencyLog {
    authorizations: DashMap<String, Authorization>,
}

impl IdempotencyLog {
    fn get_or_insert_with(
        &self,
        key: &str,
        amount: Decimal,
        charge: impl FnOnce() -> ChargeOutcome,
    ) -> ChargeOutcome {
        if let Some(previous) = self.authorizations.get(key) {
            if previous.amount == amount {
                return previous.outcome.clone();
            }
        }
        // A retried attempt saw a different cart total; the old hold is replaced.
        if let Some((_, stale)) = self.authorizations.remove(key) {
            info!(
                idempotency_key = key,
                old_amount = %stale.amount,
                new_amount = %amount,
                "Voiding authorization for changed amount"
            );
        }

        let outcome = charge();
        if matches!(outcome, ChargeOutcome::Approved { .. }) {
            self.authorizations.insert(
                key.to_string(),
                Authorization {
                    amount,
                    outcome: outcome.clone(),
                },
            );
        }
        outcome
    }

    fn settle(&self, key: &str) {
        self.authorizations.remove(key);
    }

    fn void(&self, key: &str) {
        if let Some((_, voided)) = self.authorizations.remove(key) {
            info!(idempotency_key = key, amount = %voided.amount, "Authorization voided");
        }
    }

    fn len(&self) -> usize {
        self.authorizations.len()
    }
}

/// Cash on delivery: nothing to charge, the customer confirms at order time.
#[derive(Debug, Default)]
pub struct CashOnDeliveryGateway {
    log: IdempotencyLog,
}

#[async_trait]
impl PaymentGateway for CashOnDeliveryGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cod
    }

    fn validate_details(&self, details: &Value) -> Result<(), ServiceError> {
        match details.get("confirmation").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => Err(ServiceError::ValidationError(
                "Cash on delivery requires 'confirmation' to be true".to_string(),
            )),
        }
    }

    fn masked_details(&self, _details: &Value) -> Value {
        json!({ "confirmation": true })
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        Ok(self
            .log
            .get_or_insert_with(&request.idempotency_key, request.amount, || {
                info!(amount = %request.amount, "Cash on delivery accepted");
                ChargeOutcome::Approved {
                    transaction_ref: transaction_ref("COD", &request.idempotency_key),
                }
            }))
    }

    async fn settle(&self, idempotency_key: &str) {
        self.log.settle(idempotency_key);
    }

    async fn void(&self, idempotency_key: &str) {
        self.log.void(idempotency_key);
    }
}

/// Card payments, simulated: numbers failing the Luhn check are declined.
#[derive(Debug, Default)]
pub struct CardGateway {
    log: IdempotencyLog,
}

impl CardGateway {
    /// Approvals whose checkout has neither settled nor been voided.
    pub fn open_authorizations(&self) -> usize {
        self.log.len()
    }
}

fn digits_only(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
}

fn passes_luhn(number: &str) -> bool {
    let digits: Option<Vec<u32>> = number.chars().map(|c| c.to_digit(10)).collect();
    let Some(digits) = digits else {
        return false;
    };
    if !(12..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    fn validate_details(&self, details: &Value) -> Result<(), ServiceError> {
        let number = digits_only(required_str(details, "cardNumber")?);
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::ValidationError(
                "Card number must contain only digits".to_string(),
            ));
        }

        let expiry = required_str(details, "expiry")?;
        let valid_expiry = matches!(
            expiry.split_once('/'),
            Some((month, year))
                if month.len() == 2
                    && (year.len() == 2 || year.len() == 4)
                    && month.parse::<u8>().map(|m| (1..=12).contains(&m)).unwrap_or(false)
                    && year.chars().all(|c| c.is_ascii_digit())
        );
        if !valid_expiry {
            return Err(ServiceError::ValidationError(
                "Card expiry must be in MM/YY format".to_string(),
            ));
        }

        let cvc = required_str(details, "cvc")?;
        if !(3..=4).contains(&cvc.len()) || !cvc.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::ValidationError(
                "Card CVC must be 3 or 4 digits".to_string(),
            ));
        }
        Ok(())
    }

    fn masked_details(&self, details: &Value) -> Value {
        let number = details
            .get("cardNumber")
            .and_then(Value::as_str)
            .map(digits_only)
            .unwrap_or_default();
        let last4: String = number
            .chars()
            .skip(number.len().saturating_sub(4))
            .collect();
        json!({
            "cardLast4": last4,
            "expiry": details.get("expiry").cloned().unwrap_or(Value::Null),
        })
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        let number = request
            .details
            .get("cardNumber")
            .and_then(Value::as_str)
            .map(digits_only)
            .unwrap_or_default();

        Ok(self
            .log
            .get_or_insert_with(&request.idempotency_key, request.amount, || {
                if passes_luhn(&number) {
                    info!(amount = %request.amount, "Card charge approved");
                    ChargeOutcome::Approved {
                        transaction_ref: transaction_ref("CARD", &request.idempotency_key),
                    }
                } else {
                    warn!("Card charge declined: invalid card number");
                    ChargeOutcome::Declined {
                        reason: "Card number was declined".to_string(),
                    }
                }
            }))
    }

    async fn settle(&self, idempotency_key: &str) {
        self.log.settle(idempotency_key);
    }

    async fn void(&self, idempotency_key: &str) {
        self.log.void(idempotency_key);
    }
}

/// PayPal, simulated: approves any well-formed account email.
#[derive(Debug, Default)]
pub struct PayPalGateway {
    log: IdempotencyLog,
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::PayPal
    }

    fn validate_details(&self, details: &Value) -> Result<(), ServiceError> {
        let email = required_str(details, "email")?;
        if !looks_like_email(email) {
            return Err(ServiceError::ValidationError(
                "PayPal email is not a valid address".to_string(),
            ));
        }
        Ok(())
    }

    fn masked_details(&self, details: &Value) -> Value {
        json!({ "email": details.get("email").cloned().unwrap_or(Value::Null) })
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        Ok(self
            .log
            .get_or_insert_with(&request.idempotency_key, request.amount, || {
                info!(amount = %request.amount, "PayPal payment approved");
                ChargeOutcome::Approved {
                    transaction_ref: transaction_ref("PP", &request.idempotency_key),
                }
            }))
    }

    async fn settle(&self, idempotency_key: &str) {
        self.log.settle(idempotency_key);
    }

    async fn void(&self, idempotency_key: &str) {
        self.log.void(idempotency_key);
    }
}

/// Gateway lookup by payment method.
#[derive(Clone)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn empty() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    /// Registers `gateway` for the method it reports, replacing any previous one.
    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways.get(&method).cloned().ok_or_else(|| {
            ServiceError::ValidationError(format!("Unsupported payment method: {}", method))
        })
    }
}

impl Default for PaymentGateways {
    fn default() -> Self {
        Self::empty()
            .register(Arc::new(CashOnDeliveryGateway::default()))
            .register(Arc::new(CardGateway::default()))
            .register(Arc::new(PayPalGateway::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn card_details(number: &str) -> Value {
        json!({ "cardNumber": number, "expiry": "12/30", "cvc": "123" })
    }

    fn request(method: PaymentMethod, details: Value) -> ChargeRequest {
        ChargeRequest {
            idempotency_key: "cart:1".to_string(),
            method,
            amount: dec!(42.00),
            details,
        }
    }

    #[rstest]
    #[case(PaymentMethod::Cod, json!({ "confirmation": true }), true)]
    #[case(PaymentMethod::Cod, json!({ "confirmation": false }), false)]
    #[case(PaymentMethod::Cod, json!({}), false)]
    #[case(PaymentMethod::Card, card_details("4242 4242 4242 4242"), true)]
    #[case(PaymentMethod::Card, json!({ "cardNumber": "4242424242424242", "cvc": "123" }), false)]
    #[case(PaymentMethod::Card, json!({ "cardNumber": "4242424242424242", "expiry": "13/30", "cvc": "123" }), false)]
    #[case(PaymentMethod::Card, json!({ "cardNumber": "4242424242424242", "expiry": "12/30", "cvc": "12" }), false)]
    #[case(PaymentMethod::PayPal, json!({ "email": "buyer@example.com" }), true)]
    #[case(PaymentMethod::PayPal, json!({ "email": "buyer" }), false)]
    #[case(PaymentMethod::PayPal, json!({}), false)]
    fn validates_method_details(
        #[case] method: PaymentMethod,
        #[case] details: Value,
        #[case] valid: bool,
    ) {
        let gateways = PaymentGateways::default();
        let gateway = gateways.get(method).unwrap();
        assert_eq!(gateway.validate_details(&details).is_ok(), valid);
    }

    #[test]
    fn luhn_check() {
        assert!(passes_luhn("4242424242424242"));
        assert!(passes_luhn("5555555555554444"));
        assert!(!passes_luhn("4242424242424241"));
        assert!(!passes_luhn("1234"));
        assert!(!passes_luhn("42424242424242a2"));
    }

    #[tokio::test]
    async fn card_declines_bad_numbers() {
        let gateway = CardGateway::default();
        let outcome = gateway
            .charge(&request(PaymentMethod::Card, card_details("4242424242424241")))
            .await
            .unwrap();
        assert_matches!(outcome, ChargeOutcome::Declined { .. });
    }

    #[tokio::test]
    async fn repeated_keys_charge_once() {
        let gateway = CardGateway::default();
        let req = request(PaymentMethod::Card, card_details("4242424242424242"));

        let first = gateway.charge(&req).await.unwrap();
        let second = gateway.charge(&req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.open_authorizations(), 1);
        assert_eq!(
            first,
            ChargeOutcome::Approved {
                transaction_ref: "CARD-cart-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn declines_are_not_remembered() {
        let gateway = CardGateway::default();
        let declined = gateway
            .charge(&request(PaymentMethod::Card, card_details("4242424242424241")))
            .await
            .unwrap();
        let approved = gateway
            .charge(&request(PaymentMethod::Card, card_details("4242424242424242")))
            .await
            .unwrap();

        assert_matches!(declined, ChargeOutcome::Declined { .. });
        assert_matches!(approved, ChargeOutcome::Approved { .. });
    }

    #[tokio::test]
    async fn changed_amount_replaces_the_open_authorization() {
        let gateway = CardGateway::default();
        let mut req = request(PaymentMethod::Card, card_details("4242424242424242"));
        gateway.charge(&req).await.unwrap();

        req.amount = dec!(50.00);
        let outcome = gateway.charge(&req).await.unwrap();

        assert_matches!(outcome, ChargeOutcome::Approved { .. });
        assert_eq!(gateway.open_authorizations(), 1);
        assert_eq!(gateway.log.authorizations.get("cart:1").unwrap().amount, dec!(50.00));
    }

    #[tokio::test]
    async fn settled_and_voided_keys_are_forgotten() {
        let gateway = CardGateway::default();
        let mut req = request(PaymentMethod::Card, card_details("4242424242424242"));
        gateway.charge(&req).await.unwrap();
        req.idempotency_key = "cart:2".to_string();
        gateway.charge(&req).await.unwrap();
        assert_eq!(gateway.open_authorizations(), 2);

        gateway.settle("cart:1").await;
        gateway.void("cart:2").await;
        gateway.void("cart:3").await;

        assert_eq!(gateway.open_authorizations(), 0);
    }

    #[test]
    fn card_details_are_masked() {
        let gateway = CardGateway::default();
        let masked = gateway.masked_details(&card_details("4242 4242 4242 4242"));
        assert_eq!(masked, json!({ "cardLast4": "4242", "expiry": "12/30" }));
    }

    #[test]
    fn missing_gateway_is_a_validation_error() {
        let gateways = PaymentGateways::empty().register(Arc::new(PayPalGateway::default()));
        assert!(matches!(
            gateways.get(PaymentMethod::Card),
            Err(ServiceError::ValidationError(_))
        ));
    }
}

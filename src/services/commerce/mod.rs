/// Commerce services module - cart, pricing and checkout
pub mod cart_expiry;
pub mod cart_service;
pub mod cart_store;
pub mod checkout_service;
pub mod coupons;
pub mod pricing_service;

// Re-export services for convenience
pub use cart_expiry::{CartExpiryReconciler, ExpiredCart};
pub use cart_service::{CartLineView, CartService, CartView};
pub use cart_store::{CartStore, LoadedCart};
pub use checkout_service::{CheckoutInput, CheckoutReceipt, CheckoutService, ShippingAddress};
pub use coupons::{CouponResolver, CouponRule, StaticCouponResolver};
pub use pricing_service::{CartTotals, TotalsCalculator};

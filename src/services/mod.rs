// Core services
pub mod inventory;
pub mod orders;

// Order status transitions with inventory side effects
pub mod order_status;

// Payment gateways
pub mod payments;

// Cart, pricing and checkout
pub mod commerce;

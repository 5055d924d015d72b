//! shop-orders
//!
//! Order and payment lifecycles plus the checkout build step.
//! - Orders and payment attempts advance through finite state machines
//! - Transitions are event-driven and idempotent under event-id replay
//! - `build_order` turns a priced cart into persistable order rows
//! - Pure deterministic logic (no IO, no time, no database wiring)

mod checkout;

pub mod order;
pub mod payment;

pub use checkout::{build_order, CheckoutError, OrderDraft};

pub use order::{OrderEvent, OrderLifecycle, OrderStatus};
pub use payment::{PaymentEvent, PaymentLifecycle, PaymentStatus};

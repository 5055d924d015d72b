//! Order lifecycle state machine.
//!
//! # Design
//!
//! Explicit state machine for a single customer order. Every lifecycle event
//! is applied via [`OrderLifecycle::apply`], which enforces two invariants:
//!
//! 1. **Legal transitions only.** Illegal events return [`TransitionError`];
//!    callers must surface it as a conflict, never paper over it.
//! 2. **Idempotent replay.** If an `event_id` is supplied and has already
//!    been applied, the call is a silent no-op — the order status does not
//!    change and no error is returned.
//!
//! # State diagram
//!
//! ```text
//!                 PaymentCaptured          Ship             Deliver
//!  PendingPayment ───────────────► Paid ────────► Shipped ─────────► Delivered
//!        │                          │                │                   │
//!        │ Cancel                   │ Refund         │ Refund            │ Refund
//!        ▼                          ▼                ▼                   ▼
//!    Cancelled (term.)          Refunded (term.) ◄───┴───────────────────┘
//! ```
//!
//! Cancel is only legal before payment; refund is only legal after. The stock
//! side effects (restore on cancel, restore on refund-before-shipment) live
//! in the storage layer's transactions, keyed off the status the order held
//! when the event arrived.

use std::collections::HashSet;

use uuid::Uuid;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// All valid statuses a customer order can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    /// Placed; stock reserved; awaiting payment capture.
    PendingPayment,
    /// Payment captured in full.
    Paid,
    /// Handed to the carrier.
    Shipped,
    /// Confirmed received by the customer.
    Delivered,
    /// Cancelled before payment. **Terminal.**
    Cancelled,
    /// Payment returned after capture. **Terminal.**
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseStatusError> {
        match s {
            "PENDING_PAYMENT" => Ok(OrderStatus::PendingPayment),
            "PAID" => Ok(OrderStatus::Paid),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(ParseStatusError {
                input: other.to_string(),
            }),
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }

    /// Cancellation is only legal while payment has not been captured.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::PendingPayment)
    }

    /// Refund is only legal once payment has been captured.
    pub fn is_refundable(&self) -> bool {
        matches!(self, Self::Paid | Self::Shipped | Self::Delivered)
    }
}

/// Unrecognised status string (normally a corrupted or hand-edited row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    pub input: String,
}

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid order status: '{}'", self.input)
    }
}

impl std::error::Error for ParseStatusError {}

// ---------------------------------------------------------------------------
// OrderEvent
// ---------------------------------------------------------------------------

/// Events that drive transitions in an [`OrderLifecycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// The payment gateway captured the full order amount.
    PaymentCaptured,
    /// Warehouse handed the parcel to the carrier.
    Ship,
    /// Carrier confirmed delivery.
    Deliver,
    /// Customer (or an operator) cancelled before payment.
    Cancel,
    /// Operator refunded a captured payment.
    Refund,
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an event cannot legally be applied in the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// The status the order was in when the illegal event arrived.
    pub from: OrderStatus,
    /// Debug string of the event that was rejected.
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal order transition: {:?} + {}",
            self.from, self.event
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// OrderLifecycle
// ---------------------------------------------------------------------------

/// A customer order tracked through an explicit state machine.
///
/// # Idempotency
///
/// Every call to [`apply`][`OrderLifecycle::apply`] accepts an optional
/// `event_id`. When supplied, the ID is stored in an internal set; subsequent
/// calls with the same `event_id` are silently ignored, so replaying the same
/// event log (e.g. a retried webhook-less capture) converges to one status.
#[derive(Debug, Clone)]
pub struct OrderLifecycle {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// Applied event IDs — used for idempotent replay.
    applied: HashSet<String>,
}

impl OrderLifecycle {
    /// Create a freshly placed order in `PendingPayment`.
    pub fn new(order_id: Uuid) -> Self {
        Self {
            order_id,
            status: OrderStatus::PendingPayment,
            applied: HashSet::new(),
        }
    }

    /// Rehydrate a mid-life order from its stored status.
    pub fn from_status(order_id: Uuid, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            applied: HashSet::new(),
        }
    }

    /// Apply an event to this order.
    ///
    /// `event_id` — if `Some`, deduplicated against the set of already-applied
    /// event IDs. A duplicate returns `Ok(())` immediately without mutating
    /// status.
    ///
    /// # Errors
    /// Returns [`TransitionError`] for illegal transitions; the status is
    /// unchanged on error.
    pub fn apply(
        &mut self,
        event: &OrderEvent,
        event_id: Option<&str>,
    ) -> Result<(), TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }

        Ok(())
    }

    // Internal: perform the actual state machine transition.
    fn do_transition(&mut self, event: &OrderEvent) -> Result<(), TransitionError> {
        use OrderEvent::*;
        use OrderStatus::*;

        match (&self.status, event) {
            (PendingPayment, PaymentCaptured) => self.status = Paid,
            (Paid, Ship) => self.status = Shipped,
            (Shipped, Deliver) => self.status = Delivered,

            (PendingPayment, Cancel) => self.status = Cancelled,

            // Refund is legal any time after capture, including after the
            // goods have shipped (money comes back; stock does not).
            (Paid | Shipped | Delivered, Refund) => self.status = Refunded,

            (status, ev) => {
                return Err(TransitionError {
                    from: *status,
                    event: format!("{ev:?}"),
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn placed_order() -> OrderLifecycle {
        OrderLifecycle::new(Uuid::from_u128(1))
    }

    #[test]
    fn new_order_starts_pending_payment() {
        let o = placed_order();
        assert_eq!(o.status, OrderStatus::PendingPayment);
        assert!(!o.status.is_terminal());
        assert!(o.status.is_cancellable());
        assert!(!o.status.is_refundable());
    }

    #[test]
    fn happy_path_to_delivered() {
        let mut o = placed_order();
        o.apply(&OrderEvent::PaymentCaptured, Some("e1")).unwrap();
        assert_eq!(o.status, OrderStatus::Paid);
        o.apply(&OrderEvent::Ship, Some("e2")).unwrap();
        assert_eq!(o.status, OrderStatus::Shipped);
        o.apply(&OrderEvent::Deliver, Some("e3")).unwrap();
        assert_eq!(o.status, OrderStatus::Delivered);
        assert!(o.status.is_refundable());
    }

    #[test]
    fn cancel_before_payment() {
        let mut o = placed_order();
        o.apply(&OrderEvent::Cancel, Some("c1")).unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert!(o.status.is_terminal());
    }

    #[test]
    fn cancel_after_payment_is_illegal() {
        let mut o = placed_order();
        o.apply(&OrderEvent::PaymentCaptured, Some("e1")).unwrap();
        let err = o.apply(&OrderEvent::Cancel, Some("c1")).unwrap_err();
        assert_eq!(err.from, OrderStatus::Paid);
        // Status must not change after the error.
        assert_eq!(o.status, OrderStatus::Paid);
    }

    #[test]
    fn refund_before_payment_is_illegal() {
        let mut o = placed_order();
        let err = o.apply(&OrderEvent::Refund, Some("r1")).unwrap_err();
        assert_eq!(err.from, OrderStatus::PendingPayment);
    }

    #[test]
    fn refund_after_shipment() {
        let mut o = placed_order();
        o.apply(&OrderEvent::PaymentCaptured, Some("e1")).unwrap();
        o.apply(&OrderEvent::Ship, Some("e2")).unwrap();
        o.apply(&OrderEvent::Refund, Some("r1")).unwrap();
        assert_eq!(o.status, OrderStatus::Refunded);
        assert!(o.status.is_terminal());
    }

    #[test]
    fn ship_before_payment_is_illegal() {
        let mut o = placed_order();
        let err = o.apply(&OrderEvent::Ship, Some("s1")).unwrap_err();
        assert_eq!(err.from, OrderStatus::PendingPayment);
        assert!(err.to_string().contains("illegal order transition"));
    }

    #[test]
    fn idempotent_replay_does_not_double_apply() {
        let mut o = placed_order();
        o.apply(&OrderEvent::PaymentCaptured, Some("cap-1")).unwrap();
        assert_eq!(o.status, OrderStatus::Paid);
        // Same event_id → silently skipped, even though PaymentCaptured is
        // now illegal from Paid.
        o.apply(&OrderEvent::PaymentCaptured, Some("cap-1")).unwrap();
        assert_eq!(o.status, OrderStatus::Paid);
    }

    #[test]
    fn replay_with_new_event_id_is_still_checked() {
        let mut o = placed_order();
        o.apply(&OrderEvent::PaymentCaptured, Some("cap-1")).unwrap();
        let err = o
            .apply(&OrderEvent::PaymentCaptured, Some("cap-2"))
            .unwrap_err();
        assert_eq!(err.from, OrderStatus::Paid);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let mut o = placed_order();
        o.apply(&OrderEvent::Cancel, Some("c1")).unwrap();
        for ev in [
            OrderEvent::PaymentCaptured,
            OrderEvent::Ship,
            OrderEvent::Deliver,
            OrderEvent::Cancel,
            OrderEvent::Refund,
        ] {
            assert!(
                OrderLifecycle::from_status(o.order_id, o.status)
                    .apply(&ev, None)
                    .is_err(),
                "{ev:?} must be illegal from Cancelled"
            );
        }
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(OrderStatus::parse("ON_HOLD").is_err());
    }
}

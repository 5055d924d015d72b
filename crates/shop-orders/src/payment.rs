//! Payment attempt state machine.
//!
//! One `PaymentLifecycle` tracks one charge attempt against the provider.
//! A declined or errored attempt terminates in `Failed`; retrying payment
//! for the order creates a NEW attempt with a fresh charge_ref, so each
//! machine instance is linear.
//!
//! ```text
//!            Authorize            Capture             Refund
//!   Pending ───────────► Authorized ────────► Captured ──────► Refunded (term.)
//!      │                     │    │
//!      │ Fail           Fail │    │ Void
//!      ▼                     ▼    ▼
//!   Failed (term.) ◄─────────┘  Voided (term.)
//! ```

use std::collections::HashSet;

use uuid::Uuid;

// ---------------------------------------------------------------------------
// PaymentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    /// Attempt row persisted; no provider interaction yet.
    Pending,
    /// Provider placed a hold on the funds.
    Authorized,
    /// Funds captured.
    Captured,
    /// Authorization released without capture. **Terminal.**
    Voided,
    /// Captured funds returned. **Terminal.**
    Refunded,
    /// Provider declined or errored. **Terminal.**
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Voided => "VOIDED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParsePaymentStatusError> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "AUTHORIZED" => Ok(PaymentStatus::Authorized),
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "VOIDED" => Ok(PaymentStatus::Voided),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(ParsePaymentStatusError {
                input: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Voided | Self::Refunded | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePaymentStatusError {
    pub input: String,
}

impl std::fmt::Display for ParsePaymentStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid payment status: '{}'", self.input)
    }
}

impl std::error::Error for ParsePaymentStatusError {}

// ---------------------------------------------------------------------------
// PaymentEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// Provider authorized the charge.
    Authorize,
    /// Provider captured the authorized funds.
    Capture,
    /// Authorization released (stuck-attempt sweep, operator action).
    Void,
    /// Captured funds returned to the customer.
    Refund,
    /// Provider declined, timed out, or errored.
    Fail,
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: PaymentStatus,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal payment transition: {:?} + {}",
            self.from, self.event
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// PaymentLifecycle
// ---------------------------------------------------------------------------

/// One charge attempt tracked through an explicit state machine, with the
/// same idempotent-replay contract as the order lifecycle.
#[derive(Debug, Clone)]
pub struct PaymentLifecycle {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    applied: HashSet<String>,
}

impl PaymentLifecycle {
    /// Create a fresh attempt in `Pending`.
    pub fn new(payment_id: Uuid) -> Self {
        Self {
            payment_id,
            status: PaymentStatus::Pending,
            applied: HashSet::new(),
        }
    }

    /// Rehydrate a mid-life attempt from its stored status.
    pub fn from_status(payment_id: Uuid, status: PaymentStatus) -> Self {
        Self {
            payment_id,
            status,
            applied: HashSet::new(),
        }
    }

    /// Apply an event. Duplicate `event_id`s are silent no-ops; illegal
    /// transitions leave the status unchanged and return the error.
    pub fn apply(
        &mut self,
        event: &PaymentEvent,
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

    fn do_transition(&mut self, event: &PaymentEvent) -> Result<(), TransitionError> {
        use PaymentEvent::*;
        use PaymentStatus::*;

        match (&self.status, event) {
            (Pending, Authorize) => self.status = Authorized,
            (Authorized, Capture) => self.status = Captured,
            (Authorized, Void) => self.status = Voided,
            (Captured, Refund) => self.status = Refunded,

            // A decline can land before or after authorization.
            (Pending | Authorized, Fail) => self.status = Failed,

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

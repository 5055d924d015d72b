use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: T,
}

/// Wire shape for a charge sent to a payment provider.
/// Amounts cross the wire as decimal strings; parsing back into fixed-point
/// happens at the boundary, never inside provider clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChargeRequest {
    pub charge_ref: Uuid,
    pub order_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChargeState {
    pub provider_charge_id: String,
    pub charge_ref: Uuid,
    pub status: String,
    pub amount: String,
    pub currency: String,
    pub updated_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCaptureRequest {
    pub provider_charge_id: String,
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRefundRequest {
    pub provider_charge_id: String,
    pub amount: String,
    pub currency: String,
}

//! Request and response types for all shop-daemon HTTP endpoints.
//!
//! These types are JSON-encoded by Axum and decoded by tests. No business
//! logic lives here; money crosses this boundary as decimal strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Uniform `{"error": ...}` body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Response body when a request is refused by an operator gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRefusedResponse {
    pub error: String,
    /// Which gate refused: "checkout"
    pub gate: String,
}

// ---------------------------------------------------------------------------
// /v1/health  /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// "LIVE" | "SANDBOX" | "TEST"
    pub mode: String,
    pub uptime_secs: u64,
    pub checkout_enabled: bool,
    /// Best-effort database probe; never fails the endpoint.
    pub db: String,
}

// ---------------------------------------------------------------------------
// /v1/auth/*  /v1/me
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    /// "CUSTOMER" | "ADMIN"
    pub role: String,
    pub member_since: DateTime<Utc>,
    /// Expiry of the presented token, unix seconds.
    pub token_expires_at: i64,
}

// ---------------------------------------------------------------------------
// /v1/products*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProductListQuery {
    /// Substring match against sku and name.
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: String,
    /// Decimal string, e.g. "25.00".
    pub price: String,
    pub currency: String,
    pub stock: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductListResponse {
    pub items: Vec<ProductResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Decimal string, parsed with `currency`.
    pub price: String,
    pub currency: String,
    pub stock: i64,
    /// Defaults to true.
    #[serde(default)]
    pub active: Option<bool>,
}

/// Partial update; absent fields keep their stored value. `price` and
/// `currency` travel together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub active: Option<bool>,
}

// ---------------------------------------------------------------------------
// /v1/cart*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub qty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCartQtyRequest {
    pub qty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLineResponse {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: String,
    pub qty: i64,
    pub line_total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartResponse {
    pub cart_id: Uuid,
    pub lines: Vec<CartLineResponse>,
    pub item_count: i64,
    /// `None` for an empty cart (no currency to denominate a zero in).
    pub total: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCartResponse {
    pub removed: u64,
}

// ---------------------------------------------------------------------------
// /v1/orders*
// ---------------------------------------------------------------------------

/// Optional placement body. Supplying `order_id` lets a retried request
/// converge on one order instead of placing two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    /// "PENDING_PAYMENT" | "PAID" | "SHIPPED" | "DELIVERED" | "CANCELLED" | "REFUNDED"
    pub status: String,
    pub total: String,
    pub currency: String,
    pub placed_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: String,
    pub qty: i64,
    pub line_total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetailResponse {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub total: String,
    pub currency: String,
    pub placed_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersListResponse {
    pub orders: Vec<OrderSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayResponse {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub attempt_seq: i64,
    /// "CAPTURED" on success.
    pub payment_status: String,
    /// "PAID" on success.
    pub order_status: String,
    pub provider_charge_id: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/checkout/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutGateResponse {
    pub checkout_enabled: bool,
}

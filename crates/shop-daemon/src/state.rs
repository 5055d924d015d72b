//! Shared runtime state for shop-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns no
//! route logic. Background tasks (heartbeat, payment sweep) live here so the
//! binary and the tests spawn the same code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use shop_audit::{AuditTopic, AuditWriter};
use shop_auth::TokenKey;
use shop_cart::Currency;
use shop_config::ShopMode;
use shop_payments::{PaymentGateway, PaymentProvider};

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        seq: u64,
        uptime_secs: u64,
    },
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total_minor: i64,
        currency: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: String,
        to: String,
    },
    PaymentUpdated {
        payment_id: Uuid,
        order_id: Uuid,
        status: String,
    },
    StockLow {
        product_id: Uuid,
        sku: String,
        stock: i64,
    },
    CheckoutGate {
        enabled: bool,
        actor: String,
    },
}

impl BusMsg {
    /// SSE event name for this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::OrderPlaced { .. } => "order_placed",
            BusMsg::OrderStatusChanged { .. } => "order_status",
            BusMsg::PaymentUpdated { .. } => "payment",
            BusMsg::StockLow { .. } => "stock_low",
            BusMsg::CheckoutGate { .. } => "checkout_gate",
        }
    }

    /// Envelope topic, grouping related event types for stream consumers.
    pub fn topic(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "ops",
            BusMsg::OrderPlaced { .. } | BusMsg::OrderStatusChanged { .. } => "orders",
            BusMsg::PaymentUpdated { .. } => "payments",
            BusMsg::StockLow { .. } => "catalog",
            BusMsg::CheckoutGate { .. } => "admin",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Settings + AppState
// ---------------------------------------------------------------------------

/// Everything the daemon needs at construction. `main.rs` resolves this from
/// layered config plus secrets; tests synthesize it directly.
pub struct Settings {
    pub pool: PgPool,
    pub mode: ShopMode,
    pub token_key: TokenKey,
    pub token_ttl_secs: i64,
    pub password_iters: u32,
    pub checkout_enabled_at_boot: bool,
    pub allowed_currencies: Vec<Currency>,
    pub max_charge_minor: i64,
    pub provider: Arc<dyn PaymentProvider>,
    pub audit_dir: PathBuf,
    pub low_stock_watermark: i64,
    pub pending_ttl_secs: i64,
}

/// Shared handle passed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub pool: PgPool,
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Operator-controlled checkout gate. `false` refuses order placement
    /// and payment with 403 while leaving browsing and carts untouched.
    pub checkout_enabled: Arc<RwLock<bool>>,
    pub build: BuildInfo,
    pub mode: ShopMode,
    pub token_key: TokenKey,
    pub token_ttl_secs: i64,
    pub password_iters: u32,
    pub gateway: Arc<PaymentGateway>,
    pub audit: Arc<Mutex<AuditWriter>>,
    pub low_stock_watermark: i64,
    pub pending_ttl_secs: i64,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let (bus, _rx) = broadcast::channel::<BusMsg>(256);
        let gateway = PaymentGateway::new(
            settings.provider,
            settings.allowed_currencies,
            settings.max_charge_minor,
        );
        let audit = AuditWriter::new(&settings.audit_dir)?;

        Ok(Self {
            pool: settings.pool,
            bus,
            checkout_enabled: Arc::new(RwLock::new(settings.checkout_enabled_at_boot)),
            build: BuildInfo {
                service: "shop-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            mode: settings.mode,
            token_key: settings.token_key,
            token_ttl_secs: settings.token_ttl_secs,
            password_iters: settings.password_iters,
            gateway: Arc::new(gateway),
            audit: Arc::new(Mutex::new(audit)),
            low_stock_watermark: settings.low_stock_watermark,
            pending_ttl_secs: settings.pending_ttl_secs,
        })
    }

    /// Fire-and-forget bus publish; nobody listening is not an error.
    pub fn publish(&self, msg: BusMsg) {
        let _ = self.bus.send(msg);
    }

    /// Append an audit event. Failures are logged and swallowed: the user
    /// request that triggered the event must not fail on ops-log trouble.
    pub async fn audit(
        &self,
        topic: AuditTopic,
        actor: &str,
        action: &str,
        entity: &str,
        details: serde_json::Value,
    ) {
        let mut writer = self.audit.lock().await;
        if let Err(e) = writer.append(topic, actor, action, entity, details) {
            warn!(topic = topic.as_str(), action, error = %e, "audit append failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut seq: u64 = 0;
        loop {
            ticker.tick().await;
            seq += 1;
            let _ = bus.send(BusMsg::Heartbeat {
                seq,
                uptime_secs: uptime_secs(),
            });
        }
    });
}

/// Spawn the stuck-payment sweep.
///
/// Every `interval` the gateway fails PENDING attempts and voids AUTHORIZED
/// attempts older than `state.pending_ttl_secs`. Each swept row is published
/// on the bus and written to the payments audit log under the `sweeper`
/// actor.
pub fn spawn_payment_sweep(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of a tokio interval fires immediately; skip it so a
        // freshly booted daemon doesn't sweep before serving a request.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state
                .gateway
                .sweep(&state.pool, state.pending_ttl_secs)
                .await
            {
                Ok(swept) => {
                    if !swept.is_empty() {
                        info!(count = swept.len(), "payment sweep closed stale attempts");
                    }
                    for row in swept {
                        state.publish(BusMsg::PaymentUpdated {
                            payment_id: row.payment_id,
                            order_id: row.order_id,
                            status: row.status.as_str().to_string(),
                        });
                        state
                            .audit(
                                AuditTopic::Payments,
                                "sweeper",
                                "payment.swept",
                                &row.payment_id.to_string(),
                                json!({
                                    "order_id": row.order_id.to_string(),
                                    "status": row.status.as_str(),
                                    "detail": row.detail,
                                }),
                            )
                            .await;
                    }
                }
                Err(e) => warn!(error = %e, "payment sweep failed"),
            }
        }
    });
}

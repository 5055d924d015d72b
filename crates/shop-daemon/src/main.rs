//! shop-daemon entry point.
//!
//! This file is intentionally thin: it loads layered config, resolves
//! secrets, builds the shared state, wires middleware, and starts the HTTP
//! server. All route handlers live in `routes.rs`; shared state types live
//! in `state.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::http::{HeaderValue, Method};
use shop_auth::TokenKey;
use shop_cart::Currency;
use shop_config::{ShopMode, UnusedKeyPolicy};
use shop_daemon::{routes, state};
use shop_payments::{HttpPaymentProvider, PaymentProvider};
use shop_provider_sandbox::SandboxPaymentProvider;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist — production injects env vars
    // directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let mode = match std::env::var("SHOP_MODE") {
        Ok(v) => ShopMode::parse(&v)?,
        Err(_) => ShopMode::Sandbox,
    };
    let config_dir =
        std::env::var("SHOP_CONFIG_DIR").unwrap_or_else(|_| "./config".to_string());
    let loaded = shop_config::load_dir(&config_dir, mode)
        .with_context(|| format!("loading config from {config_dir}"))?;
    let cfg = &loaded.config_json;

    let service_name = shop_config::require_str_at(cfg, "/shop/service_name")?;
    info!(
        mode = mode.as_str(),
        service = %service_name,
        config_hash = %loaded.config_hash,
        "config loaded"
    );
    let unused = shop_config::report_unused_keys(mode, cfg, UnusedKeyPolicy::Warn)?;
    for pointer in &unused.unused_leaf_pointers {
        warn!(pointer, "config key is never read");
    }

    let secrets = shop_config::secrets::resolve_secrets_for_mode(cfg, mode)?;
    let token_key = match &secrets.token_key_hex {
        Some(hex) => TokenKey::from_hex(hex)?,
        // Only reachable in TEST mode; resolve_secrets_for_mode refuses a
        // missing key everywhere else.
        None => TokenKey::generate(),
    };

    let pool = shop_db::connect_from_env().await?;

    let provider = build_provider(cfg, mode, secrets.provider_api_key.clone())?;
    let allowed_currencies = allowed_currencies(cfg)?;

    let settings = state::Settings {
        pool,
        mode,
        token_key,
        token_ttl_secs: shop_config::require_i64_at(cfg, "/auth/token_ttl_secs")?,
        password_iters: u32::try_from(shop_config::require_i64_at(cfg, "/auth/password_iters")?)
            .context("auth.password_iters out of range")?,
        checkout_enabled_at_boot: shop_config::bool_at(cfg, "/checkout/enabled_at_boot")
            .unwrap_or(true),
        allowed_currencies,
        max_charge_minor: shop_config::require_i64_at(cfg, "/checkout/max_charge_minor")?,
        provider,
        audit_dir: PathBuf::from(
            std::env::var("SHOP_AUDIT_DIR").unwrap_or_else(|_| "./audit".to_string()),
        ),
        low_stock_watermark: shop_config::require_i64_at(cfg, "/stock/low_watermark")?,
        pending_ttl_secs: shop_config::require_i64_at(cfg, "/payments/pending_ttl_secs")?,
    };
    let shared = Arc::new(state::AppState::new(settings)?);

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(15));
    state::spawn_payment_sweep(Arc::clone(&shared), Duration::from_secs(300));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(cfg);
    info!("shop-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Mode picks the provider; the config key must agree so a LIVE daemon can
/// never silently run against the sandbox (or vice versa).
fn build_provider(
    cfg: &serde_json::Value,
    mode: ShopMode,
    api_key: Option<String>,
) -> anyhow::Result<Arc<dyn PaymentProvider>> {
    let configured = shop_config::require_str_at(cfg, "/payments/provider")?;
    match mode {
        ShopMode::Live => {
            if configured != "http" {
                bail!("LIVE mode requires payments.provider=http, config says {configured:?}");
            }
            let base_url = shop_config::require_str_at(cfg, "/payments/http/base_url")?;
            let api_key = api_key.context("provider api key missing")?;
            Ok(Arc::new(HttpPaymentProvider::new(api_key, base_url)))
        }
        ShopMode::Sandbox | ShopMode::Test => {
            if configured != "sandbox" {
                bail!(
                    "{} mode requires payments.provider=sandbox, config says {configured:?}",
                    mode.as_str()
                );
            }
            Ok(Arc::new(SandboxPaymentProvider::new()))
        }
    }
}

fn allowed_currencies(cfg: &serde_json::Value) -> anyhow::Result<Vec<Currency>> {
    let names = shop_config::str_list_at(cfg, "/currency/allowed")
        .context("config key currency.allowed is missing or not a list of strings")?;
    let mut out = Vec::with_capacity(names.len());
    for name in &names {
        out.push(Currency::parse(name)?);
    }
    Ok(out)
}

/// `SHOP_BIND_ADDR` overrides the config value; both fall back to a loopback
/// default so a bare `shop-daemon` never binds a public interface.
fn bind_addr(cfg: &serde_json::Value) -> SocketAddr {
    std::env::var("SHOP_BIND_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| shop_config::str_at(cfg, "/shop/bind_addr").and_then(|s| s.parse().ok()))
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

//! Axum router and all HTTP handlers for shop-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Handler discipline: authenticate, then validate the payload, then consult
//! the checkout gate, and only then touch the database. Auth and validation
//! failures must be observable without a reachable database.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use shop_audit::AuditTopic;
use shop_auth::{Claims, Role};
use shop_cart::{Currency, Money};
use shop_db::catalog::{ListProductsArgs, NewProduct, ProductRow, ProductUpdate};
use shop_db::orders::{OrderRow, OrderWithLines};
use shop_db::users::NewUser;
use shop_db::{carts, catalog, orders, payments, users};
use shop_orders::order::TransitionError;
use shop_orders::OrderEvent;
use shop_payments::ProviderError;
use shop_schemas::EventEnvelope;

use crate::api_types::*;
use crate::state::{uptime_secs, AppState, BusMsg};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
        .route("/v1/me", get(me))
        .route("/v1/products", get(products_list).post(product_create))
        .route("/v1/products/:id", get(product_get).put(product_update))
        .route("/v1/cart", get(cart_get).delete(cart_clear))
        .route("/v1/cart/items", post(cart_add_item))
        .route(
            "/v1/cart/items/:product_id",
            put(cart_set_qty).delete(cart_remove_item),
        )
        .route("/v1/orders", post(order_place).get(orders_list))
        .route("/v1/orders/:id", get(order_get))
        .route("/v1/orders/:id/pay", post(order_pay))
        .route("/v1/orders/:id/cancel", post(order_cancel))
        .route("/v1/orders/:id/ship", post(order_ship))
        .route("/v1/orders/:id/deliver", post(order_deliver))
        .route("/v1/orders/:id/refund", post(order_refund))
        .route("/v1/checkout/enable", post(checkout_enable))
        .route("/v1/checkout/disable", post(checkout_disable))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth + error plumbing
// ---------------------------------------------------------------------------

fn json_error(status: StatusCode, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
        .into_response()
}

/// Map a failed operation to an HTTP response.
///
/// Storage and lifecycle errors carry stable `PREFIX:` markers; the first
/// recognized marker in the chain decides the status. Provider errors map by
/// type: an API-level decline is the customer's 402, everything else is ours.
pub(crate) fn error_response(err: anyhow::Error) -> Response {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = format!("{err:#}"), "request failed");
    }
    json_error(status, format!("{err:#}"))
}

fn status_for(err: &anyhow::Error) -> StatusCode {
    if let Some(p) = err.downcast_ref::<ProviderError>() {
        return match p {
            ProviderError::Api { .. } => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
    }
    if err.downcast_ref::<TransitionError>().is_some() {
        return StatusCode::CONFLICT;
    }
    for cause in err.chain() {
        let msg = cause.to_string();
        let marker = msg.split(':').next().unwrap_or("");
        let mapped = match marker {
            "GATE_REFUSED" => Some(StatusCode::FORBIDDEN),
            "EMAIL_TAKEN" | "SKU_TAKEN" | "PRODUCT_INACTIVE" | "ORDER_NOT_PAYABLE"
            | "PAYMENT_NOT_REFUNDABLE" | "STOCK_INSUFFICIENT" => Some(StatusCode::CONFLICT),
            "PRODUCT_NOT_FOUND" | "ORDER_NOT_FOUND" | "PAYMENT_NOT_FOUND" => {
                Some(StatusCode::NOT_FOUND)
            }
            "BAD_QTY" | "CART_EMPTY" => Some(StatusCode::UNPROCESSABLE_ENTITY),
            _ => None,
        };
        if let Some(s) = mapped {
            return s;
        }
    }
    StatusCode::INTERNAL_SERVER_ERROR
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Verify the bearer token and return its claims, or the 401 to send back.
fn authenticate(st: &AppState, headers: &HeaderMap) -> Result<Claims, Response> {
    let token = bearer_token(headers)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "missing bearer token"))?;
    shop_auth::verify_token(&st.token_key, token, Utc::now().timestamp())
        .map_err(|e| json_error(StatusCode::UNAUTHORIZED, e.to_string()))
}

fn require_admin(claims: &Claims) -> Result<(), Response> {
    if claims.role.is_admin() {
        Ok(())
    } else {
        Err(json_error(StatusCode::FORBIDDEN, "admin role required"))
    }
}

/// Checkout gate. Closed means order placement and payment are refused with
/// 403 while browsing and carts keep working.
async fn require_checkout_open(st: &AppState) -> Result<(), Response> {
    if *st.checkout_enabled.read().await {
        return Ok(());
    }
    Err((
        StatusCode::FORBIDDEN,
        Json(GateRefusedResponse {
            error: "GATE_REFUSED: checkout: disabled by operator".to_string(),
            gate: "checkout".to_string(),
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let db = match shop_db::status(&st.pool).await {
        Ok(s) if s.has_orders_table => "ok".to_string(),
        Ok(_) => "reachable (schema missing; run `shop db migrate`)".to_string(),
        Err(e) => format!("unreachable: {e:#}"),
    };

    (
        StatusCode::OK,
        Json(StatusResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            mode: st.mode.as_str().to_string(),
            uptime_secs: uptime_secs(),
            checkout_enabled: *st.checkout_enabled.read().await,
            db,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/auth/register
// ---------------------------------------------------------------------------

pub(crate) async fn register(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, Response> {
    let email = req.email.trim().to_ascii_lowercase();
    if !email.contains('@') || email.len() > 254 {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "email must contain '@' and be at most 254 characters",
        ));
    }
    if req.password.len() < 8 {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "password must be at least 8 characters",
        ));
    }

    let password_hash = shop_auth::hash_password(&req.password, st.password_iters)
        .map_err(|e| error_response(anyhow::Error::new(e)))?;
    let user_id = Uuid::new_v4();
    users::insert_user(
        &st.pool,
        &NewUser {
            user_id,
            email: email.clone(),
            password_hash,
            role: Role::Customer,
        },
    )
    .await
    .map_err(error_response)?;

    let claims = Claims::mint(
        user_id,
        Role::Customer,
        Utc::now().timestamp(),
        st.token_ttl_secs,
    );
    let token = shop_auth::issue_token(&st.token_key, &claims)
        .map_err(|e| error_response(anyhow::Error::new(e)))?;

    st.audit(
        AuditTopic::Auth,
        &user_id.to_string(),
        "user.registered",
        &email,
        json!({ "role": "customer" }),
    )
    .await;
    info!(%user_id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            token,
            expires_at: claims.exp,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /v1/auth/login
// ---------------------------------------------------------------------------

pub(crate) async fn login(
    State(st): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, Response> {
    // One message for wrong email and wrong password: a login probe learns
    // nothing about which half was wrong.
    let refuse = || json_error(StatusCode::UNAUTHORIZED, "invalid email or password");

    let email = req.email.trim().to_ascii_lowercase();
    let user = users::fetch_user_by_email(&st.pool, &email)
        .await
        .map_err(error_response)?
        .ok_or_else(refuse)?;

    let ok = shop_auth::verify_password(&req.password, &user.password_hash)
        .map_err(|e| error_response(anyhow::Error::new(e)))?;
    if !ok {
        return Err(refuse());
    }

    let claims = Claims::mint(user.user_id, user.role, Utc::now().timestamp(), st.token_ttl_secs);
    let token = shop_auth::issue_token(&st.token_key, &claims)
        .map_err(|e| error_response(anyhow::Error::new(e)))?;

    st.audit(
        AuditTopic::Auth,
        &user.user_id.to_string(),
        "user.login",
        &email,
        json!({ "jti": claims.jti.to_string() }),
    )
    .await;

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            token,
            expires_at: claims.exp,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/me
// ---------------------------------------------------------------------------

pub(crate) async fn me(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    let user = users::fetch_user(&st.pool, claims.sub)
        .await
        .map_err(error_response)?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "account no longer exists"))?;

    Ok((
        StatusCode::OK,
        Json(MeResponse {
            user_id: user.user_id,
            email: user.email,
            role: user.role.as_str().to_string(),
            member_since: user.created_at_utc,
            token_expires_at: claims.exp,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/products
// ---------------------------------------------------------------------------

pub(crate) async fn products_list(
    State(st): State<Arc<AppState>>,
    Query(query): Query<ProductListQuery>,
) -> Result<Response, Response> {
    let page = catalog::list_products_page(
        &st.pool,
        &ListProductsArgs {
            include_inactive: false,
            search: query.q.filter(|q| !q.trim().is_empty()),
            page: query.page.unwrap_or(1),
            per_page: query.per_page.unwrap_or(20),
        },
    )
    .await
    .map_err(error_response)?;

    let mut items = Vec::with_capacity(page.items.len());
    for row in &page.items {
        items.push(product_response(row).map_err(error_response)?);
    }

    Ok((
        StatusCode::OK,
        Json(ProductListResponse {
            items,
            page: page.page,
            per_page: page.per_page,
            total: page.total,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/products/:id
// ---------------------------------------------------------------------------

pub(crate) async fn product_get(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<Uuid>,
) -> Result<Response, Response> {
    // Anonymous browsing is fine; a presented token must still verify.
    let viewer_is_admin = match bearer_token(&headers) {
        Some(_) => authenticate(&st, &headers)?.role.is_admin(),
        None => false,
    };

    let row = catalog::fetch_product(&st.pool, product_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| not_found_product(product_id))?;

    // Customers never learn that a delisted product exists.
    if !row.active && !viewer_is_admin {
        return Err(not_found_product(product_id));
    }

    Ok((
        StatusCode::OK,
        Json(product_response(&row).map_err(error_response)?),
    )
        .into_response())
}

fn not_found_product(product_id: Uuid) -> Response {
    json_error(
        StatusCode::NOT_FOUND,
        format!("PRODUCT_NOT_FOUND: {product_id}"),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/products
// ---------------------------------------------------------------------------

pub(crate) async fn product_create(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateProductRequest>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    require_admin(&claims)?;

    let sku = req.sku.trim().to_string();
    let name = req.name.trim().to_string();
    if sku.is_empty() || name.is_empty() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "sku and name must be non-empty",
        ));
    }
    if req.stock < 0 {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "stock must be >= 0",
        ));
    }
    let price = parse_price(&req.price, &req.currency)?;

    let product_id = Uuid::new_v4();
    let product = NewProduct {
        product_id,
        sku,
        name,
        description: req.description.unwrap_or_default(),
        price,
        stock: req.stock,
        active: req.active.unwrap_or(true),
    };
    catalog::insert_product(&st.pool, &product)
        .await
        .map_err(error_response)?;

    st.audit(
        AuditTopic::Catalog,
        &claims.sub.to_string(),
        "product.created",
        &product.sku,
        json!({
            "product_id": product_id.to_string(),
            "price": price.decimal_str(),
            "currency": price.currency().as_str(),
            "stock": product.stock,
        }),
    )
    .await;

    let row = catalog::fetch_product(&st.pool, product_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| not_found_product(product_id))?;
    Ok((
        StatusCode::CREATED,
        Json(product_response(&row).map_err(error_response)?),
    )
        .into_response())
}

/// Parse a decimal price + currency pair from a request; 422 on bad input.
fn parse_price(price: &str, currency: &str) -> Result<Money, Response> {
    let currency = Currency::parse(currency)
        .map_err(|e| json_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let money = Money::parse(price, currency)
        .map_err(|e| json_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    if !money.is_positive() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "price must be positive",
        ));
    }
    Ok(money)
}

// ---------------------------------------------------------------------------
// PUT /v1/products/:id
// ---------------------------------------------------------------------------

pub(crate) async fn product_update(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<Uuid>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    require_admin(&claims)?;

    let price = match (&req.price, &req.currency) {
        (Some(p), Some(c)) => Some(parse_price(p, c)?),
        (None, None) => None,
        _ => {
            return Err(json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "price and currency must be supplied together",
            ))
        }
    };
    if let Some(stock) = req.stock {
        if stock < 0 {
            return Err(json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "stock must be >= 0",
            ));
        }
    }

    let update = ProductUpdate {
        name: req.name,
        description: req.description,
        price,
        stock: req.stock,
        active: req.active,
    };
    let row = catalog::update_product(&st.pool, product_id, &update)
        .await
        .map_err(error_response)?
        .ok_or_else(|| not_found_product(product_id))?;

    st.audit(
        AuditTopic::Catalog,
        &claims.sub.to_string(),
        "product.updated",
        &row.sku,
        json!({
            "product_id": product_id.to_string(),
            "stock": row.stock,
            "active": row.active,
        }),
    )
    .await;

    Ok((
        StatusCode::OK,
        Json(product_response(&row).map_err(error_response)?),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/cart      DELETE /v1/cart
// ---------------------------------------------------------------------------

pub(crate) async fn cart_get(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    let body = priced_cart_response(&st, claims.sub).await?;
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub(crate) async fn cart_clear(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    let cart = carts::fetch_or_create_cart(&st.pool, claims.sub)
        .await
        .map_err(error_response)?;
    let removed = carts::clear_cart(&st.pool, cart.cart_id)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(ClearCartResponse { removed })).into_response())
}

// ---------------------------------------------------------------------------
// POST /v1/cart/items
// ---------------------------------------------------------------------------

pub(crate) async fn cart_add_item(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddCartItemRequest>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    if req.qty < 1 {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("BAD_QTY: {}", req.qty),
        ));
    }

    let cart = carts::fetch_or_create_cart(&st.pool, claims.sub)
        .await
        .map_err(error_response)?;
    carts::add_line(&st.pool, cart.cart_id, req.product_id, req.qty)
        .await
        .map_err(error_response)?;

    let body = priced_cart_response(&st, claims.sub).await?;
    Ok((StatusCode::OK, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// PUT /v1/cart/items/:product_id      DELETE /v1/cart/items/:product_id
// ---------------------------------------------------------------------------

pub(crate) async fn cart_set_qty(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<Uuid>,
    Json(req): Json<SetCartQtyRequest>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    if req.qty < 1 {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("BAD_QTY: {}", req.qty),
        ));
    }

    let cart = carts::fetch_or_create_cart(&st.pool, claims.sub)
        .await
        .map_err(error_response)?;
    let updated = carts::set_line_qty(&st.pool, cart.cart_id, product_id, req.qty)
        .await
        .map_err(error_response)?;
    if !updated {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            format!("line not in cart: {product_id}"),
        ));
    }

    let body = priced_cart_response(&st, claims.sub).await?;
    Ok((StatusCode::OK, Json(body)).into_response())
}

pub(crate) async fn cart_remove_item(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<Uuid>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    let cart = carts::fetch_or_create_cart(&st.pool, claims.sub)
        .await
        .map_err(error_response)?;
    let removed = carts::remove_line(&st.pool, cart.cart_id, product_id)
        .await
        .map_err(error_response)?;
    if !removed {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            format!("line not in cart: {product_id}"),
        ));
    }

    let body = priced_cart_response(&st, claims.sub).await?;
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Price the user's cart against the live catalog. Pricing failures (product
/// delisted, stock gone, currency drift) are 409s carrying the reason.
async fn priced_cart_response(st: &AppState, user_id: Uuid) -> Result<CartResponse, Response> {
    let cart = carts::fetch_cart(&st.pool, user_id)
        .await
        .map_err(error_response)?;
    let ids: Vec<Uuid> = cart.lines.iter().map(|l| l.product_id).collect();
    let products = catalog::product_map(&st.pool, &ids)
        .await
        .map_err(error_response)?;
    let priced = shop_cart::price_cart(&cart, &products)
        .map_err(|e| json_error(StatusCode::CONFLICT, e.to_string()))?;

    let lines = priced
        .lines
        .iter()
        .map(|l| CartLineResponse {
            product_id: l.product_id,
            sku: l.sku.clone(),
            name: l.name.clone(),
            unit_price: l.unit_price.decimal_str(),
            qty: l.qty,
            line_total: l.line_total.decimal_str(),
        })
        .collect();

    Ok(CartResponse {
        cart_id: cart.cart_id,
        lines,
        item_count: priced.item_count,
        total: priced.total.map(|t| t.decimal_str()),
        currency: priced.currency().map(|c| c.as_str().to_string()),
    })
}

// ---------------------------------------------------------------------------
// POST /v1/orders
// ---------------------------------------------------------------------------

pub(crate) async fn order_place(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<PlaceOrderRequest>>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    require_checkout_open(&st).await?;

    let order_id = body
        .and_then(|Json(b)| b.order_id)
        .unwrap_or_else(Uuid::new_v4);
    let placed = orders::place_order(&st.pool, claims.sub, order_id)
        .await
        .map_err(error_response)?;

    st.audit(
        AuditTopic::Orders,
        &claims.sub.to_string(),
        "order.placed",
        &order_id.to_string(),
        json!({
            "total_minor": placed.order.total_minor,
            "currency": placed.order.currency,
            "lines": placed.lines.len(),
        }),
    )
    .await;
    st.publish(BusMsg::OrderPlaced {
        order_id,
        user_id: claims.sub,
        total_minor: placed.order.total_minor,
        currency: placed.order.currency.clone(),
    });

    // Placement is the only path that takes stock off the shelf, so the
    // low-stock check rides on its report instead of a catalog poll.
    for (product_id, stock) in &placed.stock_after {
        if *stock <= st.low_stock_watermark {
            let sku = placed
                .lines
                .iter()
                .find(|l| l.product_id == *product_id)
                .map(|l| l.sku.clone())
                .unwrap_or_default();
            warn!(%product_id, sku, stock, "stock low");
            st.publish(BusMsg::StockLow {
                product_id: *product_id,
                sku,
                stock: *stock,
            });
        }
    }

    let detail = order_detail_response(&OrderWithLines {
        order: placed.order,
        lines: placed.lines,
    })
    .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/orders      GET /v1/orders/:id
// ---------------------------------------------------------------------------

pub(crate) async fn orders_list(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    let rows = orders::list_orders_for_user(&st.pool, claims.sub)
        .await
        .map_err(error_response)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(order_summary(row).map_err(error_response)?);
    }
    Ok((StatusCode::OK, Json(OrdersListResponse { orders: out })).into_response())
}

pub(crate) async fn order_get(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    let fetched = fetch_order_scoped(&st, order_id, &claims).await?;
    Ok((
        StatusCode::OK,
        Json(order_detail_response(&fetched).map_err(error_response)?),
    )
        .into_response())
}

/// Fetch an order visible to `claims`: owners see their own, admins see all,
/// everyone else gets the same 404 an unknown id would.
async fn fetch_order_scoped(
    st: &AppState,
    order_id: Uuid,
    claims: &Claims,
) -> Result<OrderWithLines, Response> {
    let not_found = || {
        json_error(
            StatusCode::NOT_FOUND,
            format!("ORDER_NOT_FOUND: {order_id}"),
        )
    };
    let fetched = orders::fetch_order(&st.pool, order_id)
        .await
        .map_err(error_response)?
        .ok_or_else(not_found)?;
    if fetched.order.user_id != claims.sub && !claims.role.is_admin() {
        return Err(not_found());
    }
    Ok(fetched)
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/pay
// ---------------------------------------------------------------------------

pub(crate) async fn order_pay(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    require_checkout_open(&st).await?;
    let fetched = fetch_order_scoped(&st, order_id, &claims).await?;

    let (attempt, attempt_token) =
        payments::insert_payment_attempt(&st.pool, order_id, st.gateway.provider_name())
            .await
            .map_err(error_response)?;

    match st.gateway.charge(&st.pool, &attempt, &attempt_token).await {
        Ok(outcome) => {
            st.audit(
                AuditTopic::Payments,
                &claims.sub.to_string(),
                "payment.captured",
                &outcome.payment.payment_id.to_string(),
                json!({
                    "order_id": order_id.to_string(),
                    "attempt_seq": outcome.payment.attempt_seq,
                    "provider": outcome.payment.provider,
                    "provider_charge_id": outcome.payment.provider_charge_id,
                    "amount_minor": outcome.payment.amount_minor,
                    "currency": outcome.payment.currency,
                }),
            )
            .await;
            st.publish(BusMsg::PaymentUpdated {
                payment_id: outcome.payment.payment_id,
                order_id,
                status: outcome.payment.status.as_str().to_string(),
            });
            st.publish(BusMsg::OrderStatusChanged {
                order_id,
                from: fetched.order.status.as_str().to_string(),
                to: outcome.order.status.as_str().to_string(),
            });
            info!(%order_id, payment_id = %outcome.payment.payment_id, "payment captured");

            Ok((
                StatusCode::OK,
                Json(PayResponse {
                    payment_id: outcome.payment.payment_id,
                    order_id,
                    attempt_seq: outcome.payment.attempt_seq,
                    payment_status: outcome.payment.status.as_str().to_string(),
                    order_status: outcome.order.status.as_str().to_string(),
                    provider_charge_id: outcome.payment.provider_charge_id,
                }),
            )
                .into_response())
        }
        Err(e) => {
            // The gateway already marked the attempt FAILED (best-effort).
            st.audit(
                AuditTopic::Payments,
                &claims.sub.to_string(),
                "payment.failed",
                &attempt.payment_id.to_string(),
                json!({
                    "order_id": order_id.to_string(),
                    "attempt_seq": attempt.attempt_seq,
                    "error": format!("{e:#}"),
                }),
            )
            .await;
            st.publish(BusMsg::PaymentUpdated {
                payment_id: attempt.payment_id,
                order_id,
                status: "FAILED".to_string(),
            });
            Err(error_response(e))
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/cancel
// ---------------------------------------------------------------------------

pub(crate) async fn order_cancel(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    // Customers can only cancel their own orders; admins may cancel any.
    let requester = if claims.role.is_admin() {
        None
    } else {
        Some(claims.sub)
    };
    let order = orders::cancel_order(&st.pool, order_id, requester)
        .await
        .map_err(error_response)?;

    st.audit(
        AuditTopic::Orders,
        &claims.sub.to_string(),
        "order.cancelled",
        &order_id.to_string(),
        json!({ "status": order.status.as_str() }),
    )
    .await;
    st.publish(BusMsg::OrderStatusChanged {
        order_id,
        from: shop_orders::OrderStatus::PendingPayment.as_str().to_string(),
        to: order.status.as_str().to_string(),
    });

    Ok((
        StatusCode::OK,
        Json(order_summary(&order).map_err(error_response)?),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/ship      POST /v1/orders/:id/deliver
// ---------------------------------------------------------------------------

pub(crate) async fn order_ship(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, Response> {
    admin_transition(&st, &headers, order_id, OrderEvent::Ship, "order.shipped").await
}

pub(crate) async fn order_deliver(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, Response> {
    admin_transition(&st, &headers, order_id, OrderEvent::Deliver, "order.delivered").await
}

/// Shared body of the admin fulfilment transitions (ship, deliver).
async fn admin_transition(
    st: &AppState,
    headers: &HeaderMap,
    order_id: Uuid,
    event: OrderEvent,
    action: &str,
) -> Result<Response, Response> {
    let claims = authenticate(st, headers)?;
    require_admin(&claims)?;

    let before = orders::fetch_order(&st.pool, order_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            json_error(
                StatusCode::NOT_FOUND,
                format!("ORDER_NOT_FOUND: {order_id}"),
            )
        })?;
    let after = orders::transition_order(&st.pool, order_id, &event)
        .await
        .map_err(error_response)?;

    st.audit(
        AuditTopic::Orders,
        &claims.sub.to_string(),
        action,
        &order_id.to_string(),
        json!({ "from": before.order.status.as_str(), "to": after.status.as_str() }),
    )
    .await;
    st.publish(BusMsg::OrderStatusChanged {
        order_id,
        from: before.order.status.as_str().to_string(),
        to: after.status.as_str().to_string(),
    });

    Ok((
        StatusCode::OK,
        Json(order_summary(&after).map_err(error_response)?),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/refund
// ---------------------------------------------------------------------------

pub(crate) async fn order_refund(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    require_admin(&claims)?;

    let before = orders::fetch_order(&st.pool, order_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            json_error(
                StatusCode::NOT_FOUND,
                format!("ORDER_NOT_FOUND: {order_id}"),
            )
        })?;

    // The refund acts on the captured attempt, not whichever came last.
    let captured = payments::list_attempts(&st.pool, order_id)
        .await
        .map_err(error_response)?
        .into_iter()
        .find(|p| p.status == shop_orders::PaymentStatus::Captured)
        .ok_or_else(|| {
            json_error(
                StatusCode::NOT_FOUND,
                format!("PAYMENT_NOT_FOUND: no captured payment for order {order_id}"),
            )
        })?;

    let outcome = st
        .gateway
        .refund(&st.pool, captured.payment_id)
        .await
        .map_err(error_response)?;

    st.audit(
        AuditTopic::Payments,
        &claims.sub.to_string(),
        "payment.refunded",
        &outcome.payment.payment_id.to_string(),
        json!({
            "order_id": order_id.to_string(),
            "amount_minor": outcome.payment.amount_minor,
            "currency": outcome.payment.currency,
        }),
    )
    .await;
    st.audit(
        AuditTopic::Orders,
        &claims.sub.to_string(),
        "order.refunded",
        &order_id.to_string(),
        json!({ "from": before.order.status.as_str(), "to": outcome.order.status.as_str() }),
    )
    .await;
    st.publish(BusMsg::PaymentUpdated {
        payment_id: outcome.payment.payment_id,
        order_id,
        status: outcome.payment.status.as_str().to_string(),
    });
    st.publish(BusMsg::OrderStatusChanged {
        order_id,
        from: before.order.status.as_str().to_string(),
        to: outcome.order.status.as_str().to_string(),
    });

    Ok((
        StatusCode::OK,
        Json(order_summary(&outcome.order).map_err(error_response)?),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /v1/checkout/enable      POST /v1/checkout/disable
// ---------------------------------------------------------------------------

pub(crate) async fn checkout_enable(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    set_checkout_gate(&st, &headers, true).await
}

pub(crate) async fn checkout_disable(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    set_checkout_gate(&st, &headers, false).await
}

async fn set_checkout_gate(
    st: &AppState,
    headers: &HeaderMap,
    enabled: bool,
) -> Result<Response, Response> {
    let claims = authenticate(st, headers)?;
    require_admin(&claims)?;

    *st.checkout_enabled.write().await = enabled;

    let actor = claims.sub.to_string();
    st.audit(
        AuditTopic::Admin,
        &actor,
        if enabled {
            "checkout.enabled"
        } else {
            "checkout.disabled"
        },
        "checkout",
        json!({ "enabled": enabled }),
    )
    .await;
    st.publish(BusMsg::CheckoutGate { enabled, actor });
    info!(enabled, "checkout gate changed");

    Ok((
        StatusCode::OK,
        Json(CheckoutGateResponse {
            checkout_enabled: enabled,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE, admin only)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let claims = authenticate(&st, &headers)?;
    require_admin(&claims)?;

    let mut out_headers = HeaderMap::new();
    out_headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    out_headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    Ok((out_headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response())
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                // Envelope gives consumers an id and timestamp to dedup on;
                // the SSE event name is mirrored inside for clients that
                // read raw messages.
                let name = m.event_name();
                let envelope = EventEnvelope {
                    event_id: Uuid::new_v4(),
                    ts_utc: Utc::now(),
                    topic: m.topic().to_string(),
                    event_type: name.to_string(),
                    payload: m,
                };
                let data = serde_json::to_string(&envelope).ok()?;
                Some(Ok(Event::default().event(name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

// ---------------------------------------------------------------------------
// Row -> response converters
// ---------------------------------------------------------------------------

fn product_response(row: &ProductRow) -> anyhow::Result<ProductResponse> {
    let price = row.price()?;
    Ok(ProductResponse {
        product_id: row.product_id,
        sku: row.sku.clone(),
        name: row.name.clone(),
        description: row.description.clone(),
        price: price.decimal_str(),
        currency: price.currency().as_str().to_string(),
        stock: row.stock,
        active: row.active,
    })
}

fn order_summary(row: &OrderRow) -> anyhow::Result<OrderSummary> {
    Ok(OrderSummary {
        order_id: row.order_id,
        status: row.status.as_str().to_string(),
        total: row.total()?.decimal_str(),
        currency: row.currency.clone(),
        placed_at_utc: row.placed_at_utc,
        updated_at_utc: row.updated_at_utc,
    })
}

fn order_detail_response(fetched: &OrderWithLines) -> anyhow::Result<OrderDetailResponse> {
    let currency = Currency::parse(&fetched.order.currency)?;
    let lines = fetched
        .lines
        .iter()
        .map(|l| OrderLineResponse {
            product_id: l.product_id,
            sku: l.sku.clone(),
            name: l.name.clone(),
            unit_price: Money::new(l.unit_price_minor, currency).decimal_str(),
            qty: l.qty,
            line_total: Money::new(l.line_total_minor, currency).decimal_str(),
        })
        .collect();

    Ok(OrderDetailResponse {
        order_id: fetched.order.order_id,
        user_id: fetched.order.user_id,
        status: fetched.order.status.as_str().to_string(),
        total: fetched.order.total()?.decimal_str(),
        currency: fetched.order.currency.clone(),
        placed_at_utc: fetched.order.placed_at_utc,
        updated_at_utc: fetched.order.updated_at_utc,
        lines,
    })
}

//! HTTP API: registration, rates, conversion, history.
//!
//! Mirrors the bot's functionality for non-Telegram clients. Errors use a
//! uniform envelope: `{"error": {"code": "...", "message": "..."}}`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::convert;
use crate::core::{config, metrics};
use crate::email::{self, Mailer};
use crate::rates::RateCache;
use crate::storage::db::{self, DbConnection, DbPool, VerificationOutcome};

/// Shared state for the web server.
#[derive(Clone)]
pub struct WebState {
    pub db: Arc<DbPool>,
    pub rates: Arc<RateCache>,
    pub mailer: Mailer,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    id: i64,
    username: Option<String>,
    email: String,
}

#[derive(Deserialize)]
struct VerifyRequest {
    code: String,
}

#[derive(Deserialize)]
struct ConvertRequest {
    user_id: i64,
    from: String,
    to: String,
    amount: BigDecimal,
}

#[derive(Deserialize, Default)]
struct PageQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

impl PageQuery {
    fn page(&self) -> usize {
        self.page.unwrap_or(0)
    }

    fn per_page(&self) -> usize {
        self.per_page
            .unwrap_or(config::pagination::DEFAULT_PER_PAGE)
            .clamp(1, config::pagination::MAX_PER_PAGE)
    }
}

/// Builds the API router. Exposed separately so tests can drive it
/// without binding a socket.
pub fn create_router(state: WebState) -> Router {
    Router::new()
        .route("/api/users", post(create_user_handler))
        .route("/api/users/:id/verify", post(verify_handler))
        .route("/api/users/:id/history", get(history_handler))
        .route("/api/rates", get(rates_handler))
        .route("/api/rates/:code", get(rate_handler))
        .route("/api/convert", post(convert_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Start the HTTP API server.
pub async fn start_web_server(port: u16, state: WebState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = create_router(state);

    log::info!("Starting web server on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Uniform error envelope.
fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"error": {"code": code, "message": message.into()}})),
    )
        .into_response()
}

fn db_error(e: impl std::fmt::Display) -> Response {
    log::error!("Database error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "database error")
}

fn connection(state: &WebState) -> Result<DbConnection, Response> {
    db::get_connection(&state.db).map_err(db_error)
}

/// POST /api/users — register (or re-register) a user with an email.
/// Sends a verification code to the address.
async fn create_user_handler(
    State(state): State<WebState>,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    if !email::looks_like_email(&req.email) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_email", "email address is malformed");
    }

    let code = email::generate_code();
    {
        let conn = match connection(&state) {
            Ok(c) => c,
            Err(r) => return r,
        };
        if let Err(e) = db::create_user(&conn, req.id, req.username.as_deref())
            .and_then(|_| db::set_user_email(&conn, req.id, req.email.trim()))
            .and_then(|_| db::save_verification_code(&conn, req.id, &code))
        {
            return db_error(e);
        }
    }

    if let Err(e) = state.mailer.send_verification_code(req.email.trim(), &code).await {
        log::error!("Failed to send verification code to {}: {}", req.email, e);
        return error_response(
            StatusCode::BAD_GATEWAY,
            "email_send_failed",
            "could not send the verification email",
        );
    }

    (
        StatusCode::CREATED,
        Json(json!({"id": req.id, "email": req.email.trim(), "verification": "sent"})),
    )
        .into_response()
}

/// POST /api/users/:id/verify — submit the emailed code.
async fn verify_handler(
    State(state): State<WebState>,
    Path(id): Path<i64>,
    Json(req): Json<VerifyRequest>,
) -> Response {
    let conn = match connection(&state) {
        Ok(c) => c,
        Err(r) => return r,
    };

    match db::check_verification_code(&conn, id, &req.code) {
        Ok(VerificationOutcome::Verified) => Json(json!({"verified": true})).into_response(),
        Ok(VerificationOutcome::WrongCode { remaining }) => error_response(
            StatusCode::BAD_REQUEST,
            "wrong_code",
            format!("wrong code, {} attempts left", remaining),
        ),
        Ok(VerificationOutcome::Expired) => error_response(
            StatusCode::GONE,
            "code_expired",
            "the code expired or ran out of attempts, request a new one",
        ),
        Ok(VerificationOutcome::NotFound) => error_response(
            StatusCode::NOT_FOUND,
            "no_pending_code",
            "no pending verification code for this user",
        ),
        Err(e) => db_error(e),
    }
}

/// GET /api/rates — paginated currency list.
async fn rates_handler(State(state): State<WebState>, Query(query): Query<PageQuery>) -> Response {
    let table = match state.rates.get_or_refresh().await {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to get rate table: {}", e);
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "rates_unavailable",
                "rate table is not available",
            );
        }
    };

    let (items, current, total_pages) = table.page(query.page(), query.per_page());
    let currencies: Vec<_> = items
        .iter()
        .map(|c| {
            json!({
                "char_code": c.char_code,
                "name": c.name,
                "nominal": c.nominal,
                "value": c.value.to_string(),
            })
        })
        .collect();

    Json(json!({
        "date": table.date.to_string(),
        "page": current,
        "total_pages": total_pages,
        "total": table.len(),
        "currencies": currencies,
    }))
    .into_response()
}

/// GET /api/rates/:code — one currency.
async fn rate_handler(State(state): State<WebState>, Path(code): Path<String>) -> Response {
    let table = match state.rates.get_or_refresh().await {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to get rate table: {}", e);
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "rates_unavailable",
                "rate table is not available",
            );
        }
    };

    match table.get(&code) {
        Some(c) => Json(json!({
            "date": table.date.to_string(),
            "char_code": c.char_code,
            "name": c.name,
            "nominal": c.nominal,
            "value": c.value.to_string(),
            "per_unit": c.per_unit().with_scale_round(4, bigdecimal::RoundingMode::HalfUp).to_string(),
        }))
        .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "unknown_currency",
            format!("unknown currency {}", code.trim().to_uppercase()),
        ),
    }
}

/// POST /api/convert — convert an amount for a verified user.
async fn convert_handler(
    State(state): State<WebState>,
    Json(req): Json<ConvertRequest>,
) -> Response {
    {
        let conn = match connection(&state) {
            Ok(c) => c,
            Err(r) => return r,
        };
        match db::get_user(&conn, req.user_id) {
            Ok(Some(user)) if user.is_verified() => {}
            Ok(Some(_)) => {
                return error_response(
                    StatusCode::FORBIDDEN,
                    "email_not_verified",
                    "verify your email before converting",
                )
            }
            Ok(None) => {
                return error_response(StatusCode::NOT_FOUND, "unknown_user", "user is not registered")
            }
            Err(e) => return db_error(e),
        }
    }

    let table = match state.rates.get_or_refresh().await {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to get rate table: {}", e);
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "rates_unavailable",
                "rate table is not available",
            );
        }
    };

    let conversion = match convert::convert(
        &table,
        &req.from,
        &req.to,
        &req.amount,
        &convert::commission_percent(),
    ) {
        Ok(c) => c,
        Err(crate::core::error::AppError::UnknownCurrency(code)) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "unknown_currency",
                format!("unknown currency {}", code),
            )
        }
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
        }
    };

    {
        let conn = match connection(&state) {
            Ok(c) => c,
            Err(r) => return r,
        };
        if let Err(e) = db::save_conversion(
            &conn,
            req.user_id,
            &conversion.from,
            &conversion.to,
            &conversion.amount.to_string(),
            &conversion.rate.to_string(),
            &conversion.fee.to_string(),
            &conversion.result.to_string(),
        ) {
            return db_error(e);
        }
    }
    metrics::CONVERSIONS_TOTAL.inc();

    Json(json!({
        "from": conversion.from,
        "to": conversion.to,
        "amount": conversion.amount.to_string(),
        "rate": conversion.rate.to_string(),
        "gross": conversion.gross.to_string(),
        "commission_percent": conversion.commission_percent.to_string(),
        "fee": conversion.fee.to_string(),
        "result": conversion.result.to_string(),
        "date": table.date.to_string(),
    }))
    .into_response()
}

/// GET /api/users/:id/history — paginated conversion history, newest first.
async fn history_handler(
    State(state): State<WebState>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Response {
    let conn = match connection(&state) {
        Ok(c) => c,
        Err(r) => return r,
    };

    match db::get_user(&conn, id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "unknown_user", "user is not registered")
        }
        Err(e) => return db_error(e),
    }

    let per_page = query.per_page();
    let total = match db::count_conversions(&conn, id) {
        Ok(t) => t,
        Err(e) => return db_error(e),
    };
    // Clamp before computing the offset so an absurd page number cannot
    // overflow the multiply below.
    let total_pages = (total as usize).div_ceil(per_page).max(1);
    let page = query.page().min(total_pages - 1);
    let entries = match db::get_conversion_history(&conn, id, per_page as u32, (page * per_page) as u32)
    {
        Ok(e) => e,
        Err(e) => return db_error(e),
    };
    let stats = match db::get_user_stats(&conn, id) {
        Ok(s) => s,
        Err(e) => return db_error(e),
    };

    let conversions: Vec<_> = entries
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "from": e.from_code,
                "to": e.to_code,
                "amount": e.amount,
                "rate": e.rate,
                "fee": e.fee,
                "result": e.result,
                "created_at": e.created_at,
            })
        })
        .collect();

    let by_source: Vec<_> = stats
        .iter()
        .map(|(code, count)| json!({"from": code, "count": count}))
        .collect();

    Json(json!({
        "page": page,
        "per_page": per_page,
        "total": total,
        "conversions": conversions,
        "by_source": by_source,
    }))
    .into_response()
}

/// GET /health — liveness probe.
async fn health_handler() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// GET /metrics — Prometheus text exposition.
async fn metrics_handler() -> Response {
    (StatusCode::OK, metrics::gather()).into_response()
}

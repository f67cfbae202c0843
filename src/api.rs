//! HTTP/JSON surface for the orchestration layer. Translates requests into
//! engine operations and engine outcomes into status codes; holds no state of
//! its own beyond the admin secret.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{now_ms, Booking, BookingStatus, Contact, HotelId, Ms, StayRange};
use crate::observability;

pub struct ApiState {
    pub engine: Arc<Engine>,
    /// Shared secret for the administrative routes (expire, inventory);
    /// compared against the `x-admin-token` header before the engine is
    /// invoked.
    pub admin_token: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/booking/hold", post(create_hold))
        .route("/booking/confirm", post(confirm_booking))
        .route("/booking/cancel", post(cancel_booking))
        .route("/booking/:id", get(get_booking))
        .route("/availability", get(availability))
        .route("/booking/expire", post(expire_holds))
        .route("/admin/inventory", post(provision_inventory))
        .with_state(state)
}

// ── Request / response bodies ────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HoldRequest {
    hotel_id: HotelId,
    room_type: String,
    check_in: NaiveDate,
    check_out: NaiveDate,
    contact: Contact,
}

#[derive(Debug, Deserialize)]
struct BookingRef {
    booking_id: Ulid,
}

#[derive(Debug, Serialize)]
struct BookingSummary {
    booking_id: Ulid,
    status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    hold_expires_at: Option<Ms>,
}

#[derive(Debug, Serialize)]
struct BookingRecord {
    booking_id: Ulid,
    hotel_id: HotelId,
    room_type: String,
    check_in: NaiveDate,
    check_out: NaiveDate,
    contact: Contact,
    status: BookingStatus,
    hold_expires_at: Option<Ms>,
    created_at: Ms,
}

impl From<Booking> for BookingRecord {
    fn from(b: Booking) -> Self {
        Self {
            booking_id: b.id,
            hotel_id: b.hotel_id,
            room_type: b.room_type,
            check_in: b.check_in,
            check_out: b.check_out,
            contact: b.contact,
            status: b.status,
            hold_expires_at: b.hold_expires_at,
            created_at: b.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    hotel_id: HotelId,
    room_type: String,
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct ProvisionRequest {
    hotel_id: HotelId,
    room_type: String,
    from: NaiveDate,
    to: NaiveDate,
    total_qty: u32,
}

// ── Error mapping ────────────────────────────────────────────────

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::InvalidRange
            | EngineError::InvalidContact(_)
            | EngineError::Unavailable(_)
            | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) | EngineError::Expired(_) => StatusCode::CONFLICT,
            EngineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

fn error_label(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange => "invalid_range",
        EngineError::InvalidContact(_) => "invalid_contact",
        EngineError::Unavailable(_) => "unavailable",
        EngineError::NotFound(_) => "not_found",
        EngineError::InvalidState(_) => "invalid_state",
        EngineError::Expired(_) => "expired",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::Persistence(_) => "persistence",
    }
}

/// Record RED metrics for one engine call and map its error for HTTP.
fn finish<T>(
    op: &'static str,
    start: Instant,
    result: Result<T, EngineError>,
) -> Result<T, ApiError> {
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => error_label(e),
    };
    metrics::counter!(observability::OPS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::OP_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    result.map_err(ApiError::from)
}

fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    // Fail closed when no token is configured.
    if state.admin_token.is_empty() || presented.as_bytes() != state.admin_token.as_bytes() {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Err(ApiError(
            StatusCode::FORBIDDEN,
            "admin token missing or wrong".into(),
        ));
    }
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_hold(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<HoldRequest>,
) -> Result<Json<BookingSummary>, ApiError> {
    let start = Instant::now();
    let result = state
        .engine
        .create_hold(
            req.hotel_id,
            &req.room_type,
            StayRange::new(req.check_in, req.check_out),
            req.contact,
        )
        .await;
    let booking = finish("hold", start, result)?;
    Ok(Json(BookingSummary {
        booking_id: booking.id,
        status: booking.status,
        hold_expires_at: booking.hold_expires_at,
    }))
}

async fn confirm_booking(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<BookingRef>,
) -> Result<Json<BookingSummary>, ApiError> {
    let start = Instant::now();
    let result = state.engine.confirm(req.booking_id).await;
    let booking = finish("confirm", start, result)?;
    Ok(Json(BookingSummary {
        booking_id: booking.id,
        status: booking.status,
        hold_expires_at: None,
    }))
}

async fn cancel_booking(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<BookingRef>,
) -> Result<Json<BookingSummary>, ApiError> {
    let start = Instant::now();
    let result = state.engine.cancel(req.booking_id).await;
    let booking = finish("cancel", start, result)?;
    Ok(Json(BookingSummary {
        booking_id: booking.id,
        status: booking.status,
        hold_expires_at: None,
    }))
}

async fn get_booking(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<BookingRecord>, ApiError> {
    // An unparseable id cannot name any booking.
    let not_found = || ApiError(StatusCode::NOT_FOUND, "booking not found".into());
    let id: Ulid = id.parse().map_err(|_| not_found())?;
    let booking = state.engine.get_booking(id).await.ok_or_else(not_found)?;
    Ok(Json(booking.into()))
}

async fn availability(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let result = state
        .engine
        .availability(q.hotel_id, &q.room_type, q.from, q.to)
        .await;
    let days = finish("availability", start, result)?;
    Ok(Json(json!({ "days": days })).into_response())
}

async fn expire_holds(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let start = Instant::now();
    let result = state.engine.expire_due_holds(now_ms()).await;
    let released = finish("expire", start, result)?;
    if released > 0 {
        metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(released as u64);
    }
    Ok(Json(json!({ "released": released })).into_response())
}

async fn provision_inventory(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<ProvisionRequest>,
) -> Result<Response, ApiError> {
    require_admin(&state, &headers)?;
    let start = Instant::now();
    let result = state
        .engine
        .provision(req.hotel_id, &req.room_type, req.from, req.to, req.total_qty)
        .await;
    let days = finish("provision", start, result)?;
    Ok(Json(json!({ "days": days })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_http_status_codes() {
        let cases = [
            (EngineError::InvalidRange, StatusCode::BAD_REQUEST),
            (
                EngineError::Unavailable("2024-06-02".parse().unwrap()),
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::NotFound(Ulid::new()), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidState(BookingStatus::Cancelled),
                StatusCode::CONFLICT,
            ),
            (EngineError::Expired(Ulid::new()), StatusCode::CONFLICT),
            (
                EngineError::Persistence("wal".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).0, expected);
        }
    }
}

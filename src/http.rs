//! JSON surface over the engine and the webhook endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, MatchedPath, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, NewBooking, Verdict};
use crate::limits::MAX_WEBHOOK_BODY_BYTES;
use crate::model::*;
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::webhook::{WebhookAck, WebhookError, WebhookProcessor};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub webhooks: Arc<WebhookProcessor>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, webhooks: Arc<WebhookProcessor>) -> Self {
        Self { engine, webhooks }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/slots", get(list_slots))
        .route("/api/slots/validate", post(validate_slot))
        .route("/api/holds", post(place_hold).delete(release_hold))
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/:id", get(get_booking))
        .route("/api/admin/bookings/:id/status", post(override_status))
        .route("/api/admin/availability", put(replace_availability))
        .route("/api/admin/exceptions", post(add_exception))
        .route(
            "/api/stripe/webhook",
            post(stripe_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)),
        )
        .route_layer(middleware::from_fn(track_metrics));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(api)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(started.elapsed().as_secs_f64());
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    response
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Engine(EngineError),
    Webhook(WebhookError),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Engine(e) => match e {
                EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                EngineError::SlotUnavailable(_) => (StatusCode::CONFLICT, "SLOT_UNAVAILABLE"),
                EngineError::BookingNotFound(_) | EngineError::HoldNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                EngineError::TransitionRejected(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "TRANSITION_REJECTED")
                }
                EngineError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            },
            AppError::Webhook(_) => (StatusCode::BAD_REQUEST, "SIGNATURE_VERIFICATION_FAILED"),
        };
        let message = match self {
            AppError::BadRequest(msg) => msg,
            AppError::Engine(e) => e.to_string(),
            AppError::Webhook(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(code, "{message}");
        }
        let body = ApiError {
            code: code.into(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

fn date_param(raw: &str) -> ApiResult<NaiveDate> {
    parse_date(raw).ok_or_else(|| AppError::BadRequest(format!("invalid date: {raw}")))
}

fn time_param(raw: &str) -> ApiResult<Minute> {
    parse_time_of_day(raw).ok_or_else(|| AppError::BadRequest(format!("invalid time: {raw}")))
}

fn id_param(raw: &str) -> ApiResult<Ulid> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("invalid booking id: {raw}")))
}

fn window_param(start: &str, end: &str) -> ApiResult<Span> {
    let (start, end) = (time_param(start)?, time_param(end)?);
    if start >= end {
        return Err(AppError::BadRequest("start time must be before end time".into()));
    }
    Ok(Span::new(start, end))
}

// ── Slots ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotsQuery {
    date: String,
    lesson_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotsResponse {
    date: NaiveDate,
    lesson_type: String,
    slots: Vec<String>,
}

async fn list_slots(
    State(state): State<AppState>,
    Query(q): Query<SlotsQuery>,
) -> ApiResult<Json<SlotsResponse>> {
    let date = date_param(&q.date)?;
    let slots = state.engine.available_slots(date, &q.lesson_type).await?;
    Ok(Json(SlotsResponse {
        date,
        lesson_type: q.lesson_type,
        slots,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest {
    date: String,
    time: String,
    duration_minutes: Option<Minute>,
    lesson_type: Option<String>,
}

async fn validate_slot(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<Json<Verdict>> {
    let date = date_param(&req.date)?;
    let start = time_param(&req.time)?;
    let duration = match (req.duration_minutes, req.lesson_type.as_deref()) {
        (Some(d), _) => d,
        (None, Some(lesson)) => state.engine.duration_of(lesson)?,
        (None, None) => {
            return Err(AppError::BadRequest(
                "durationMinutes or lessonType is required".into(),
            ));
        }
    };
    Ok(Json(state.engine.validate(date, start, duration).await?))
}

// ── Holds ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldRequest {
    date: String,
    time: String,
    lesson_type: String,
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseRequest {
    date: String,
    time: String,
    session_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldView {
    id: Ulid,
    date: NaiveDate,
    time: String,
    duration_minutes: Minute,
    session_id: String,
    expires_at: Ms,
}

impl From<Hold> for HoldView {
    fn from(h: Hold) -> Self {
        Self {
            id: h.id,
            date: h.date,
            time: format_time_of_day(h.start),
            duration_minutes: h.duration_minutes,
            session_id: h.session_id,
            expires_at: h.expires_at,
        }
    }
}

async fn place_hold(
    State(state): State<AppState>,
    Json(req): Json<HoldRequest>,
) -> ApiResult<(StatusCode, Json<HoldView>)> {
    let date = date_param(&req.date)?;
    let start = time_param(&req.time)?;
    let hold = state
        .engine
        .place_hold(date, start, &req.lesson_type, &req.session_id)
        .await?;
    Ok((StatusCode::CREATED, Json(hold.into())))
}

async fn release_hold(
    State(state): State<AppState>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<StatusCode> {
    let date = date_param(&req.date)?;
    let start = time_param(&req.time)?;
    state.engine.release_hold(date, start, &req.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingRequest {
    preferred_date: String,
    preferred_time: String,
    lesson_type: String,
    parent: ParentContact,
    #[serde(default)]
    athletes: Vec<AthleteInfo>,
    external_session_id: Option<String>,
    /// Defaults to `external_session_id`: the checkout that placed the hold
    /// is usually the one paying for it.
    hold_session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingView {
    id: Ulid,
    preferred_date: NaiveDate,
    preferred_time: String,
    lesson_type: String,
    duration_minutes: Minute,
    payment_status: PaymentStatus,
    attendance_status: AttendanceStatus,
    status: BookingStatus,
    external_session_id: Option<String>,
    paid_amount: Option<i64>,
    created_at: Ms,
    parent: ParentContact,
    athletes: Vec<AthleteInfo>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            preferred_date: b.preferred_date,
            preferred_time: format_time_of_day(b.preferred_time),
            status: BookingStatus::derive(b.payment_status, b.attendance_status),
            lesson_type: b.lesson_type,
            duration_minutes: b.duration_minutes,
            payment_status: b.payment_status,
            attendance_status: b.attendance_status,
            external_session_id: b.external_session_id,
            paid_amount: b.paid_amount,
            created_at: b.created_at,
            parent: b.parent,
            athletes: b.athletes,
        }
    }
}

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingView>)> {
    let hold_session_id = req.hold_session_id.or_else(|| req.external_session_id.clone());
    let new = NewBooking {
        preferred_date: date_param(&req.preferred_date)?,
        preferred_time: time_param(&req.preferred_time)?,
        lesson_type: req.lesson_type,
        parent: req.parent,
        athletes: req.athletes,
        external_session_id: req.external_session_id,
        hold_session_id,
    };
    let booking = state.engine.create_booking(new).await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = state.engine.get_booking(id_param(&id)?).await?;
    Ok(Json(booking.into()))
}

// ── Admin ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideRequest {
    payment_status: Option<String>,
    attendance_status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverrideResponse {
    changed: bool,
    booking: BookingSnapshot,
}

async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let id = id_param(&id)?;
    let target = StatusTarget {
        payment: req
            .payment_status
            .as_deref()
            .map(str::parse::<PaymentStatus>)
            .transpose()
            .map_err(AppError::BadRequest)?,
        attendance: req
            .attendance_status
            .as_deref()
            .map(str::parse::<AttendanceStatus>)
            .transpose()
            .map_err(AppError::BadRequest)?,
    };
    let applied = state.engine.admin_override(id, target).await?;
    Ok(Json(OverrideResponse {
        changed: applied.changed,
        booking: applied.snapshot(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeeklySlotRequest {
    day_of_week: u8,
    start_time: String,
    end_time: String,
    #[serde(default = "yes")]
    is_recurring: bool,
    #[serde(default = "yes")]
    is_available: bool,
}

fn yes() -> bool {
    true
}

#[derive(Deserialize)]
struct AvailabilityRequest {
    slots: Vec<WeeklySlotRequest>,
}

#[derive(Serialize)]
struct AvailabilityResponse {
    count: usize,
}

async fn replace_availability(
    State(state): State<AppState>,
    Json(req): Json<AvailabilityRequest>,
) -> ApiResult<Json<AvailabilityResponse>> {
    let slots = req
        .slots
        .into_iter()
        .map(|s| {
            Ok(WeeklySlot {
                id: Ulid::new(),
                day_of_week: s.day_of_week,
                window: window_param(&s.start_time, &s.end_time)?,
                is_recurring: s.is_recurring,
                is_available: s.is_available,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    let count = slots.len();
    state.engine.replace_weekly_slots(slots).await?;
    Ok(Json(AvailabilityResponse { count }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionRequest {
    date: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    is_available: bool,
    reason: Option<String>,
}

#[derive(Serialize)]
struct Created {
    id: Ulid,
}

async fn add_exception(
    State(state): State<AppState>,
    Json(req): Json<ExceptionRequest>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let exception = AvailabilityException {
        id: Ulid::new(),
        date: date_param(&req.date)?,
        window: window_param(&req.start_time, &req.end_time)?,
        is_available: req.is_available,
        reason: req.reason.filter(|r| !r.trim().is_empty()),
    };
    let id = exception.id;
    state.engine.add_exception(exception).await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

// ── Webhook ──────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    received: bool,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    booking_id: Option<Ulid>,
}

async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let ack = state
        .webhooks
        .handle(&body, signature)
        .await
        .map_err(AppError::Webhook)?;
    let (outcome, booking_id) = match ack {
        WebhookAck::Processed {
            booking_id,
            changed: true,
        } => ("processed", Some(booking_id)),
        WebhookAck::Processed {
            booking_id,
            changed: false,
        } => ("noop", Some(booking_id)),
        WebhookAck::Duplicate { booking_id } => ("duplicate", Some(booking_id)),
        WebhookAck::Ignored(_) => ("ignored", None),
    };
    Ok(Json(WebhookResponse {
        received: true,
        outcome,
        booking_id,
    }))
}

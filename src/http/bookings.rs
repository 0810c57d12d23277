use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{BookingDraft, BookingPatch};
use crate::model::{Booking, BookingStatus};

use super::{ApiError, AppState, JsonBody, PathParam, QueryParams};

/// Booking as returned to clients, times in `HH:00` form.
#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: Ulid,
    pub transaction_id: Ulid,
    pub coach_id: Ulid,
    pub member_id: Ulid,
    pub booking_date: NaiveDate,
    pub day_of_week: &'static str,
    pub start_time: String,
    pub end_time: String,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            transaction_id: b.transaction_id,
            coach_id: b.coach_id,
            member_id: b.member_id,
            booking_date: b.booking_date,
            day_of_week: b.day_of_week().name(),
            start_time: b.slot.start_wire(),
            end_time: b.slot.end_wire(),
            status: b.status,
            notes: b.notes,
        }
    }
}

fn views(bookings: Vec<Booking>) -> Json<Vec<BookingView>> {
    Json(bookings.into_iter().map(BookingView::from).collect())
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: BookingStatus,
}

#[derive(Debug, Deserialize)]
struct CoachFilter {
    date: Option<NaiveDate>,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route(
            "/bookings/{id}",
            get(get_booking).put(update_booking).delete(delete_booking),
        )
        .route("/bookings/{id}/status", patch(update_status))
        .route("/bookings/member/{id}", get(bookings_by_member))
        .route("/bookings/coach/{id}", get(bookings_by_coach))
}

async fn create_booking(
    State(state): State<AppState>,
    JsonBody(draft): JsonBody<BookingDraft>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let booking = state.engine.create_booking(draft).await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

async fn get_booking(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.get_booking(id).await?.into()))
}

async fn update_booking(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
    JsonBody(patch): JsonBody<BookingPatch>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.update_booking(id, patch).await?.into()))
}

async fn update_status(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
    JsonBody(body): JsonBody<StatusBody>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.update_status(id, body.status).await?.into()))
}

async fn delete_booking(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
) -> Result<Json<BookingView>, ApiError> {
    Ok(Json(state.engine.delete_booking(id).await?.into()))
}

async fn list_bookings(State(state): State<AppState>) -> Json<Vec<BookingView>> {
    views(state.engine.list_bookings().await)
}

async fn bookings_by_member(
    State(state): State<AppState>,
    PathParam(member_id): PathParam<Ulid>,
) -> Json<Vec<BookingView>> {
    views(state.engine.bookings_by_member(member_id).await)
}

async fn bookings_by_coach(
    State(state): State<AppState>,
    PathParam(coach_id): PathParam<Ulid>,
    QueryParams(filter): QueryParams<CoachFilter>,
) -> Json<Vec<BookingView>> {
    views(state.engine.bookings_by_coach(coach_id, filter.date).await)
}

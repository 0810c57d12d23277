use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;
use tracing::warn;
use ulid::Ulid;

use crate::directory::User;
use crate::engine::WindowPatch;
use crate::model::{AvailabilityWindow, DayOfWeek, Event, TimeSlot};

use super::bookings::BookingView;
use super::{ApiError, AppState, JsonBody, PathParam, QueryParams};

/// `day_of_week` on the wire: an index (Sunday = 0) or a day name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DayInput {
    Index(u8),
    Name(String),
}

impl TryFrom<DayInput> for DayOfWeek {
    type Error = ApiError;

    fn try_from(input: DayInput) -> Result<Self, Self::Error> {
        match input {
            DayInput::Index(i) => DayOfWeek::from_index(i)
                .ok_or_else(|| ApiError::validation(format!("day_of_week {i} is not in 0..=6"))),
            DayInput::Name(name) => Ok(name.parse::<DayOfWeek>()?),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WindowView {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub day_of_week: &'static str,
    pub day_index: usize,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
}

impl From<AvailabilityWindow> for WindowView {
    fn from(w: AvailabilityWindow) -> Self {
        Self {
            id: w.id,
            coach_id: w.coach_id,
            day_of_week: w.day_of_week.name(),
            day_index: w.day_of_week.index(),
            start_time: w.slot.start_wire(),
            end_time: w.slot.end_wire(),
            is_available: w.is_available,
        }
    }
}

fn views(windows: Vec<AvailabilityWindow>) -> Json<Vec<WindowView>> {
    Json(windows.into_iter().map(WindowView::from).collect())
}

#[derive(Debug, Deserialize)]
struct CreateWindow {
    coach_id: Ulid,
    day_of_week: DayInput,
    start_time: String,
    end_time: String,
    is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct UpdateWindow {
    day_of_week: Option<DayInput>,
    start_time: Option<String>,
    end_time: Option<String>,
    is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AvailableQuery {
    day_of_week: String,
    start_time: String,
    end_time: String,
}

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/coach-schedules", get(list_windows).post(create_window))
        .route("/coach-schedules/available", get(available_coaches))
        .route("/coach-schedules/coach/{id}", get(windows_for_coach))
        .route(
            "/coach-schedules/{id}",
            get(get_window).put(update_window).delete(delete_window),
        )
        .route("/coaches/{id}/events", get(coach_events))
}

async fn create_window(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateWindow>,
) -> Result<(StatusCode, Json<WindowView>), ApiError> {
    let day = DayOfWeek::try_from(body.day_of_week)?;
    let slot = TimeSlot::from_wire(&body.start_time, &body.end_time)?;
    let window = state
        .engine
        .set_availability(body.coach_id, day, slot, body.is_available.unwrap_or(true))
        .await?;
    Ok((StatusCode::CREATED, Json(window.into())))
}

async fn update_window(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
    JsonBody(body): JsonBody<UpdateWindow>,
) -> Result<Json<WindowView>, ApiError> {
    let patch = WindowPatch {
        day_of_week: body.day_of_week.map(DayOfWeek::try_from).transpose()?,
        start_time: body.start_time,
        end_time: body.end_time,
        is_available: body.is_available,
    };
    Ok(Json(state.engine.update_availability(id, patch).await?.into()))
}

async fn delete_window(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
) -> Result<Json<WindowView>, ApiError> {
    Ok(Json(state.engine.delete_availability(id).await?.into()))
}

async fn get_window(
    State(state): State<AppState>,
    PathParam(id): PathParam<Ulid>,
) -> Result<Json<WindowView>, ApiError> {
    Ok(Json(state.engine.get_window(id).await?.into()))
}

async fn list_windows(State(state): State<AppState>) -> Json<Vec<WindowView>> {
    views(state.engine.list_windows().await)
}

async fn windows_for_coach(
    State(state): State<AppState>,
    PathParam(coach_id): PathParam<Ulid>,
) -> Json<Vec<WindowView>> {
    views(state.engine.windows_for_coach(coach_id).await)
}

async fn available_coaches(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<AvailableQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let day = query.day_of_week.parse::<DayOfWeek>()?;
    let slot = TimeSlot::from_wire(&query.start_time, &query.end_time)?;
    Ok(Json(state.engine.available_coaches_for(day, &slot).await?))
}

fn event_payload(event: &Event) -> Value {
    match event {
        Event::WindowCreated { window } | Event::WindowUpdated { window } => {
            json!(WindowView::from(window.clone()))
        }
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
            json!(BookingView::from(booking.clone()))
        }
        Event::WindowDeleted { id, coach_id } | Event::BookingDeleted { id, coach_id } => {
            json!({ "id": id, "coach_id": coach_id })
        }
    }
}

/// Server-sent stream of committed changes to one coach's schedule.
async fn coach_events(
    State(state): State<AppState>,
    PathParam(coach_id): PathParam<Ulid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let events = state.engine.watch_coach(coach_id).await?;
    let stream = events.filter_map(move |msg| match msg {
        Ok(event) => Some(Ok(SseEvent::default()
            .event(event.kind())
            .data(event_payload(&event).to_string()))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("event stream for coach {coach_id} lagged, {skipped} events dropped");
            None
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::app::{AppState, error_response, parse_day};
use crate::booking::{BookingDraft, ContactDetails, Refresh};
use crate::calendar::{CalendarView, ViewMode};
use crate::models::AppointmentStatus;
use crate::routes_calendar::{provider_view, unavailable};

// --------------------------------------------------
// Service calendars (consumer side)
// --------------------------------------------------

// Calendar for `service_id`, loaded on first use. Only this view stays
// locked while the caller talks to the backend.
async fn service_view(state: &AppState, service_id: i64) -> Result<OwnedMutexGuard<CalendarView>, Response> {
    let (view, fresh) = {
        let mut views = state.service_views.lock().await;
        match views.get(&service_id) {
            Some(view) => (view.clone(), false),
            None => {
                let view = Arc::new(Mutex::new(state.new_view(ViewMode::Consumer { service_id })));
                views.insert(service_id, view.clone());
                (view, true)
            }
        }
    };

    let mut guard = view.lock_owned().await;
    if fresh {
        if let Err(err) = guard.refresh().await {
            state.service_views.lock().await.remove(&service_id);
            return Err(error_response(err));
        }
    }
    Ok(guard)
}

#[derive(Debug, Deserialize)]
pub struct ServiceCalendarQuery {
    pub date: String,
    #[serde(default)]
    pub refresh: bool,
}

pub async fn get_service_calendar(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(q): Query<ServiceCalendarQuery>,
) -> Response {
    let day = match parse_day(&q.date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let mut view = match service_view(&state, service_id).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if q.refresh {
        if let Err(err) = view.refresh().await {
            return error_response(err);
        }
    }
    Json(view.cells(day)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DraftQuery {
    pub slot: String,
}

// Booking form for one slot, pre-filled from the session
pub async fn get_draft(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(q): Query<DraftQuery>,
) -> Response {
    let view = match service_view(&state, service_id).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(slot) = view.find_slot(&q.slot) else {
        return (StatusCode::NOT_FOUND, "slot not found").into_response();
    };
    Json(state.booking.draft(service_id, slot)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub slot_id: String,
    // falls back to the session pre-fill when absent
    #[serde(default)]
    pub contact: Option<ContactDetails>,
}

pub async fn book(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Json(req): Json<BookRequest>,
) -> Response {
    let mut view = match service_view(&state, service_id).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(slot) = view.find_slot(&req.slot_id) else {
        return (StatusCode::NOT_FOUND, "slot not found").into_response();
    };

    let draft = match req.contact {
        Some(contact) => BookingDraft { contact, ..BookingDraft::new(service_id, slot) },
        None => state.booking.draft(service_id, slot),
    };

    match state.booking.submit(&draft, &mut *view).await {
        Ok(appointment) => (StatusCode::CREATED, Json(appointment)).into_response(),
        Err(err) => error_response(err),
    }
}

// --------------------------------------------------
// Appointment status
// --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: AppointmentStatus,
}

// Providers act through their own calendar; consumers through whichever
// booking calendar lists the appointment.
pub async fn change_status(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Response {
    if !state.session.is_signed_in() {
        return (StatusCode::UNAUTHORIZED, "sign-in required").into_response();
    }

    let outcome = if state.session.provider_id().is_some() {
        let mut guard = match provider_view(&state).await {
            Ok(g) => g,
            Err(resp) => return resp,
        };
        let Some(view) = guard.as_mut() else {
            return unavailable();
        };
        view.change_status(appointment_id, req.status).await
    } else {
        let views: Vec<Arc<Mutex<CalendarView>>> =
            state.service_views.lock().await.values().cloned().collect();
        let mut owner = None;
        for view in views {
            let guard = view.lock_owned().await;
            if guard.appointments().iter().any(|a| a.id == appointment_id) {
                owner = Some(guard);
                break;
            }
        }
        let Some(mut view) = owner else {
            return (StatusCode::NOT_FOUND, "appointment not found").into_response();
        };
        view.change_status(appointment_id, req.status).await
    };

    match outcome {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

// --------------------------------------------------
// Local HTTP surface: shared state, router, error mapping.
// Handlers live in routes_calendar.rs and routes_booking.rs.
// --------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset};
use serde_json::json;
use tokio::sync::Mutex;

use crate::api::BackendApi;
use crate::booking::BookingCoordinator;
use crate::calendar::{CalendarView, ViewMode};
use crate::config::CalendarSettings;
use crate::discount::DiscountEngine;
use crate::error::CalendarError;
use crate::models::DAY_FORMAT;
use crate::session::SessionContext;
use crate::{routes_booking, routes_calendar};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn BackendApi>,
    pub session: SessionContext,
    pub calendar: CalendarSettings,
    pub engine: DiscountEngine,
    pub offset: FixedOffset,
    pub booking: Arc<BookingCoordinator>,
    // calendar of the signed-in provider
    pub provider_view: Arc<Mutex<Option<CalendarView>>>,
    // booking calendars by service id, each locked on its own
    pub service_views: Arc<Mutex<HashMap<i64, Arc<Mutex<CalendarView>>>>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        session: SessionContext,
        calendar: CalendarSettings,
        engine: DiscountEngine,
        offset: FixedOffset,
    ) -> Self {
        let booking = Arc::new(BookingCoordinator::new(backend.clone(), session.clone()));
        AppState {
            backend,
            session,
            calendar,
            engine,
            offset,
            booking,
            provider_view: Arc::new(Mutex::new(None)),
            service_views: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn today(&self) -> NaiveDate {
        chrono::Utc::now().with_timezone(&self.offset).date_naive()
    }

    pub fn new_view(&self, mode: ViewMode) -> CalendarView {
        CalendarView::new(
            self.backend.clone(),
            self.session.clone(),
            mode,
            self.calendar,
            self.offset,
            self.today(),
        )
        .with_engine(self.engine)
    }

    // Drop cached calendars, e.g. when the user changes
    pub async fn reset_views(&self) {
        *self.provider_view.lock().await = None;
        self.service_views.lock().await.clear();
    }
}

// Local -> FixedOffset (current system offset)
pub fn local_offset() -> FixedOffset {
    let local = chrono::Local::now();
    FixedOffset::east_opt(local.offset().local_minus_utc()).unwrap_or_else(|| chrono::Utc.fix())
}

pub fn parse_day(date: &str) -> Result<NaiveDate, Response> {
    NaiveDate::parse_from_str(date, DAY_FORMAT)
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid date").into_response())
}

pub fn parse_time(value: &str) -> Result<DateTime<FixedOffset>, Response> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid timestamp").into_response())
}

// CalendarError -> status + {"error": message}
pub fn error_response(err: CalendarError) -> Response {
    let status = match &err {
        CalendarError::Validation(_) | CalendarError::MissingFields(_) => StatusCode::BAD_REQUEST,
        CalendarError::Overlap { .. } | CalendarError::Conflict(_) => StatusCode::CONFLICT,
        CalendarError::UnknownBlock { .. } => StatusCode::NOT_FOUND,
        CalendarError::Persist(_) | CalendarError::Submission(_) | CalendarError::Remote(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    let body = match &err {
        CalendarError::MissingFields(fields) => json!({ "error": err.to_string(), "fields": fields }),
        CalendarError::Conflict(conflicts) => {
            json!({ "error": err.to_string(), "conflict_appointments": conflicts })
        }
        _ => json!({ "error": err.to_string() }),
    };
    (status, Json(body)).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // session
        .route(
            "/session",
            post(routes_calendar::login).delete(routes_calendar::logout),
        )
        // provider calendar
        .route("/provider/calendar", get(routes_calendar::get_provider_calendar))
        .route("/provider/refresh", post(routes_calendar::refresh_provider))
        .route("/provider/blocks", post(routes_calendar::add_block))
        .route(
            "/provider/blocks/:id",
            put(routes_calendar::edit_block).delete(routes_calendar::delete_block),
        )
        .route("/provider/drag/start", post(routes_calendar::drag_start))
        .route("/provider/drag/move", post(routes_calendar::drag_move))
        .route("/provider/drag/tick", post(routes_calendar::drag_tick))
        .route("/provider/drag/end", post(routes_calendar::drag_end))
        .route("/provider/drag/cancel", post(routes_calendar::drag_cancel))
        .route("/provider/save", post(routes_calendar::save_availability))
        .route(
            "/provider/discount-config",
            get(routes_calendar::get_discount_config).put(routes_calendar::put_discount_config),
        )
        .route(
            "/provider/discount-config/boundary",
            patch(routes_calendar::patch_discount_boundary),
        )
        .route(
            "/provider/discount-config/percentage",
            patch(routes_calendar::patch_discount_percentage),
        )
        // consumer booking
        .route("/services/:id/calendar", get(routes_booking::get_service_calendar))
        .route("/services/:id/draft", get(routes_booking::get_draft))
        .route("/services/:id/book", post(routes_booking::book))
        .route("/appointments/:id/status", patch(routes_booking::change_status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_statuses() {
        let status = |e: CalendarError| error_response(e).status();
        assert_eq!(status(CalendarError::Validation("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(CalendarError::MissingFields(vec!["email".into()])), StatusCode::BAD_REQUEST);
        assert_eq!(status(CalendarError::Conflict(Vec::new())), StatusCode::CONFLICT);
        assert_eq!(
            status(CalendarError::UnknownBlock { day: "2026-03-02".into(), block_id: "b1".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(CalendarError::Persist("down".into())), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn request_dates_are_checked() {
        assert!(parse_day("2026-03-02").is_ok());
        assert!(parse_day("2026-13-02").is_err());
        assert!(parse_time("2026-03-02T09:00:00-05:00").is_ok());
        assert!(parse_time("9am").is_err());
    }
}

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::MutexGuard;

use crate::app::{AppState, error_response, parse_day, parse_time};
use crate::booking::Refresh;
use crate::calendar::{CalendarView, ViewMode};
use crate::discount::{self, Boundary, ConfigSummary};
use crate::drag::{DragState, Viewport};
use crate::interval::Interval;
use crate::models::{CurrentUser, DiscountConfig, Tier};

// --------------------------------------------------
// Session
// --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
    pub user: CurrentUser,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    state.reset_views().await;
    let user_id = req.user.id;
    let user_type = req.user.user_type;
    state.session.login(SecretString::from(req.token), req.user);

    Json(json!({
        "user_id": user_id,
        "user_type": user_type,
        "provider_id": state.session.provider_id(),
    }))
    .into_response()
}

pub async fn logout(State(state): State<AppState>) -> Response {
    state.session.logout();
    state.reset_views().await;
    StatusCode::NO_CONTENT.into_response()
}

// --------------------------------------------------
// Provider calendar
// --------------------------------------------------

// Calendar of the signed-in provider, created and loaded on first use
pub(crate) async fn provider_view(state: &AppState) -> Result<MutexGuard<'_, Option<CalendarView>>, Response> {
    let Some(provider_id) = state.session.provider_id() else {
        return Err((StatusCode::FORBIDDEN, "provider sign-in required").into_response());
    };

    let mut guard = state.provider_view.lock().await;
    let current = matches!(
        guard.as_ref().map(|v| v.mode()),
        Some(ViewMode::Provider { provider_id: id }) if id == provider_id
    );
    if !current {
        let mut view = state.new_view(ViewMode::Provider { provider_id });
        view.refresh().await.map_err(error_response)?;
        *guard = Some(view);
    }
    Ok(guard)
}

pub(crate) fn unavailable() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "calendar unavailable").into_response()
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: String, // "YYYY-MM-DD"
}

pub async fn get_provider_calendar(State(state): State<AppState>, Query(q): Query<DayQuery>) -> Response {
    let day = match parse_day(&q.date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_ref() else {
        return unavailable();
    };
    Json(view.cells(day)).into_response()
}

pub async fn refresh_provider(State(state): State<AppState>) -> Response {
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    match view.refresh().await {
        Ok(()) => Json(view.store().days()).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub date: String,
    pub start: String, // RFC 3339
    pub end: String,
}

pub async fn add_block(State(state): State<AppState>, Json(req): Json<BlockRequest>) -> Response {
    let (day, start, end) = match (parse_day(&req.date), parse_time(&req.start), parse_time(&req.end)) {
        (Ok(d), Ok(s), Ok(e)) => (d, s, e),
        (Err(resp), _, _) | (_, Err(resp), _) | (_, _, Err(resp)) => return resp,
    };
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    match view.store_mut().add_block(day, start, end) {
        Ok(block) => (StatusCode::CREATED, Json(block)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn edit_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BlockRequest>,
) -> Response {
    let (day, start, end) = match (parse_day(&req.date), parse_time(&req.start), parse_time(&req.end)) {
        (Ok(d), Ok(s), Ok(e)) => (d, s, e),
        (Err(resp), _, _) | (_, Err(resp), _) | (_, _, Err(resp)) => return resp,
    };
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };

    let store = view.store_mut();
    store.begin_edit(&id);
    match store.edit_block(day, &id, start, end) {
        Ok(block) => Json(block).into_response(),
        Err(err) => {
            store.cancel_edit(&id);
            error_response(err)
        }
    }
}

pub async fn delete_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DayQuery>,
) -> Response {
    let day = match parse_day(&q.date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    let deleted = view.store_mut().delete_block(day, &id);
    Json(json!({ "deleted": deleted })).into_response()
}

pub async fn save_availability(State(state): State<AppState>) -> Response {
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    match view.persist().await {
        Ok(()) => Json(view.store().days()).into_response(),
        Err(err) => error_response(err),
    }
}

// --------------------------------------------------
// Drag gesture
// --------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DragResponse {
    pub state: DragState,
    pub candidate: Option<Interval>,
    pub auto_scrolling: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll: Option<f64>,
}

fn drag_response(view: &CalendarView, scroll: Option<f64>) -> Response {
    Json(DragResponse {
        state: view.drag().state().clone(),
        candidate: view.drag().candidate().map(|(_, c)| c),
        auto_scrolling: view.drag().is_auto_scrolling(),
        scroll,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct DragStartRequest {
    pub date: String,
    pub y: f64, // px from the top of the day column
}

pub async fn drag_start(State(state): State<AppState>, Json(req): Json<DragStartRequest>) -> Response {
    let day = match parse_day(&req.date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    view.drag_mut().start(day, req.y);
    drag_response(view, None)
}

#[derive(Debug, Deserialize)]
pub struct DragMoveRequest {
    pub y: f64,
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

pub async fn drag_move(State(state): State<AppState>, Json(req): Json<DragMoveRequest>) -> Response {
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    view.drag_mut().pointer_moved(req.y, req.viewport);
    drag_response(view, None)
}

// One auto-scroll frame
pub async fn drag_tick(State(state): State<AppState>) -> Response {
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    let scroll = view.drag_mut().tick();
    drag_response(view, scroll)
}

pub async fn drag_end(State(state): State<AppState>) -> Response {
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    let (drag, store) = view.drag_parts();
    match drag.commit(store) {
        Ok(Some(block)) => (StatusCode::CREATED, Json(block)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn drag_cancel(State(state): State<AppState>) -> Response {
    let mut guard = match provider_view(&state).await {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let Some(view) = guard.as_mut() else {
        return unavailable();
    };
    view.drag_mut().cancel();
    drag_response(view, None)
}

// --------------------------------------------------
// Discount configuration
// --------------------------------------------------

fn require_provider(state: &AppState) -> Option<Response> {
    match state.session.provider_id() {
        Some(_) => None,
        None => Some((StatusCode::FORBIDDEN, "provider sign-in required").into_response()),
    }
}

fn summary_response(result: crate::Result<DiscountConfig>) -> Response {
    match result {
        Ok(config) => Json(ConfigSummary::from(config)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn get_discount_config(State(state): State<AppState>) -> Response {
    if let Some(resp) = require_provider(&state) {
        return resp;
    }
    summary_response(discount::fetch_config(state.backend.as_ref()).await)
}

// Whole document
pub async fn put_discount_config(
    State(state): State<AppState>,
    Json(config): Json<DiscountConfig>,
) -> Response {
    if let Some(resp) = require_provider(&state) {
        return resp;
    }
    summary_response(discount::save_config(state.backend.as_ref(), &config).await)
}

#[derive(Debug, Deserialize)]
pub struct BoundaryEdit {
    pub tier: Tier,
    pub boundary: Boundary,
    pub yards: f64,
}

// One tier edge; the adjacent tier's shared edge follows
pub async fn patch_discount_boundary(
    State(state): State<AppState>,
    Json(edit): Json<BoundaryEdit>,
) -> Response {
    if let Some(resp) = require_provider(&state) {
        return resp;
    }
    let result = discount::edit_config(state.backend.as_ref(), |config| {
        discount::set_boundary(config, edit.tier, edit.boundary, edit.yards);
        Ok(())
    })
    .await;
    summary_response(result)
}

#[derive(Debug, Deserialize)]
pub struct PercentageEdit {
    pub tier: Tier,
    pub bucket: usize, // 1..=5
    pub percentage: i64,
}

pub async fn patch_discount_percentage(
    State(state): State<AppState>,
    Json(edit): Json<PercentageEdit>,
) -> Response {
    if let Some(resp) = require_provider(&state) {
        return resp;
    }
    let result = discount::edit_config(state.backend.as_ref(), |config| {
        discount::set_discount(config, edit.tier, edit.bucket, edit.percentage).map(|_| ())
    })
    .await;
    summary_response(result)
}

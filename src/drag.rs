/*
Drag-to-create gesture for provider availability.
Idle -> Dragging -> (Committing | Cancelled)
Nothing reaches the store until the pointer is released.
*/

use chrono::{Duration, FixedOffset, NaiveDate};
use serde::Serialize;

use crate::error::Result;
use crate::interval::{Interval, enforce_min_duration, local_time};
use crate::models::TimeBlock;
use crate::store::AvailabilityStore;

const MINUTES_PER_DAY: i64 = 24 * 60;
// Distance from the viewport edge used to sample the time while scrolling
const EDGE_SAMPLE_PX: f64 = 10.0;

// Pixel layout of a day column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragGeometry {
    pub hour_height: f64,
    pub working_hours_start: u32,
    pub snap_minutes: u32,
    pub min_block_minutes: i64,
    pub scroll_threshold: f64,
    pub scroll_step: f64,
}

impl Default for DragGeometry {
    fn default() -> Self {
        DragGeometry {
            hour_height: 70.0,
            working_hours_start: 5,
            snap_minutes: 5,
            min_block_minutes: 15,
            scroll_threshold: 60.0,
            scroll_step: 8.0,
        }
    }
}

impl DragGeometry {
    // Minutes since midnight under a pointer `y` px below the column top
    pub fn minutes_at(&self, y: f64) -> i64 {
        let raw = f64::from(self.working_hours_start) * 60.0 + y / self.hour_height * 60.0;
        let snap = f64::from(self.snap_minutes.max(1));
        let snapped = ((raw / snap).round() * snap) as i64;
        snapped.clamp(0, MINUTES_PER_DAY)
    }

    // Inverse of minutes_at, used to place segments
    pub fn offset_for(&self, minutes: i64) -> f64 {
        (minutes as f64 / 60.0 - f64::from(self.working_hours_start)) * self.hour_height
    }
}

// Visible part of the day column, in column pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct Viewport {
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AutoScroll {
    pub direction: ScrollDirection,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DragState {
    Idle,
    Dragging {
        day: NaiveDate,
        anchor: i64,
        current: i64,
        auto_scroll: Option<AutoScroll>,
    },
    Committing {
        day: NaiveDate,
        candidate: Interval,
    },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DragGesture {
    geometry: DragGeometry,
    offset: FixedOffset,
    state: DragState,
}

impl DragGesture {
    pub fn new(geometry: DragGeometry, offset: FixedOffset) -> Self {
        DragGesture {
            geometry,
            offset,
            state: DragState::Idle,
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn geometry(&self) -> &DragGeometry {
        &self.geometry
    }

    pub fn is_auto_scrolling(&self) -> bool {
        matches!(self.state, DragState::Dragging { auto_scroll: Some(_), .. })
    }

    // Pointer down inside `day`'s column; restarts any previous gesture
    pub fn start(&mut self, day: NaiveDate, y: f64) {
        let at = self.geometry.minutes_at(y);
        tracing::debug!(%day, minutes = at, "drag started");
        self.state = DragState::Dragging {
            day,
            anchor: at,
            current: at,
            auto_scroll: None,
        };
    }

    /// Track the pointer; near the viewport edges auto-scroll starts, back
    /// in the safe zone it stops.
    pub fn pointer_moved(&mut self, y: f64, viewport: Option<Viewport>) {
        let geometry = self.geometry;
        let DragState::Dragging { current, auto_scroll, .. } = &mut self.state else {
            return;
        };
        *current = geometry.minutes_at(y);

        *auto_scroll = viewport.and_then(|v| {
            let direction = if y < v.top + geometry.scroll_threshold {
                ScrollDirection::Up
            } else if y > v.bottom - geometry.scroll_threshold {
                ScrollDirection::Down
            } else {
                return None;
            };
            Some(AutoScroll { direction, viewport: v })
        });
    }

    /// One animation frame; returns the scroll delta in px, or None once
    /// there is nothing to scroll.
    pub fn tick(&mut self) -> Option<f64> {
        let geometry = self.geometry;
        let DragState::Dragging { current, auto_scroll, .. } = &mut self.state else {
            return None;
        };
        let scroll = auto_scroll.as_mut()?;

        let delta = match scroll.direction {
            ScrollDirection::Up => -geometry.scroll_step,
            ScrollDirection::Down => geometry.scroll_step,
        };
        scroll.viewport.top += delta;
        scroll.viewport.bottom += delta;

        let edge = match scroll.direction {
            ScrollDirection::Up => scroll.viewport.top + EDGE_SAMPLE_PX,
            ScrollDirection::Down => scroll.viewport.bottom - EDGE_SAMPLE_PX,
        };
        *current = geometry.minutes_at(edge);
        Some(delta)
    }

    // Block the gesture would create right now
    pub fn candidate(&self) -> Option<(NaiveDate, Interval)> {
        match &self.state {
            DragState::Dragging { day, anchor, current, .. } => {
                let (lo, hi) = if anchor <= current { (*anchor, *current) } else { (*current, *anchor) };
                let raw = Interval::new(
                    local_time(*day, lo, self.offset),
                    local_time(*day, hi, self.offset),
                );
                let min = Duration::minutes(self.geometry.min_block_minutes);
                Some((*day, enforce_min_duration(raw, min)))
            }
            DragState::Committing { day, candidate } => Some((*day, *candidate)),
            _ => None,
        }
    }

    /// Pointer up: add the candidate to the store.
    ///
    /// The gesture always ends back in Idle. Overlaps are reported and
    /// nothing is added.
    pub fn commit(&mut self, store: &mut AvailabilityStore) -> Result<Option<TimeBlock>> {
        let Some((day, candidate)) = self.candidate() else {
            self.state = DragState::Idle;
            return Ok(None);
        };
        self.state = DragState::Committing { day, candidate };

        let outcome = store.add_block(day, candidate.start, candidate.end);
        self.state = DragState::Idle;

        match &outcome {
            Ok(block) => tracing::info!(%day, block_id = %block.id, "drag committed"),
            Err(err) => tracing::debug!(%day, error = %err, "drag rejected"),
        }
        outcome.map(Some)
    }

    // Pointer left the grid or Escape
    pub fn cancel(&mut self) {
        if matches!(self.state, DragState::Dragging { .. }) {
            tracing::debug!("drag cancelled");
            self.state = DragState::Cancelled;
        }
    }
}

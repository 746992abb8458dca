// Error taxonomy for the availability and booking core.
// Local failures (validation, overlap) happen before any network call;
// remote failures leave local state intact for a retry.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;

/// Time range of an appointment that already holds the requested slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRange {
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
}

impl fmt::Display for ConflictRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start_time.format("%-I:%M %p"),
            self.end_time.format("%-I:%M %p")
        )
    }
}

pub(crate) fn conflict_message(conflicts: &[ConflictRange]) -> String {
    if conflicts.is_empty() {
        return "This time slot conflicts with an existing appointment. Please choose another time."
            .to_string();
    }
    let times: Vec<String> = conflicts.iter().map(ToString::to_string).collect();
    format!(
        "This time slot is already booked. Conflicting times: {}",
        times.join(", ")
    )
}

#[derive(Error, Debug)]
pub enum CalendarError {
    /// Field-level problem detected locally
    #[error("{0}")]
    Validation(String),

    /// Required booking fields left empty
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("time block {start} - {end} overlaps with existing availability on {day}")]
    Overlap {
        day: String,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },

    #[error("no time block {block_id} on {day}")]
    UnknownBlock { day: String, block_id: String },

    /// Backend rejected a booking because the slot was taken in the meantime
    #[error("{}", conflict_message(.0))]
    Conflict(Vec<ConflictRange>),

    #[error("failed to save availability: {0}")]
    Persist(String),

    #[error("{0}")]
    Submission(String),

    #[error("backend request failed: {0}")]
    Remote(#[from] ApiError),
}

impl CalendarError {
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            CalendarError::Validation(_)
                | CalendarError::MissingFields(_)
                | CalendarError::Overlap { .. }
                | CalendarError::UnknownBlock { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CalendarError>;

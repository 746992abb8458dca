// Core modules
pub mod models;     // Blocks, appointments, discount configuration, session user
pub mod interval;   // [start, end) math
pub mod store;      // Per-day availability with overlap rejection
pub mod discount;   // Proximity discount engine
pub mod booking;    // Booking drafts and submission
pub mod projection; // Hour-cell layout of blocks and appointments
pub mod drag;       // Drag-to-create gesture
pub mod calendar;   // Stateful calendar view with refresh()
pub mod session;    // Signed-in user context

// Plumbing
pub mod api;        // Backend API port + reqwest adapter
pub mod error;
pub mod config;
pub mod telemetry;

// Local HTTP surface
pub mod app;            // Shared state, router, error -> response
pub mod routes_calendar; // Session, provider calendar, drag, discount config
pub mod routes_booking;  // Service calendars, booking, status changes

pub use error::{CalendarError, Result};

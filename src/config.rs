/*
Settings: built-in defaults, then an optional slotbook.toml, then
SLOTBOOK_* environment variables (nested keys use "__", e.g.
SLOTBOOK_CALENDAR__DAYS_TO_SHOW=7). A .env file is read first.
*/

use std::ops::Range;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;

use crate::discount::DiscountEngine;
use crate::drag::DragGeometry;

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Base URL of the marketplace backend, including `/api`
    pub api_url: String,
    /// Token used when no user has signed in through the session
    #[serde(default)]
    pub api_token: Option<SecretString>,
    pub request_timeout_secs: u64,
    pub bind_addr: String,
    pub static_dir: String,
    pub log_filter: String,
    pub log_json: bool,
    pub calendar: CalendarSettings,
    pub discount: DiscountSettings,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct CalendarSettings {
    pub days_to_show: u32,
    pub working_hours_start: u32,
    pub working_hours_end: u32,
    pub min_block_minutes: i64,
    pub snap_minutes: u32,
    pub hour_height: f64,
    pub scroll_threshold: f64,
    pub scroll_step: f64,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        CalendarSettings {
            days_to_show: 5,
            working_hours_start: 5,
            working_hours_end: 23,
            min_block_minutes: 15,
            snap_minutes: 5,
            hour_height: 70.0,
            scroll_threshold: 60.0,
            scroll_step: 8.0,
        }
    }
}

impl CalendarSettings {
    pub fn hours(&self) -> Range<u32> {
        self.working_hours_start..self.working_hours_end
    }

    pub fn geometry(&self) -> DragGeometry {
        DragGeometry {
            hour_height: self.hour_height,
            working_hours_start: self.working_hours_start,
            snap_minutes: self.snap_minutes,
            min_block_minutes: self.min_block_minutes,
            scroll_threshold: self.scroll_threshold,
            scroll_step: self.scroll_step,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct DiscountSettings {
    pub yards_per_minute: f64,
}

impl DiscountSettings {
    pub fn engine(&self) -> DiscountEngine {
        DiscountEngine::new(self.yards_per_minute)
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.calendar;
        if c.working_hours_end > 24 || c.working_hours_start >= c.working_hours_end {
            return Err(ConfigError::Message(format!(
                "calendar working hours must satisfy start < end <= 24 (got {}..{})",
                c.working_hours_start, c.working_hours_end
            )));
        }
        if c.days_to_show < 1 {
            return Err(ConfigError::Message("calendar.days_to_show must be at least 1".into()));
        }
        if c.min_block_minutes < 1 || c.snap_minutes < 1 {
            return Err(ConfigError::Message(
                "calendar.min_block_minutes and calendar.snap_minutes must be at least 1".into(),
            ));
        }
        if c.hour_height <= 0.0 {
            return Err(ConfigError::Message("calendar.hour_height must be positive".into()));
        }
        if self.discount.yards_per_minute < 0.0 {
            return Err(ConfigError::Message("discount.yards_per_minute must not be negative".into()));
        }
        Ok(())
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let cal = CalendarSettings::default();
    Config::builder()
        .set_default("api_url", "http://localhost:8000/api")?
        .set_default("request_timeout_secs", 15)?
        .set_default("bind_addr", "127.0.0.1:3000")?
        .set_default("static_dir", "static")?
        .set_default("log_filter", "info")?
        .set_default("log_json", false)?
        .set_default("calendar.days_to_show", cal.days_to_show)?
        .set_default("calendar.working_hours_start", cal.working_hours_start)?
        .set_default("calendar.working_hours_end", cal.working_hours_end)?
        .set_default("calendar.min_block_minutes", cal.min_block_minutes)?
        .set_default("calendar.snap_minutes", cal.snap_minutes)?
        .set_default("calendar.hour_height", cal.hour_height)?
        .set_default("calendar.scroll_threshold", cal.scroll_threshold)?
        .set_default("calendar.scroll_step", cal.scroll_step)?
        .set_default("discount.yards_per_minute", 20.0)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Settings, ConfigError> {
    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

pub fn load() -> Result<Settings, ConfigError> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    let builder = defaults()?
        .add_source(File::with_name("slotbook").required(false))
        .add_source(
            Environment::with_prefix("SLOTBOOK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    finish(builder)
}

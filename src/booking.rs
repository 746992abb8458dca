/*
Booking coordinator.
Turns a selected slot plus contact form into an appointment on the backend,
or reports why it could not. The calendar that offered the slot is refreshed
afterwards, since only the backend knows what is still open.
*/

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::api::{ApiError, BackendApi, NewAppointment};
use crate::discount::DISCOUNT_REASON;
use crate::error::{CalendarError, Result};
use crate::models::{Appointment, AppointmentStatus, CurrentUser, TimeBlock};
use crate::session::SessionContext;

pub const GENERIC_BOOKING_ERROR: &str = "Failed to book appointment. Please try again.";
const COUNTRY: &str = "United States";

/// Something that can re-read its state from the backend.
#[async_trait]
pub trait Refresh: Send {
    async fn refresh(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum BookingEvent {
    Booked(Appointment),
}

// Contact and address fields of the booking form
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContactDetails {
    pub email: String,
    pub phone: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub notes: String,
}

impl ContactDetails {
    pub fn from_user(user: &CurrentUser) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let mut details = ContactDetails {
            email: text(&user.email),
            phone: text(&user.phone_number),
            address_line1: text(&user.street_address),
            address_line2: text(&user.apartment),
            city: text(&user.city),
            state: text(&user.state),
            zip_code: text(&user.zip_code),
            notes: String::new(),
        };

        if user.street_address.is_none() && user.city.is_none() {
            if let Some(legacy) = user.address.as_deref() {
                details.apply_legacy_address(legacy);
            }
        }
        details
    }

    // "street, [apt|suite|#...], city state zip", newline or comma separated
    fn apply_legacy_address(&mut self, address: &str) {
        let lines: Vec<&str> = address.split(['\n', ',']).map(str::trim).collect();

        if let Some(first) = lines.first() {
            self.address_line1 = first.to_string();
        }
        let Some(second) = lines.get(1) else {
            return;
        };

        let lower = second.to_lowercase();
        if lower.contains("apt") || lower.contains("suite") || lower.contains('#') {
            self.address_line2 = second.to_string();
            if let Some(third) = lines.get(2) {
                self.apply_city_state_zip(third);
            }
        } else {
            self.apply_city_state_zip(second);
        }
    }

    fn apply_city_state_zip(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        if let Some(city) = parts.next() {
            self.city = city.to_string();
        }
        if let Some(state) = parts.next() {
            self.state = state.to_string();
        }
        if let Some(zip) = parts.next() {
            self.zip_code = zip.to_string();
        }
    }

    /// Address lines, then "city, state, zip", skipping empty parts.
    pub fn combined_address(&self) -> String {
        let mut parts: Vec<String> = [&self.address_line1, &self.address_line2]
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();

        let locality: Vec<&str> = [&self.city, &self.state, &self.zip_code]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if !locality.is_empty() {
            parts.push(locality.join(", "));
        }
        parts.join("\n")
    }

    fn missing_fields(&self) -> Vec<String> {
        [
            (&self.email, "email"),
            (&self.phone, "phone"),
            (&self.address_line1, "street address"),
            (&self.city, "city"),
            (&self.state, "state"),
            (&self.zip_code, "ZIP code"),
        ]
        .into_iter()
        .filter(|(value, _)| value.trim().is_empty())
        .map(|(_, name)| name.to_string())
        .collect()
    }
}

/// Transient booking form state; dropped when the dialog closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingDraft {
    pub service_id: i64,
    pub slot: TimeBlock,
    #[serde(flatten)]
    pub contact: ContactDetails,
}

impl BookingDraft {
    pub fn new(service_id: i64, slot: TimeBlock) -> Self {
        BookingDraft {
            service_id,
            slot,
            contact: ContactDetails::default(),
        }
    }

    pub fn from_session(service_id: i64, slot: TimeBlock, session: &SessionContext) -> Self {
        let contact = session
            .user()
            .map(|u| ContactDetails::from_user(&u))
            .unwrap_or_default();
        BookingDraft {
            service_id,
            slot,
            contact,
        }
    }

    pub fn combined_address(&self) -> String {
        self.contact.combined_address()
    }
}

pub struct BookingCoordinator {
    backend: Arc<dyn BackendApi>,
    session: SessionContext,
    events: broadcast::Sender<BookingEvent>,
}

impl BookingCoordinator {
    pub fn new(backend: Arc<dyn BackendApi>, session: SessionContext) -> Self {
        let (events, _) = broadcast::channel(16);
        BookingCoordinator {
            backend,
            session,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    // Draft pre-filled from the signed-in user
    pub fn draft(&self, service_id: i64, slot: TimeBlock) -> BookingDraft {
        BookingDraft::from_session(service_id, slot, &self.session)
    }

    pub fn validate(&self, draft: &BookingDraft) -> Result<()> {
        if draft.slot.start >= draft.slot.end {
            return Err(CalendarError::Validation("End time must be after start time".into()));
        }
        let missing = draft.contact.missing_fields();
        if !missing.is_empty() {
            return Err(CalendarError::MissingFields(missing));
        }
        Ok(())
    }

    pub fn build_request(&self, draft: &BookingDraft) -> NewAppointment {
        let iso = |t: chrono::DateTime<chrono::FixedOffset>| {
            t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true)
        };
        let c = &draft.contact;

        let mut request = NewAppointment {
            service: draft.service_id,
            start_time: iso(draft.slot.start),
            end_time: iso(draft.slot.end),
            status: AppointmentStatus::Confirmed,
            notes: c.notes.clone(),
            client_email: c.email.trim().to_string(),
            client_phone: c.phone.trim().to_string(),
            address_line1: c.address_line1.clone(),
            address_line2: c.address_line2.clone(),
            city: c.city.clone(),
            state: c.state.clone(),
            zip_code: c.zip_code.clone(),
            country: COUNTRY.to_string(),
            address: c.combined_address(),
            original_price: None,
            discount_amount: None,
            final_price: None,
            discount_percentage: None,
            discount_reason: None,
        };

        // audit trail for discounted offers
        if let (Some(pct), Some(original), Some(discounted)) = (
            draft.slot.discount_percentage,
            draft.slot.original_price,
            draft.slot.discounted_price,
        ) {
            if draft.slot.has_discount() {
                request.original_price = Some(original);
                request.discount_amount = Some(original - discounted);
                request.final_price = Some(discounted);
                request.discount_percentage = Some(pct);
                request.discount_reason = Some(DISCOUNT_REASON.to_string());
            }
        }

        request
    }

    /// Validate, create the appointment, then refresh `target`.
    ///
    /// A conflict is reported as [`CalendarError::Conflict`] and never
    /// retried. Refresh failures after the call are logged and dropped.
    pub async fn submit(&self, draft: &BookingDraft, target: &mut dyn Refresh) -> Result<Appointment> {
        self.validate(draft)?;
        let request = self.build_request(draft);

        let outcome = match self.backend.create_appointment(&request).await {
            Ok(appointment) => {
                tracing::info!(
                    appointment_id = appointment.id,
                    service_id = draft.service_id,
                    discount = request.discount_percentage.unwrap_or(0),
                    "appointment booked"
                );
                let _ = self.events.send(BookingEvent::Booked(appointment.clone()));
                Ok(appointment)
            }
            Err(ApiError::Conflict { conflicts }) => {
                tracing::info!(
                    service_id = draft.service_id,
                    conflicts = conflicts.len(),
                    "slot was taken before booking landed"
                );
                Err(CalendarError::Conflict(conflicts))
            }
            Err(err) => {
                tracing::warn!(service_id = draft.service_id, error = %err, "booking failed");
                let message = err
                    .server_message()
                    .map(str::to_owned)
                    .unwrap_or_else(|| GENERIC_BOOKING_ERROR.to_string());
                return Err(CalendarError::Submission(message));
            }
        };

        if let Err(err) = target.refresh().await {
            tracing::warn!(error = %err, "refresh after booking failed");
        }
        outcome
    }
}

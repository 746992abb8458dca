// --------------------------------------------------
// Calendar view: stateful calendar for one provider
// (editing availability) or one service (booking).
//
// Holds the availability store, the cached appointment
// lists and the drag gesture. Booking and status changes
// pull fresh server state through Refresh.
// --------------------------------------------------

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, FixedOffset, NaiveDate};

use crate::api::BackendApi;
use crate::booking::Refresh;
use crate::config::CalendarSettings;
use crate::discount::DiscountEngine;
use crate::drag::DragGesture;
use crate::error::{CalendarError, Result};
use crate::models::{Appointment, AppointmentStatus, DayAvailability, DiscountConfig, Service, TimeBlock, day_key};
use crate::projection::{CalendarMode, DayProjection, merge_appointments, project_day};
use crate::session::SessionContext;
use crate::store::AvailabilityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Provider { provider_id: i64 },
    Consumer { service_id: i64 },
}

impl ViewMode {
    pub fn projection_mode(&self) -> CalendarMode {
        match self {
            ViewMode::Provider { .. } => CalendarMode::Provider,
            ViewMode::Consumer { .. } => CalendarMode::Consumer,
        }
    }
}

// Slot ids are only unique per day on the backend
fn consumer_slot_id(day: &str, block_id: &str, index: usize) -> String {
    format!("{day}-{block_id}-{index}")
}

pub struct CalendarView {
    backend: Arc<dyn BackendApi>,
    session: SessionContext,
    mode: ViewMode,
    settings: CalendarSettings,
    offset: FixedOffset,
    first_day: NaiveDate,
    store: AvailabilityStore,
    // provider's bookings (provider mode)
    appointments: Vec<Appointment>,
    // signed-in user's own bookings (consumer mode)
    user_appointments: Vec<Appointment>,
    service: Option<Service>,
    engine: DiscountEngine,
    discount_config: DiscountConfig,
    drag: DragGesture,
}

impl CalendarView {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        session: SessionContext,
        mode: ViewMode,
        settings: CalendarSettings,
        offset: FixedOffset,
        first_day: NaiveDate,
    ) -> Self {
        let mut view = CalendarView {
            backend,
            session,
            mode,
            settings,
            offset,
            first_day,
            store: AvailabilityStore::new(),
            appointments: Vec::new(),
            user_appointments: Vec::new(),
            service: None,
            engine: DiscountEngine::default(),
            discount_config: DiscountConfig::default(),
            drag: DragGesture::new(settings.geometry(), offset),
        };
        view.store.ensure_days(view.days());
        view
    }

    pub fn with_engine(mut self, engine: DiscountEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    // Visible range: first_day and the following days_to_show - 1 days
    pub fn days(&self) -> Vec<NaiveDate> {
        (0..i64::from(self.settings.days_to_show))
            .map(|i| self.first_day + Duration::days(i))
            .collect()
    }

    pub fn store(&self) -> &AvailabilityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AvailabilityStore {
        &mut self.store
    }

    pub fn drag(&self) -> &DragGesture {
        &self.drag
    }

    pub fn drag_mut(&mut self) -> &mut DragGesture {
        &mut self.drag
    }

    // Gesture and store together, for committing a drag
    pub fn drag_parts(&mut self) -> (&mut DragGesture, &mut AvailabilityStore) {
        (&mut self.drag, &mut self.store)
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        merge_appointments(&self.appointments, &self.user_appointments)
    }

    pub fn find_slot(&self, slot_id: &str) -> Option<TimeBlock> {
        self.store.find_block(slot_id).map(|(_, b)| b.clone())
    }

    pub fn cells(&self, day: NaiveDate) -> DayProjection {
        project_day(
            day,
            self.settings.hours(),
            self.offset,
            self.store.blocks(day),
            &self.appointments(),
            self.mode.projection_mode(),
        )
    }

    fn provider_id(&self) -> Result<i64> {
        match self.mode {
            ViewMode::Provider { provider_id } => Ok(provider_id),
            ViewMode::Consumer { .. } => Err(CalendarError::Validation(
                "only a provider calendar can change availability".into(),
            )),
        }
    }

    pub async fn persist(&mut self) -> Result<()> {
        let provider_id = self.provider_id()?;
        self.store.persist(self.backend.as_ref(), provider_id).await
    }

    // -----------------------------
    // Fetching
    // -----------------------------

    async fn refresh_availability(&mut self) -> Result<bool> {
        let remote = match self.mode {
            ViewMode::Provider { provider_id } => self.backend.provider_availability(provider_id).await?,
            ViewMode::Consumer { service_id } => {
                let service = self.backend.service(service_id).await?;
                let raw = self.backend.service_availability_with_discount(service_id).await?;
                let priced = self.price_slots(&service, raw);
                self.service = Some(service);
                priced
            }
        };
        let changed = self.store.reconcile_from_remote(&remote);
        tracing::debug!(mode = ?self.mode, days = remote.len(), changed, "availability refreshed");
        Ok(changed)
    }

    /// Give each open slot a per-day unique id and make sure it carries
    /// pricing; slots the backend did not price go through the local engine.
    ///
    /// Every visible day is present in the result, so slots that vanished
    /// on the server also vanish here.
    fn price_slots(&self, service: &Service, raw: DayAvailability) -> DayAvailability {
        let booked = self.appointments();
        let mut priced: DayAvailability = self
            .days()
            .into_iter()
            .map(|d| (day_key(d), Vec::new()))
            .collect();

        for (day, blocks) in raw {
            let slots = blocks
                .into_iter()
                .enumerate()
                .map(|(i, block)| {
                    let mut slot = TimeBlock {
                        id: consumer_slot_id(&day, &block.id, i),
                        ..block
                    };
                    match slot.original_price {
                        Some(original) => {
                            slot.discount_percentage.get_or_insert(0);
                            slot.discounted_price.get_or_insert(original);
                            slot
                        }
                        None => self.engine.annotate(&slot, service.price, &self.discount_config, &booked),
                    }
                })
                .collect();
            priced.insert(day, slots);
        }
        priced
    }

    async fn refresh_appointments(&mut self) -> Result<()> {
        match self.mode {
            ViewMode::Provider { provider_id } => {
                let scope = crate::session::AppointmentScope::Provider(provider_id);
                self.appointments = self.backend.appointments(scope).await?;
            }
            ViewMode::Consumer { .. } => {
                if !self.session.is_signed_in() {
                    tracing::debug!("no signed-in user, skipping appointment fetch");
                    return Ok(());
                }
                let fetched = self.backend.appointments(self.session.appointment_scope()).await?;
                // status or time changes count, not only added/removed ids
                if self.user_appointments != fetched {
                    tracing::debug!(count = fetched.len(), "user appointments changed");
                    self.user_appointments = fetched;
                }
            }
        }
        Ok(())
    }

    // -----------------------------
    // Status changes
    // -----------------------------

    /// Move an appointment to `status`, then refresh in the background.
    ///
    /// A booking calendar can only cancel the user's own appointments.
    pub async fn change_status(&mut self, appointment_id: i64, status: AppointmentStatus) -> Result<()> {
        if matches!(self.mode, ViewMode::Consumer { .. }) && status != AppointmentStatus::Cancelled {
            return Err(CalendarError::Validation(format!(
                "only the provider can mark an appointment as {status}"
            )));
        }

        let current = self
            .appointments()
            .into_iter()
            .find(|a| a.id == appointment_id)
            .map(|a| a.status)
            .ok_or_else(|| CalendarError::Validation(format!("unknown appointment {appointment_id}")))?;

        if !current.can_transition_to(status) {
            return Err(CalendarError::Validation(format!(
                "cannot change appointment from {current} to {status}"
            )));
        }

        self.backend
            .update_appointment_status(appointment_id, status)
            .await
            .map_err(|e| {
                CalendarError::Submission(e.server_message().map(str::to_owned).unwrap_or_else(|| {
                    format!("Failed to update appointment status to {status}. Please try again.")
                }))
            })?;
        tracing::info!(appointment_id, %status, "appointment status changed");

        // best effort from here on
        if let Err(err) = self.refresh_appointments().await {
            tracing::warn!(error = %err, "appointment refresh after status change failed");
        }
        if status == AppointmentStatus::Cancelled {
            if let Err(err) = self.refresh_availability().await {
                tracing::warn!(error = %err, "availability refresh after cancellation failed");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Refresh for CalendarView {
    // Appointments first: local slot pricing depends on them
    async fn refresh(&mut self) -> Result<()> {
        self.refresh_appointments().await?;
        self.refresh_availability().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockBackendApi};
    use crate::models::{ServiceRef, UserType};
    use crate::projection::Segment;
    use crate::session::{AppointmentScope, test_user};
    use chrono::{DateTime, TimeZone};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        utc().with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn appt(id: i64, status: AppointmentStatus) -> Appointment {
        Appointment {
            id,
            service: ServiceRef { id: 3, name: None },
            consumer: None,
            start_time: at(13, 0),
            end_time: at(14, 0),
            status,
            notes: None,
            client_email: None,
            client_phone: None,
            address_line1: None,
            address_line2: None,
            city: None,
            state: None,
            zip_code: None,
            created_at: None,
        }
    }

    fn view(mock: MockBackendApi, mode: ViewMode, session: SessionContext) -> CalendarView {
        CalendarView::new(Arc::new(mock), session, mode, CalendarSettings::default(), utc(), day())
    }

    fn service() -> Service {
        Service { id: 3, name: "Lawn care".into(), price: 100.0, provider: Some(4), duration: Some(60) }
    }

    #[test]
    fn visible_days_have_entries() {
        let v = view(MockBackendApi::new(), ViewMode::Provider { provider_id: 4 }, SessionContext::new());
        assert_eq!(v.days().len(), 5);
        assert_eq!(v.store().days().len(), 5);
        assert!(v.store().days().contains_key("2026-03-06"));
    }

    #[tokio::test]
    async fn consumer_refresh_ids_and_prices_slots() {
        let session = SessionContext::new();
        session.login("tok".into(), test_user(UserType::Consumer));

        let mut mock = MockBackendApi::new();
        mock.expect_service().returning(|_| Ok(service()));
        mock.expect_service_availability_with_discount().returning(|_| {
            let mut days = DayAvailability::new();
            let mut offered = TimeBlock::new("7", at(14, 0), at(15, 0));
            offered.original_price = Some(100.0);
            offered.discount_percentage = Some(15);
            offered.discounted_price = Some(85.0);
            days.insert("2026-03-02".into(), vec![offered, TimeBlock::new("8", at(16, 0), at(17, 0))]);
            Ok(days)
        });
        mock.expect_appointments()
            .withf(|scope| *scope == AppointmentScope::Consumer(11))
            .returning(|_| Ok(vec![appt(1, AppointmentStatus::Confirmed)]));

        let mut v = view(mock, ViewMode::Consumer { service_id: 3 }, session);
        v.refresh().await.unwrap();

        let slots = v.store().blocks(day());
        assert_eq!(slots[0].id, "2026-03-02-7-0");
        assert_eq!(slots[0].discounted_price, Some(85.0));
        // priced locally: 2h after the user's 13:00-14:00 booking -> 2400 yd, tier4
        assert_eq!(slots[1].id, "2026-03-02-8-1");
        assert_eq!(slots[1].original_price, Some(100.0));
        assert_eq!(slots[1].discount_percentage, Some(5));
        assert_eq!(v.appointments().len(), 1);
        assert!(v.find_slot("2026-03-02-7-0").is_some());
    }

    #[tokio::test]
    async fn first_refresh_prices_against_user_bookings() {
        let session = SessionContext::new();
        session.login("tok".into(), test_user(UserType::Consumer));

        let mut mock = MockBackendApi::new();
        mock.expect_service().returning(|_| Ok(service()));
        mock.expect_service_availability_with_discount().returning(|_| {
            let mut days = DayAvailability::new();
            days.insert("2026-03-02".into(), vec![TimeBlock::new("8", at(14, 0), at(15, 0))]);
            Ok(days)
        });
        mock.expect_appointments()
            .returning(|_| Ok(vec![appt(1, AppointmentStatus::Confirmed)]));

        let mut v = view(mock, ViewMode::Consumer { service_id: 3 }, session);
        v.refresh().await.unwrap();

        // touches the 13:00-14:00 booking: tier1, one appointment
        let slot = &v.store().blocks(day())[0];
        assert_eq!(slot.discount_percentage, Some(15));
        assert_eq!(slot.discounted_price, Some(85.0));
    }

    #[tokio::test]
    async fn consumer_cancel_frees_the_time() {
        let session = SessionContext::new();
        session.login("tok".into(), test_user(UserType::Consumer));

        let mut mock = MockBackendApi::new();
        mock.expect_update_appointment_status()
            .withf(|id, status| *id == 1 && *status == AppointmentStatus::Cancelled)
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_appointments()
            .returning(|_| Ok(vec![appt(1, AppointmentStatus::Cancelled)]));
        mock.expect_service().returning(|_| Ok(service()));
        mock.expect_service_availability_with_discount().returning(|_| {
            let mut days = DayAvailability::new();
            days.insert("2026-03-02".into(), vec![TimeBlock::new("9", at(13, 0), at(14, 0))]);
            Ok(days)
        });

        let mut v = view(mock, ViewMode::Consumer { service_id: 3 }, session);
        v.user_appointments = vec![appt(1, AppointmentStatus::Confirmed)];

        v.change_status(1, AppointmentStatus::Cancelled).await.unwrap();
        assert_eq!(v.appointments()[0].status, AppointmentStatus::Cancelled);

        let cells = v.cells(day());
        let one_pm = cells.cells.iter().find(|c| c.hour == 13).unwrap();
        assert_eq!(one_pm.segments.len(), 1);
        assert!(matches!(
            &one_pm.segments[0],
            Segment::Availability { start, end, .. } if *start == at(13, 0) && *end == at(14, 0)
        ));

        // already cancelled: rejected before the network
        let err = v.change_status(1, AppointmentStatus::Cancelled).await.unwrap_err();
        assert!(err.is_local());
    }

    #[tokio::test]
    async fn consumer_can_only_cancel() {
        let mut mock = MockBackendApi::new();
        mock.expect_update_appointment_status().never();
        let mut v = view(mock, ViewMode::Consumer { service_id: 3 }, SessionContext::new());
        v.user_appointments = vec![appt(1, AppointmentStatus::Pending)];

        for status in [AppointmentStatus::Confirmed, AppointmentStatus::Completed] {
            let err = v.change_status(1, status).await.unwrap_err();
            assert!(matches!(err, CalendarError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn terminal_status_is_rejected_locally() {
        let mut mock = MockBackendApi::new();
        mock.expect_update_appointment_status().never();
        let mut v = view(mock, ViewMode::Provider { provider_id: 4 }, SessionContext::new());
        v.appointments = vec![appt(1, AppointmentStatus::Completed)];

        let err = v.change_status(1, AppointmentStatus::Cancelled).await.unwrap_err();
        assert!(err.is_local());
        let err = v.change_status(99, AppointmentStatus::Cancelled).await.unwrap_err();
        assert!(err.is_local());
    }

    #[tokio::test]
    async fn cancellation_refresh_failures_are_swallowed() {
        let mut mock = MockBackendApi::new();
        mock.expect_update_appointment_status()
            .withf(|id, status| *id == 1 && *status == AppointmentStatus::Cancelled)
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_appointments()
            .returning(|_| Err(ApiError::Status { status: 503, message: None }));
        mock.expect_provider_availability()
            .times(1)
            .returning(|_| Err(ApiError::Status { status: 503, message: None }));

        let mut v = view(mock, ViewMode::Provider { provider_id: 4 }, SessionContext::new());
        v.appointments = vec![appt(1, AppointmentStatus::Confirmed)];
        v.change_status(1, AppointmentStatus::Cancelled).await.unwrap();
    }

    #[tokio::test]
    async fn status_failure_surfaces_message() {
        let mut mock = MockBackendApi::new();
        mock.expect_update_appointment_status()
            .returning(|_, _| Err(ApiError::Status { status: 500, message: None }));
        let mut v = view(mock, ViewMode::Provider { provider_id: 4 }, SessionContext::new());
        v.appointments = vec![appt(1, AppointmentStatus::Pending)];

        let err = v.change_status(1, AppointmentStatus::Confirmed).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to update appointment status to confirmed. Please try again."
        );
    }

    #[tokio::test]
    async fn consumer_view_cannot_persist() {
        let mut v = view(MockBackendApi::new(), ViewMode::Consumer { service_id: 3 }, SessionContext::new());
        assert!(matches!(v.persist().await, Err(CalendarError::Validation(_))));
    }
}

/*
Calendar projection.
Turns blocks + appointments into per-day, per-hour renderable segments.
Pure functions; the stateful view lives in calendar.rs.
*/

use std::collections::HashSet;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use serde::Serialize;

use crate::interval::{Interval, local_time, overlaps, split_around_busy};
use crate::models::{Appointment, AppointmentStatus, TimeBlock, day_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarMode {
    Provider,
    Consumer,
}

// Render order inside a cell: availability below appointments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Availability,
    Appointment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    Edit,
    Delete,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Availability {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        block_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_price: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        discount_percentage: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        discounted_price: Option<f64>,
        affordances: Vec<Affordance>,
    },
    Appointment {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        appointment_id: i64,
        status: AppointmentStatus,
        service_name: Option<String>,
        consumer_name: Option<String>,
    },
}

impl Segment {
    pub fn layer(&self) -> Layer {
        match self {
            Segment::Availability { .. } => Layer::Availability,
            Segment::Appointment { .. } => Layer::Appointment,
        }
    }

    pub fn interval(&self) -> Interval {
        match self {
            Segment::Availability { start, end, .. } | Segment::Appointment { start, end, .. } => {
                Interval::new(*start, *end)
            }
        }
    }

    fn availability(piece: Interval, block: &TimeBlock, affordances: Vec<Affordance>) -> Self {
        Segment::Availability {
            start: piece.start,
            end: piece.end,
            block_id: block.id.clone(),
            original_price: block.original_price,
            discount_percentage: block.discount_percentage,
            discounted_price: block.discounted_price,
            affordances,
        }
    }

    fn appointment(a: &Appointment) -> Self {
        Segment::Appointment {
            start: a.start_time,
            end: a.end_time,
            appointment_id: a.id,
            status: a.status,
            service_name: a.service.name.clone(),
            consumer_name: a.consumer.as_ref().and_then(|c| c.name.clone()),
        }
    }
}

// One hour of one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourCell {
    pub hour: u32,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayProjection {
    pub day: String,
    pub cells: Vec<HourCell>,
}

// Provider appointments first, then the user's own ones not already listed
pub fn merge_appointments(primary: &[Appointment], extra: &[Appointment]) -> Vec<Appointment> {
    let mut seen: HashSet<i64> = primary.iter().map(|a| a.id).collect();
    let mut merged = primary.to_vec();
    for a in extra {
        if seen.insert(a.id) {
            merged.push(a.clone());
        }
    }
    merged
}

// Appointments starting on `day` in the calendar's offset
pub fn appointments_on(day: NaiveDate, offset: FixedOffset, appointments: &[Appointment]) -> Vec<Appointment> {
    appointments
        .iter()
        .filter(|a| a.start_time.with_timezone(&offset).date_naive() == day)
        .cloned()
        .collect()
}

fn affordances(mode: CalendarMode, undivided: bool) -> Vec<Affordance> {
    match mode {
        CalendarMode::Provider => vec![Affordance::Edit, Affordance::Delete],
        CalendarMode::Consumer if undivided => vec![Affordance::Select],
        CalendarMode::Consumer => Vec::new(),
    }
}

// Build the segments of a single hour cell.
//
// Rules:
// - Each block overlapping the hour is split around busy appointments
// - Free pieces are kept whole if they overlap the hour
// - Cancelled appointments neither block time nor render
// - Segments ordered by layer, then start
pub fn project_cell(
    day: NaiveDate,
    hour: u32,
    offset: FixedOffset,
    blocks: &[TimeBlock],
    appointments: &[Appointment],
    mode: CalendarMode,
) -> HourCell {
    let start = local_time(day, i64::from(hour) * 60, offset);
    let cell = Interval::new(start, start + Duration::hours(1));

    let busy: Vec<Interval> = appointments
        .iter()
        .filter(|a| a.status.occupies_time())
        .map(Appointment::interval)
        .collect();

    let mut segments: Vec<Segment> = Vec::new();

    for block in blocks {
        let whole = block.interval();
        if !overlaps(&whole, &cell) {
            continue;
        }
        for piece in split_around_busy(&whole, &busy) {
            if overlaps(&piece, &cell) {
                segments.push(Segment::availability(piece, block, affordances(mode, piece == whole)));
            }
        }
    }

    segments.extend(
        appointments
            .iter()
            .filter(|a| a.status.occupies_time() && overlaps(&a.interval(), &cell))
            .map(Segment::appointment),
    );

    segments.sort_by_key(|s| (s.layer(), s.interval().start));

    HourCell {
        hour,
        start: cell.start,
        end: cell.end,
        segments,
    }
}

pub fn project_day(
    day: NaiveDate,
    hours: std::ops::Range<u32>,
    offset: FixedOffset,
    blocks: &[TimeBlock],
    appointments: &[Appointment],
    mode: CalendarMode,
) -> DayProjection {
    let todays = appointments_on(day, offset, appointments);
    DayProjection {
        day: day_key(day),
        cells: hours
            .map(|hour| project_cell(day, hour, offset, blocks, &todays, mode))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsumerRef, ServiceRef};
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        utc().with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn appt(id: i64, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>, status: AppointmentStatus) -> Appointment {
        Appointment {
            id,
            service: ServiceRef { id: 3, name: Some("Lawn care".into()) },
            consumer: Some(ConsumerRef { id: 9, name: Some("pat".into()) }),
            start_time: start,
            end_time: end,
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

    fn spans(cell: &HourCell) -> Vec<(Layer, DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        cell.segments
            .iter()
            .map(|s| (s.layer(), s.interval().start, s.interval().end))
            .collect()
    }

    #[test]
    fn block_without_bookings_is_one_segment() {
        let blocks = [TimeBlock::new("b1", at(9, 0), at(12, 0))];
        let cell = project_cell(day(), 10, utc(), &blocks, &[], CalendarMode::Provider);
        assert_eq!(spans(&cell), vec![(Layer::Availability, at(9, 0), at(12, 0))]);
        match &cell.segments[0] {
            Segment::Availability { affordances, .. } => {
                assert_eq!(affordances, &vec![Affordance::Edit, Affordance::Delete])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn booking_splits_block_and_renders_on_top() {
        let blocks = [TimeBlock::new("b1", at(9, 0), at(12, 0))];
        let booked = [appt(1, at(10, 15), at(10, 45), AppointmentStatus::Confirmed)];
        let cell = project_cell(day(), 10, utc(), &blocks, &booked, CalendarMode::Consumer);
        assert_eq!(
            spans(&cell),
            vec![
                (Layer::Availability, at(9, 0), at(10, 15)),
                (Layer::Availability, at(10, 45), at(12, 0)),
                (Layer::Appointment, at(10, 15), at(10, 45)),
            ]
        );
        // split remnants are not offered for selection
        for s in &cell.segments {
            if let Segment::Availability { affordances, .. } = s {
                assert!(affordances.is_empty());
            }
        }
    }

    #[test]
    fn undivided_consumer_slot_is_selectable() {
        let blocks = [TimeBlock::new("s1", at(14, 0), at(15, 0))];
        let cell = project_cell(day(), 14, utc(), &blocks, &[], CalendarMode::Consumer);
        match &cell.segments[0] {
            Segment::Availability { affordances, .. } => assert_eq!(affordances, &vec![Affordance::Select]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_appointments_do_not_block() {
        let blocks = [TimeBlock::new("b1", at(9, 0), at(10, 0))];
        let booked = [appt(1, at(9, 0), at(10, 0), AppointmentStatus::Cancelled)];
        let cell = project_cell(day(), 9, utc(), &blocks, &booked, CalendarMode::Provider);
        assert_eq!(spans(&cell), vec![(Layer::Availability, at(9, 0), at(10, 0))]);
    }

    #[test]
    fn pieces_outside_the_hour_are_dropped() {
        let blocks = [TimeBlock::new("b1", at(9, 0), at(12, 0))];
        let booked = [appt(1, at(9, 30), at(11, 0), AppointmentStatus::Pending)];
        let cell = project_cell(day(), 11, utc(), &blocks, &booked, CalendarMode::Provider);
        assert_eq!(spans(&cell), vec![(Layer::Availability, at(11, 0), at(12, 0))]);
    }

    #[test]
    fn merge_dedupes_by_id() {
        let a = appt(1, at(9, 0), at(10, 0), AppointmentStatus::Confirmed);
        let b = appt(2, at(11, 0), at(12, 0), AppointmentStatus::Confirmed);
        let merged = merge_appointments(&[a.clone()], &[a.clone(), b.clone()]);
        assert_eq!(merged.iter().map(|x| x.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn day_projection_covers_working_hours() {
        let blocks = [TimeBlock::new("b1", at(9, 0), at(10, 0))];
        let other_day = appt(
            5,
            utc().with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
            utc().with_ymd_and_hms(2026, 3, 3, 10, 0, 0).unwrap(),
            AppointmentStatus::Confirmed,
        );
        let p = project_day(day(), 5..23, utc(), &blocks, &[other_day], CalendarMode::Provider);
        assert_eq!(p.day, "2026-03-02");
        assert_eq!(p.cells.len(), 18);
        let nine = &p.cells[4];
        assert_eq!(nine.hour, 9);
        assert_eq!(nine.segments.len(), 1);
    }
}

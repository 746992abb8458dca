// --------------------------------------------------
// Availability store: local mirror of one provider's
// per-day time blocks.
//
// Responsibilities:
// - Add / edit / delete blocks with overlap rejection
// - Reconcile fetched availability with local state
// - Persist the whole day -> blocks mapping in one call
// --------------------------------------------------

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::{AvailabilityPayload, BackendApi, BlockPayload};
use crate::error::{CalendarError, Result};
use crate::interval::{Interval, overlaps};
use crate::models::{DayAvailability, TimeBlock, day_key};

const EVENT_CAPACITY: usize = 64;

// Lifecycle of a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Draft,
    Validated,
    Persisted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    DayChanged { day: String, blocks: Vec<TimeBlock> },
    Reconciled { days: Vec<String> },
    Persisted,
}

/// Merge fetched availability into local state.
///
/// Remote wins for every day it mentions; days it does not mention are kept.
/// `changed` is false when nothing differed, so callers can skip notifying.
pub fn reconcile(local: &DayAvailability, remote: &DayAvailability) -> (DayAvailability, bool) {
    let mut merged = local.clone();
    let mut changed = false;

    for (day, remote_blocks) in remote {
        let mut remote_blocks = remote_blocks.clone();
        remote_blocks.sort_by_key(|b| b.start);

        let differs = match merged.get(day) {
            Some(local_blocks) => *local_blocks != remote_blocks,
            None => true,
        };
        if differs {
            merged.insert(day.clone(), remote_blocks);
            changed = true;
        }
    }

    (merged, changed)
}

pub struct AvailabilityStore {
    days: DayAvailability,
    states: HashMap<String, BlockState>,
    // state a block had before an edit started
    edit_origin: HashMap<String, BlockState>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for AvailabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        AvailabilityStore {
            days: DayAvailability::new(),
            states: HashMap::new(),
            edit_origin: HashMap::new(),
            events,
        }
    }

    // Store with an empty entry for each visible day
    pub fn with_days(days: impl IntoIterator<Item = NaiveDate>) -> Self {
        let mut store = Self::new();
        store.ensure_days(days);
        store
    }

    pub fn ensure_days(&mut self, days: impl IntoIterator<Item = NaiveDate>) {
        for day in days {
            self.days.entry(day_key(day)).or_default();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn days(&self) -> &DayAvailability {
        &self.days
    }

    pub fn blocks(&self, day: NaiveDate) -> &[TimeBlock] {
        self.days.get(&day_key(day)).map(Vec::as_slice).unwrap_or(&[])
    }

    // Day key and block for an id, searching every day
    pub fn find_block(&self, block_id: &str) -> Option<(&str, &TimeBlock)> {
        self.days.iter().find_map(|(day, blocks)| {
            blocks
                .iter()
                .find(|b| b.id == block_id)
                .map(|b| (day.as_str(), b))
        })
    }

    pub fn block_state(&self, block_id: &str) -> Option<BlockState> {
        self.states.get(block_id).copied()
    }

    fn validate(
        day: NaiveDate,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<()> {
        if start >= end {
            return Err(CalendarError::Validation("End time must be after start time".into()));
        }
        if start.date_naive() != day {
            return Err(CalendarError::Validation(format!(
                "Time block must start on {}",
                day_key(day)
            )));
        }
        Ok(())
    }

    fn check_overlap(
        &self,
        day: NaiveDate,
        candidate: &Interval,
        ignore_id: Option<&str>,
    ) -> Result<()> {
        let clash = self
            .blocks(day)
            .iter()
            .filter(|b| Some(b.id.as_str()) != ignore_id)
            .any(|b| overlaps(&b.interval(), candidate));
        if clash {
            return Err(CalendarError::Overlap {
                day: day_key(day),
                start: candidate.start,
                end: candidate.end,
            });
        }
        Ok(())
    }

    fn notify_day(&self, key: &str) {
        let blocks = self.days.get(key).cloned().unwrap_or_default();
        // no subscribers is fine
        let _ = self.events.send(StoreEvent::DayChanged {
            day: key.to_string(),
            blocks,
        });
    }

    pub fn add_block(
        &mut self,
        day: NaiveDate,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<TimeBlock> {
        Self::validate(day, start, end)?;
        self.check_overlap(day, &Interval::new(start, end), None)?;

        let block = TimeBlock::new(format!("block-{}", Uuid::new_v4()), start, end);
        let key = day_key(day);
        let blocks = self.days.entry(key.clone()).or_default();
        blocks.push(block.clone());
        blocks.sort_by_key(|b| b.start);
        self.states.insert(block.id.clone(), BlockState::Validated);

        tracing::debug!(day = %key, block_id = %block.id, "availability block added");
        self.notify_day(&key);
        Ok(block)
    }

    // Block goes back to Draft while it is being edited
    pub fn begin_edit(&mut self, block_id: &str) -> Option<BlockState> {
        let state = self.states.get_mut(block_id)?;
        if *state != BlockState::Draft {
            self.edit_origin.insert(block_id.to_string(), *state);
            *state = BlockState::Draft;
        }
        Some(BlockState::Draft)
    }

    pub fn cancel_edit(&mut self, block_id: &str) -> Option<BlockState> {
        let origin = self.edit_origin.remove(block_id)?;
        self.states.insert(block_id.to_string(), origin);
        Some(origin)
    }

    pub fn edit_block(
        &mut self,
        day: NaiveDate,
        block_id: &str,
        new_start: DateTime<FixedOffset>,
        new_end: DateTime<FixedOffset>,
    ) -> Result<TimeBlock> {
        Self::validate(day, new_start, new_end)?;

        let key = day_key(day);
        if !self.blocks(day).iter().any(|b| b.id == block_id) {
            return Err(CalendarError::UnknownBlock {
                day: key,
                block_id: block_id.to_string(),
            });
        }
        self.check_overlap(day, &Interval::new(new_start, new_end), Some(block_id))?;

        let blocks = self.days.entry(key.clone()).or_default();
        let Some(block) = blocks.iter_mut().find(|b| b.id == block_id) else {
            return Err(CalendarError::UnknownBlock {
                day: key,
                block_id: block_id.to_string(),
            });
        };
        block.start = new_start;
        block.end = new_end;
        let updated = block.clone();
        blocks.sort_by_key(|b| b.start);

        self.edit_origin.remove(block_id);
        self.states.insert(block_id.to_string(), BlockState::Validated);

        tracing::debug!(day = %key, block_id, "availability block edited");
        self.notify_day(&key);
        Ok(updated)
    }

    // Idempotent: deleting an absent block is a no-op
    pub fn delete_block(&mut self, day: NaiveDate, block_id: &str) -> bool {
        let key = day_key(day);
        let Some(blocks) = self.days.get_mut(&key) else {
            return false;
        };
        let before = blocks.len();
        blocks.retain(|b| b.id != block_id);
        if blocks.len() == before {
            return false;
        }

        self.states.remove(block_id);
        self.edit_origin.remove(block_id);
        tracing::debug!(day = %key, block_id, "availability block deleted");
        self.notify_day(&key);
        true
    }

    /// Apply fetched availability; returns whether anything changed.
    pub fn reconcile_from_remote(&mut self, remote: &DayAvailability) -> bool {
        let (merged, changed) = reconcile(&self.days, remote);
        if !changed {
            return false;
        }

        let touched: Vec<String> = remote
            .keys()
            .filter(|day| self.days.get(*day) != merged.get(*day))
            .cloned()
            .collect();
        self.days = merged;
        for day in &touched {
            for block in &self.days[day] {
                self.states.insert(block.id.clone(), BlockState::Persisted);
            }
        }
        self.states
            .retain(|id, _| self.days.values().flatten().any(|b| &b.id == id));

        let _ = self.events.send(StoreEvent::Reconciled { days: touched });
        true
    }

    pub fn payload(&self) -> AvailabilityPayload {
        self.days
            .iter()
            .map(|(day, blocks)| (day.clone(), blocks.iter().map(BlockPayload::from).collect()))
            .collect()
    }

    /// Submit every day's blocks in one call.
    ///
    /// Local state is only touched once the backend confirms; on failure it
    /// stays as it was so the caller can retry or revert.
    pub async fn persist<B>(&mut self, backend: &B, provider_id: i64) -> Result<()>
    where
        B: BackendApi + ?Sized,
    {
        let payload = self.payload();
        let saved = backend
            .save_provider_availability(provider_id, &payload)
            .await
            .map_err(|e| CalendarError::Persist(e.to_string()))?;

        self.reconcile_from_remote(&saved);
        for block in self.days.values().flatten() {
            self.states.insert(block.id.clone(), BlockState::Persisted);
        }
        self.edit_origin.clear();

        tracing::info!(provider_id, days = payload.len(), "availability saved");
        let _ = self.events.send(StoreEvent::Persisted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockBackendApi};
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

    #[test]
    fn add_keeps_blocks_sorted() {
        let mut store = AvailabilityStore::with_days([day()]);
        store.add_block(day(), at(13, 0), at(15, 0)).unwrap();
        store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        let starts: Vec<_> = store.blocks(day()).iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![at(9, 0), at(13, 0)]);
    }

    #[test]
    fn add_rejects_inverted_range() {
        let mut store = AvailabilityStore::new();
        let err = store.add_block(day(), at(11, 0), at(9, 0)).unwrap_err();
        assert!(matches!(err, CalendarError::Validation(_)));
        let err = store.add_block(day(), at(9, 0), at(9, 0)).unwrap_err();
        assert!(matches!(err, CalendarError::Validation(_)));
    }

    #[test]
    fn overlapping_add_fails_and_leaves_day_unchanged() {
        let mut store = AvailabilityStore::new();
        store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        let before = store.blocks(day()).to_vec();

        let err = store.add_block(day(), at(10, 0), at(12, 0)).unwrap_err();
        assert!(matches!(err, CalendarError::Overlap { .. }));
        assert_eq!(store.blocks(day()), before.as_slice());

        // touching is fine
        store.add_block(day(), at(11, 0), at(12, 0)).unwrap();
        assert_eq!(store.blocks(day()).len(), 2);
    }

    #[test]
    fn edit_ignores_itself_in_overlap_check() {
        let mut store = AvailabilityStore::new();
        let a = store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        store.add_block(day(), at(12, 0), at(13, 0)).unwrap();

        let edited = store.edit_block(day(), &a.id, at(9, 30), at(11, 30)).unwrap();
        assert_eq!(edited.id, a.id);
        assert_eq!(store.blocks(day())[0].start, at(9, 30));

        let err = store.edit_block(day(), &a.id, at(9, 0), at(12, 30)).unwrap_err();
        assert!(matches!(err, CalendarError::Overlap { .. }));

        let err = store.edit_block(day(), "nope", at(14, 0), at(15, 0)).unwrap_err();
        assert!(matches!(err, CalendarError::UnknownBlock { .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut store = AvailabilityStore::new();
        let a = store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        assert!(store.delete_block(day(), &a.id));
        assert!(!store.delete_block(day(), &a.id));
        assert!(store.blocks(day()).is_empty());
    }

    #[test]
    fn mutations_notify_subscribers() {
        let mut store = AvailabilityStore::new();
        let mut rx = store.subscribe();
        store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::DayChanged { day, blocks } => {
                assert_eq!(day, "2026-03-02");
                assert_eq!(blocks.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn reconcile_reports_no_change_for_identical_data() {
        let mut local = DayAvailability::new();
        local.insert("2026-03-02".into(), vec![TimeBlock::new("1", at(9, 0), at(10, 0))]);
        let (merged, changed) = reconcile(&local, &local.clone());
        assert!(!changed);
        assert_eq!(merged, local);
    }

    #[test]
    fn reconcile_remote_wins_and_keeps_unmentioned_days() {
        let mut local = DayAvailability::new();
        local.insert("2026-03-02".into(), vec![TimeBlock::new("1", at(9, 0), at(10, 0))]);
        local.insert("2026-03-03".into(), vec![]);

        let mut remote = DayAvailability::new();
        remote.insert("2026-03-02".into(), vec![TimeBlock::new("1", at(9, 0), at(11, 0))]);

        let (merged, changed) = reconcile(&local, &remote);
        assert!(changed);
        assert_eq!(merged["2026-03-02"][0].end, at(11, 0));
        assert!(merged.contains_key("2026-03-03"));
    }

    #[test]
    fn edit_state_machine() {
        let mut store = AvailabilityStore::new();
        let a = store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        assert_eq!(store.block_state(&a.id), Some(BlockState::Validated));

        store.begin_edit(&a.id);
        assert_eq!(store.block_state(&a.id), Some(BlockState::Draft));
        store.cancel_edit(&a.id);
        assert_eq!(store.block_state(&a.id), Some(BlockState::Validated));

        store.begin_edit(&a.id);
        store.edit_block(day(), &a.id, at(9, 0), at(10, 0)).unwrap();
        assert_eq!(store.block_state(&a.id), Some(BlockState::Validated));
    }

    #[tokio::test]
    async fn persist_failure_leaves_local_state() {
        let mut store = AvailabilityStore::new();
        store.add_block(day(), at(9, 0), at(11, 0)).unwrap();
        let before = store.days().clone();

        let mut backend = MockBackendApi::new();
        backend
            .expect_save_provider_availability()
            .returning(|_, _| Err(ApiError::Status { status: 500, message: None }));

        let err = store.persist(&backend, 4).await.unwrap_err();
        assert!(matches!(err, CalendarError::Persist(_)));
        assert_eq!(store.days(), &before);
        let id = &store.blocks(day())[0].id;
        assert_eq!(store.block_state(id), Some(BlockState::Validated));
    }

    #[tokio::test]
    async fn persist_adopts_server_ids() {
        let mut store = AvailabilityStore::with_days([day()]);
        store.add_block(day(), at(9, 0), at(11, 0)).unwrap();

        let mut backend = MockBackendApi::new();
        backend
            .expect_save_provider_availability()
            .withf(|provider_id, payload| {
                *provider_id == 4 && payload["2026-03-02"][0].start == "2026-03-02T09:00:00.000Z"
            })
            .returning(|_, payload| {
                let mut saved = DayAvailability::new();
                for (day, blocks) in payload {
                    let blocks = blocks
                        .iter()
                        .enumerate()
                        .map(|(i, b)| {
                            TimeBlock::new(
                                (i + 100).to_string(),
                                DateTime::parse_from_rfc3339(&b.start).unwrap(),
                                DateTime::parse_from_rfc3339(&b.end).unwrap(),
                            )
                        })
                        .collect();
                    saved.insert(day.clone(), blocks);
                }
                Ok(saved)
            });

        store.persist(&backend, 4).await.unwrap();
        let block = &store.blocks(day())[0];
        assert_eq!(block.id, "100");
        assert_eq!((block.start, block.end), (at(9, 0), at(11, 0)));
        assert_eq!(store.block_state("100"), Some(BlockState::Persisted));
    }
}

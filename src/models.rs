use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::interval::Interval;

// Date key used for per-day maps ("yyyy-MM-dd")
pub const DAY_FORMAT: &str = "%Y-%m-%d";

pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

// Availability window declared by a provider.
//   Discount fields are only set on consumer-facing offers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBlock {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discounted_price: Option<f64>,
}

impl TimeBlock {
    pub fn new(id: impl Into<String>, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        TimeBlock {
            id: id.into(),
            start,
            end,
            original_price: None,
            discount_percentage: None,
            discounted_price: None,
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }

    pub fn has_discount(&self) -> bool {
        self.discount_percentage.unwrap_or(0) > 0
    }
}

// "yyyy-MM-dd" -> blocks ordered by start
pub type DayAvailability = BTreeMap<String, Vec<TimeBlock>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    // pending -> confirmed | cancelled
    // confirmed -> completed | cancelled
    // cancelled, completed are terminal
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }

    pub fn occupies_time(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// The backend sends either a bare id or a nested object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RefRepr {
    Id(i64),
    Object {
        id: i64,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RefRepr")]
pub struct ServiceRef {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<RefRepr> for ServiceRef {
    fn from(r: RefRepr) -> Self {
        match r {
            RefRepr::Id(id) => ServiceRef { id, name: None },
            RefRepr::Object { id, name } => ServiceRef { id, name },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RefRepr")]
pub struct ConsumerRef {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<RefRepr> for ConsumerRef {
    fn from(r: RefRepr) -> Self {
        match r {
            RefRepr::Id(id) => ConsumerRef { id, name: None },
            RefRepr::Object { id, name } => ConsumerRef { id, name },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: i64,
    pub service: ServiceRef,
    #[serde(default)]
    pub consumer: Option<ConsumerRef>,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub client_phone: Option<String>,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<FixedOffset>>,
}

impl Appointment {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_time, self.end_time)
    }
}

// Service as returned by GET /services/{id}/
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub provider: Option<i64>,
    #[serde(default)]
    pub duration: Option<i64>,
}

// -----------------------------
// Discount configuration
// -----------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Tier1, Tier::Tier2, Tier::Tier3, Tier::Tier4];

    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Tier1 => Some(Tier::Tier2),
            Tier::Tier2 => Some(Tier::Tier3),
            Tier::Tier3 => Some(Tier::Tier4),
            Tier::Tier4 => None,
        }
    }

    pub fn prev(self) -> Option<Tier> {
        match self {
            Tier::Tier1 => None,
            Tier::Tier2 => Some(Tier::Tier1),
            Tier::Tier3 => Some(Tier::Tier2),
            Tier::Tier4 => Some(Tier::Tier3),
        }
    }
}

// Distance bracket in yards, [min, max)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierRange {
    #[serde(default)]
    pub min: f64,
    pub max: f64,
}

impl TierRange {
    pub fn contains(&self, yards: f64) -> bool {
        self.min <= yards && yards < self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierDistances {
    pub tier1: TierRange,
    pub tier2: TierRange,
    pub tier3: TierRange,
    pub tier4: TierRange,
}

// Percentage per nearby-appointment bucket; "5appt" means 5 or more
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountDiscounts {
    #[serde(rename = "1appt")]
    pub one: u8,
    #[serde(rename = "2appt")]
    pub two: u8,
    #[serde(rename = "3appt")]
    pub three: u8,
    #[serde(rename = "4appt")]
    pub four: u8,
    #[serde(rename = "5appt")]
    pub five: u8,
}

impl CountDiscounts {
    pub fn new(values: [u8; 5]) -> Self {
        let [one, two, three, four, five] = values;
        CountDiscounts { one, two, three, four, five }
    }

    // bucket is clamped to 1..=5 by the caller
    pub fn for_bucket(&self, bucket: usize) -> u8 {
        match bucket {
            0 => 0,
            1 => self.one,
            2 => self.two,
            3 => self.three,
            4 => self.four,
            _ => self.five,
        }
    }

    pub fn bucket_mut(&mut self, bucket: usize) -> Option<&mut u8> {
        match bucket {
            1 => Some(&mut self.one),
            2 => Some(&mut self.two),
            3 => Some(&mut self.three),
            4 => Some(&mut self.four),
            5 => Some(&mut self.five),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierDiscounts {
    pub tier1: CountDiscounts,
    pub tier2: CountDiscounts,
    pub tier3: CountDiscounts,
    pub tier4: CountDiscounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscountConfig {
    pub is_active: bool,
    pub tier_distances: TierDistances,
    pub discounts: TierDiscounts,
}

impl Default for DiscountConfig {
    fn default() -> Self {
        DiscountConfig {
            is_active: true,
            tier_distances: TierDistances {
                tier1: TierRange { min: 0.0, max: 200.0 },
                tier2: TierRange { min: 200.0, max: 600.0 },
                tier3: TierRange { min: 600.0, max: 1760.0 },
                tier4: TierRange { min: 1760.0, max: 5280.0 },
            },
            discounts: TierDiscounts {
                tier1: CountDiscounts::new([15, 20, 25, 30, 35]),
                tier2: CountDiscounts::new([12, 15, 18, 21, 24]),
                tier3: CountDiscounts::new([10, 11, 12, 13, 14]),
                tier4: CountDiscounts::new([5, 6, 7, 8, 9]),
            },
        }
    }
}

impl DiscountConfig {
    pub fn range(&self, tier: Tier) -> TierRange {
        match tier {
            Tier::Tier1 => self.tier_distances.tier1,
            Tier::Tier2 => self.tier_distances.tier2,
            Tier::Tier3 => self.tier_distances.tier3,
            Tier::Tier4 => self.tier_distances.tier4,
        }
    }

    pub fn range_mut(&mut self, tier: Tier) -> &mut TierRange {
        match tier {
            Tier::Tier1 => &mut self.tier_distances.tier1,
            Tier::Tier2 => &mut self.tier_distances.tier2,
            Tier::Tier3 => &mut self.tier_distances.tier3,
            Tier::Tier4 => &mut self.tier_distances.tier4,
        }
    }

    pub fn discounts(&self, tier: Tier) -> &CountDiscounts {
        match tier {
            Tier::Tier1 => &self.discounts.tier1,
            Tier::Tier2 => &self.discounts.tier2,
            Tier::Tier3 => &self.discounts.tier3,
            Tier::Tier4 => &self.discounts.tier4,
        }
    }

    pub fn discounts_mut(&mut self, tier: Tier) -> &mut CountDiscounts {
        match tier {
            Tier::Tier1 => &mut self.discounts.tier1,
            Tier::Tier2 => &mut self.discounts.tier2,
            Tier::Tier3 => &mut self.discounts.tier3,
            Tier::Tier4 => &mut self.discounts.tier4,
        }
    }
}

// -----------------------------
// Session user
// -----------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Provider,
    Consumer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: i64,
    #[serde(default)]
    pub business_name: Option<String>,
}

// Current user record as stored at login
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub user_type: UserType,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub apartment: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    // legacy single-string address
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub provider_profile: Option<ProviderProfile>,
}

// Block ids come back from the backend as numbers, locally they are strings
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyId {
        Text(String),
        Number(i64),
    }

    Ok(match AnyId::deserialize(deserializer)? {
        AnyId::Text(s) => s,
        AnyId::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_accepts_numbers_and_strings() {
        let numeric: TimeBlock = serde_json::from_str(
            r#"{"id": 42, "start": "2026-03-02T09:00:00Z", "end": "2026-03-02T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(numeric.id, "42");

        let text: TimeBlock = serde_json::from_str(
            r#"{"id": "block-1", "start": "2026-03-02T09:00:00Z", "end": "2026-03-02T10:00:00Z",
                "original_price": 100.0, "discount_percentage": 15, "discounted_price": 85.0}"#,
        )
        .unwrap();
        assert_eq!(text.id, "block-1");
        assert_eq!(text.discount_percentage, Some(15));
        assert!(text.has_discount());
    }

    #[test]
    fn appointment_refs_accept_id_or_object() {
        let a: Appointment = serde_json::from_str(
            r#"{"id": 7, "service": {"id": 3, "name": "Lawn care"}, "consumer": 9,
                "start_time": "2026-03-02T14:00:00Z", "end_time": "2026-03-02T15:00:00Z",
                "status": "confirmed"}"#,
        )
        .unwrap();
        assert_eq!(a.service.id, 3);
        assert_eq!(a.service.name.as_deref(), Some("Lawn care"));
        assert_eq!(a.consumer.map(|c| c.id), Some(9));
        assert_eq!(a.status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn status_transitions() {
        use AppointmentStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn discount_config_wire_format() {
        let json = serde_json::to_value(DiscountConfig::default()).unwrap();
        assert_eq!(json["discounts"]["tier1"]["1appt"], 15);
        assert_eq!(json["tier_distances"]["tier2"]["min"], 200.0);

        // tier1 may omit its lower bound
        let cfg: DiscountConfig = serde_json::from_str(
            r#"{"is_active": true,
                "tier_distances": {"tier1": {"max": 200}, "tier2": {"min": 200, "max": 600},
                                   "tier3": {"min": 600, "max": 1760}, "tier4": {"min": 1760, "max": 5280}},
                "discounts": {
                    "tier1": {"1appt": 15, "2appt": 20, "3appt": 25, "4appt": 30, "5appt": 35},
                    "tier2": {"1appt": 12, "2appt": 15, "3appt": 18, "4appt": 21, "5appt": 24},
                    "tier3": {"1appt": 10, "2appt": 11, "3appt": 12, "4appt": 13, "5appt": 14},
                    "tier4": {"1appt": 5, "2appt": 6, "3appt": 7, "4appt": 8, "5appt": 9}}}"#,
        )
        .unwrap();
        assert_eq!(cfg, DiscountConfig::default());
    }
}

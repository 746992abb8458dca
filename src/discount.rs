/*
Proximity discount engine.
Prices an open slot from how tightly it packs against a provider's
existing bookings. Independent from HTTP so it can be tested directly.
*/

use std::collections::BTreeMap;

use serde::Serialize;

use crate::api::BackendApi;
use crate::error::{CalendarError, Result};
use crate::interval::{Interval, gap_between};
use crate::models::{Appointment, DiscountConfig, Tier, TimeBlock};

pub const YARDS_PER_MILE: f64 = 1760.0;
pub const DISCOUNT_REASON: &str = "Proximity discount";

// Largest bucket; "5appt" also covers more than five
const MAX_BUCKET: usize = 5;

// Pricing attached to a slot before it is offered
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiscountQuote {
    pub tier: Option<Tier>,
    pub nearby_count: usize,
    pub discount_percentage: u8,
    pub original_price: f64,
    pub discounted_price: f64,
}

impl DiscountQuote {
    fn undiscounted(price: f64) -> Self {
        DiscountQuote {
            tier: None,
            nearby_count: 0,
            discount_percentage: 0,
            original_price: price,
            discounted_price: price,
        }
    }

    pub fn discount_amount(&self) -> f64 {
        self.original_price - self.discounted_price
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiscountEngine {
    yards_per_minute: f64,
}

impl Default for DiscountEngine {
    fn default() -> Self {
        DiscountEngine { yards_per_minute: 20.0 }
    }
}

impl DiscountEngine {
    pub fn new(yards_per_minute: f64) -> Self {
        DiscountEngine { yards_per_minute }
    }

    // Proximity figure for one appointment; 0 when adjacent
    pub fn proximity_yards(&self, slot: &Interval, appointment: &Appointment) -> f64 {
        let gap = gap_between(slot, &appointment.interval());
        gap.num_minutes() as f64 * self.yards_per_minute
    }

    // Compute the discount for `slot`.
    //
    // Rules:
    // - Only non-cancelled appointments count
    // - Measure = closest appointment, tier = first tier whose range holds it
    // - Nearby count = appointments closer than that tier's max, capped at 5
    // - Inactive config, no appointments or no tier -> 0%
    pub fn quote(
        &self,
        slot: &Interval,
        base_price: f64,
        config: &DiscountConfig,
        appointments: &[Appointment],
    ) -> DiscountQuote {
        if !config.is_active {
            return DiscountQuote::undiscounted(base_price);
        }

        let distances: Vec<f64> = appointments
            .iter()
            .filter(|a| a.status.occupies_time())
            .map(|a| self.proximity_yards(slot, a))
            .collect();

        let Some(measure) = distances.iter().copied().reduce(f64::min) else {
            return DiscountQuote::undiscounted(base_price);
        };

        let Some(tier) = Tier::ALL.into_iter().find(|t| config.range(*t).contains(measure)) else {
            return DiscountQuote::undiscounted(base_price);
        };

        let max = config.range(tier).max;
        let nearby_count = distances.iter().filter(|d| **d < max).count();
        if nearby_count == 0 {
            return DiscountQuote::undiscounted(base_price);
        }

        let pct = config.discounts(tier).for_bucket(nearby_count.min(MAX_BUCKET));
        DiscountQuote {
            tier: Some(tier),
            nearby_count,
            discount_percentage: pct,
            original_price: base_price,
            discounted_price: discounted_price(base_price, pct),
        }
    }

    // Copy of `block` carrying its pricing
    pub fn annotate(
        &self,
        block: &TimeBlock,
        base_price: f64,
        config: &DiscountConfig,
        appointments: &[Appointment],
    ) -> TimeBlock {
        let quote = self.quote(&block.interval(), base_price, config, appointments);
        TimeBlock {
            original_price: Some(quote.original_price),
            discount_percentage: Some(quote.discount_percentage),
            discounted_price: Some(quote.discounted_price),
            ..block.clone()
        }
    }
}

// Whole currency units
pub fn discounted_price(original: f64, pct: u8) -> f64 {
    (original * (1.0 - f64::from(pct) / 100.0)).round()
}

// -----------------------------
// Config editing
// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    Min,
    Max,
}

// Move one tier boundary; the neighbour sharing it follows
pub fn set_boundary(config: &mut DiscountConfig, tier: Tier, boundary: Boundary, yards: f64) {
    let yards = yards.max(0.0);
    match boundary {
        Boundary::Min => {
            config.range_mut(tier).min = yards;
            if let Some(prev) = tier.prev() {
                config.range_mut(prev).max = yards;
            }
        }
        Boundary::Max => {
            config.range_mut(tier).max = yards;
            if let Some(next) = tier.next() {
                config.range_mut(next).min = yards;
            }
        }
    }
}

// Percentage for `bucket` (1..=5), clamped to 0..=100
pub fn set_discount(config: &mut DiscountConfig, tier: Tier, bucket: usize, pct: i64) -> Result<u8> {
    let clamped = pct.clamp(0, 100) as u8;
    let slot = config
        .discounts_mut(tier)
        .bucket_mut(bucket)
        .ok_or_else(|| CalendarError::Validation(format!("unknown appointment bucket {bucket}")))?;
    *slot = clamped;
    Ok(clamped)
}

pub fn validate(config: &DiscountConfig) -> Result<()> {
    for tier in Tier::ALL {
        let range = config.range(tier);
        if range.min < 0.0 || range.min >= range.max {
            return Err(CalendarError::Validation(format!(
                "{tier:?} must have min below max ({} >= {})",
                range.min, range.max
            )));
        }
        if let Some(next) = tier.next() {
            if config.range(next).min != range.max {
                return Err(CalendarError::Validation(format!(
                    "{next:?} must start where {tier:?} ends"
                )));
            }
        }
        for bucket in 1..=MAX_BUCKET {
            if config.discounts(tier).for_bucket(bucket) > 100 {
                return Err(CalendarError::Validation(format!(
                    "{tier:?} discount for {bucket} appointment(s) exceeds 100%"
                )));
            }
        }
    }
    Ok(())
}

// "150 yards" below 1500, miles with one decimal above
pub fn format_distance(yards: f64) -> String {
    if yards < 1500.0 {
        format!("{yards} yards")
    } else {
        format!("{:.1} miles", yards / YARDS_PER_MILE)
    }
}

// Config document with a "200 yards - 600 yards" label per tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    #[serde(flatten)]
    pub config: DiscountConfig,
    pub labels: BTreeMap<Tier, String>,
}

impl From<DiscountConfig> for ConfigSummary {
    fn from(config: DiscountConfig) -> Self {
        let labels = Tier::ALL
            .into_iter()
            .map(|tier| {
                let range = config.range(tier);
                (tier, format!("{} - {}", format_distance(range.min), format_distance(range.max)))
            })
            .collect();
        ConfigSummary { config, labels }
    }
}

// -----------------------------
// Persistence
// -----------------------------

pub async fn fetch_config<B>(backend: &B) -> Result<DiscountConfig>
where
    B: BackendApi + ?Sized,
{
    Ok(backend.discount_config().await?)
}

// Whole document; invalid tiers never leave the process
pub async fn save_config<B>(backend: &B, config: &DiscountConfig) -> Result<DiscountConfig>
where
    B: BackendApi + ?Sized,
{
    validate(config)?;
    let saved = backend
        .update_discount_config(config)
        .await
        .map_err(|e| CalendarError::Persist(e.server_message().map(str::to_owned).unwrap_or_else(|| e.to_string())))?;
    tracing::info!(active = saved.is_active, "discount configuration saved");
    Ok(saved)
}

/// Fetch the current document, apply one edit, save the result.
pub async fn edit_config<B, F>(backend: &B, edit: F) -> Result<DiscountConfig>
where
    B: BackendApi + ?Sized,
    F: FnOnce(&mut DiscountConfig) -> Result<()>,
{
    let mut config = fetch_config(backend).await?;
    edit(&mut config)?;
    save_config(backend, &config).await
}

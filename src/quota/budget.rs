//! Per-source unit ledger over a fixed wall-clock window

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::SourceKind;

/// Kind of external call, used to look up its unit cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Search,
    Details,
    Related,
    ChannelUploads,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Details => "details",
            Self::Related => "related",
            Self::ChannelUploads => "channel_uploads",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit cost of each operation kind for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTable {
    pub search: u32,
    pub details: u32,
    pub related: u32,
    pub channel_uploads: u32,
}

impl CostTable {
    /// Official API accounting: listings are expensive, per-item lookups cost one unit
    ///
    /// A search is a 100-unit listing plus one batched details hydration.
    pub fn api() -> Self {
        Self {
            search: 101,
            details: 1,
            related: 100,
            channel_uploads: 100,
        }
    }

    /// Same cost for every operation
    pub fn flat(units: u32) -> Self {
        Self {
            search: units,
            details: units,
            related: units,
            channel_uploads: units,
        }
    }

    /// Cost of one operation
    pub fn cost(&self, op: OperationKind) -> u32 {
        match op {
            OperationKind::Search => self.search,
            OperationKind::Details => self.details,
            OperationKind::Related => self.related,
            OperationKind::ChannelUploads => self.channel_uploads,
        }
    }

    /// Most expensive entry
    pub fn max_cost(&self) -> u32 {
        self.search
            .max(self.details)
            .max(self.related)
            .max(self.channel_uploads)
    }
}

/// Remaining units for one source in the current window
///
/// The window is anchored at the Unix epoch, so every budget with the same window
/// length resets at the same instant.
#[derive(Debug, Clone)]
pub struct QuotaBudget {
    source: SourceKind,
    ceiling: u64,
    units_remaining: u64,
    window: Duration,
    window_reset_at: DateTime<Utc>,
    cost_table: CostTable,
}

impl QuotaBudget {
    /// Create a full budget for the window containing `now`
    pub fn new(
        source: SourceKind,
        ceiling: u64,
        window: Duration,
        cost_table: CostTable,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            ceiling,
            units_remaining: ceiling,
            window,
            window_reset_at: next_reset(now, window),
            cost_table,
        }
    }

    /// Refill the ledger if the window has rolled over
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if now >= self.window_reset_at {
            self.units_remaining = self.ceiling;
            self.window_reset_at = next_reset(now, self.window);
        }
    }

    /// Whether `units` fit in what is left
    pub fn can_afford(&self, units: u64) -> bool {
        units <= self.units_remaining
    }

    /// Debit `units`, or report when the window resets
    ///
    /// Never leaves the ledger negative.
    pub fn try_debit(&mut self, units: u64, now: DateTime<Utc>) -> Result<u64, DateTime<Utc>> {
        self.refresh(now);
        if !self.can_afford(units) {
            return Err(self.window_reset_at);
        }
        self.units_remaining -= units;
        Ok(self.units_remaining)
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn units_remaining(&self) -> u64 {
        self.units_remaining
    }

    pub fn window_reset_at(&self) -> DateTime<Utc> {
        self.window_reset_at
    }

    pub fn cost_table(&self) -> &CostTable {
        &self.cost_table
    }
}

/// End of the epoch-anchored window containing `now`
fn next_reset(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let width = window.num_seconds().max(1);
    let start = now.timestamp().div_euclid(width) * width;
    DateTime::from_timestamp(start + width, 0).unwrap_or(now + window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day_budget(ceiling: u64, now: DateTime<Utc>) -> QuotaBudget {
        QuotaBudget::new(
            SourceKind::Api,
            ceiling,
            Duration::days(1),
            CostTable::api(),
            now,
        )
    }

    #[test]
    fn test_window_anchored_at_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 17, 45, 0).unwrap();
        let budget = day_budget(100, now);
        assert_eq!(
            budget.window_reset_at(),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_debit_until_exhausted() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let mut budget = day_budget(250, now);

        assert_eq!(budget.try_debit(101, now), Ok(149));
        assert_eq!(budget.try_debit(101, now), Ok(48));
        let reset = budget.try_debit(101, now).unwrap_err();
        assert_eq!(reset, budget.window_reset_at());
        assert_eq!(budget.units_remaining(), 48);
        assert_eq!(budget.try_debit(48, now), Ok(0));
    }

    #[test]
    fn test_refill_after_reset() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 0).unwrap();
        let mut budget = day_budget(10, now);
        assert!(budget.try_debit(10, now).is_ok());
        assert!(budget.try_debit(1, now).is_err());

        let later = now + Duration::minutes(2);
        assert_eq!(budget.try_debit(1, later), Ok(9));
        assert_eq!(
            budget.window_reset_at(),
            Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_cost_table() {
        let table = CostTable::api();
        assert_eq!(table.cost(OperationKind::Search), 101);
        assert_eq!(table.cost(OperationKind::Details), 1);
        assert_eq!(table.max_cost(), 101);
        assert_eq!(CostTable::flat(1).cost(OperationKind::Related), 1);
    }
}

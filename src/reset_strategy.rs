//! Calendar and count arithmetic deciding when a counter restarts.
//!
//! Boundaries are local midnights in the configured zone. On a day whose midnight is
//! skipped by a DST change, the boundary is the first local instant that exists; when
//! midnight occurs twice, the earlier instant wins.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::counter_state::CounterState;
use crate::sequence_config::{ResetPeriod, SequenceConfig};

/// Step used to find the first valid instant after a DST gap.
const GAP_STEP_MINUTES: i64 = 15;
const GAP_SEARCH_LIMIT: usize = 24 * 4;

pub trait ResetStrategy: Send + Sync {
    /// Count limit first, then calendar boundary.
    fn should_reset(
        &self,
        config: &SequenceConfig,
        state: &CounterState,
        now: DateTime<Utc>,
    ) -> bool;

    fn calculate_next_reset_time(
        &self,
        period: ResetPeriod,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>>;

    fn reset_boundary(&self, period: ResetPeriod, at: DateTime<Utc>) -> DateTime<Utc>;

    fn is_same_reset_period(
        &self,
        period: ResetPeriod,
        a: DateTime<Utc>,
        b: DateTime<Utc>,
    ) -> bool {
        self.reset_boundary(period, a) == self.reset_boundary(period, b)
    }

    fn remaining_until_count_reset(
        &self,
        config: &SequenceConfig,
        state: &CounterState,
    ) -> Option<u64> {
        config
            .reset_limit
            .map(|limit| limit.saturating_sub(state.counter))
    }

    /// Whole seconds until the next calendar reset, never negative.
    fn remaining_until_time_reset(&self, period: ResetPeriod, now: DateTime<Utc>) -> Option<i64> {
        self.calculate_next_reset_time(period, now)
            .map(|next| (next - now).num_seconds().max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarResetStrategy {
    tz: Tz,
}

impl Default for CalendarResetStrategy {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl CalendarResetStrategy {
    pub fn new(tz: Tz) -> Self {
        CalendarResetStrategy { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let mut naive = date.and_time(NaiveTime::MIN);
        for _ in 0..GAP_SEARCH_LIMIT {
            match self.tz.from_local_datetime(&naive) {
                LocalResult::Single(instant) => return instant.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => naive += Duration::minutes(GAP_STEP_MINUTES),
            }
        }
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

impl ResetStrategy for CalendarResetStrategy {
    fn should_reset(
        &self,
        config: &SequenceConfig,
        state: &CounterState,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(limit) = config.reset_limit {
            if state.counter >= limit {
                return true;
            }
        }
        if config.reset_period == ResetPeriod::Never {
            return false;
        }
        let anchor = state.last_reset_at.unwrap_or(state.timestamp);
        !self.is_same_reset_period(config.reset_period, anchor, now)
    }

    fn calculate_next_reset_time(
        &self,
        period: ResetPeriod,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let today = self.local_date(now);
        let next = match period {
            ResetPeriod::Never => return None,
            ResetPeriod::Daily => today.succ_opt()?,
            ResetPeriod::Monthly => first_of_next_month(today)?,
            ResetPeriod::Yearly => NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
        };
        Some(self.local_midnight(next))
    }

    fn reset_boundary(&self, period: ResetPeriod, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.local_date(at);
        match period {
            ResetPeriod::Never => at,
            ResetPeriod::Daily => self.local_midnight(date),
            ResetPeriod::Monthly => self.local_midnight(date.with_day(1).unwrap_or(date)),
            ResetPeriod::Yearly => self.local_midnight(date.with_ordinal(1).unwrap_or(date)),
        }
    }
}

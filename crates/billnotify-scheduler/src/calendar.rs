//! Business calendar — decides when outbound messaging is permitted.
//!
//! All comparisons happen in the calendar's own timezone, never UTC.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use billnotify_core::config::{CalendarConfig, default_holidays_2026};
use billnotify_core::error::{BillNotifyError, Result};

/// Upper bound on day-by-day advancement in `next_open`.
pub const MAX_SEARCH_DAYS: u32 = 30;

/// Opening hours, open weekdays and holidays in a fixed timezone.
#[derive(Debug, Clone)]
pub struct BusinessCalendar {
    start_hour: u32,
    end_hour: u32,
    weekdays: Vec<Weekday>,
    holidays: BTreeSet<NaiveDate>,
    tz: Tz,
}

impl BusinessCalendar {
    /// Build a calendar, rejecting degenerate hour windows up front.
    pub fn new(
        start_hour: u32,
        end_hour: u32,
        weekdays: Vec<Weekday>,
        holidays: impl IntoIterator<Item = NaiveDate>,
        tz: Tz,
    ) -> Result<Self> {
        if end_hour > 24 || start_hour >= end_hour {
            return Err(BillNotifyError::Calendar(format!(
                "invalid business hours {start_hour}h-{end_hour}h"
            )));
        }
        if weekdays.is_empty() {
            return Err(BillNotifyError::Calendar("no open weekdays".into()));
        }
        Ok(Self {
            start_hour,
            end_hour,
            weekdays,
            holidays: holidays.into_iter().collect(),
            tz,
        })
    }

    pub fn from_config(config: &CalendarConfig) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.start_hour,
            config.end_hour,
            config.weekdays.clone(),
            config.holidays.iter().copied(),
            config.tz()?,
        )
    }

    /// Monday–Friday, 08h–18h, São Paulo time, 2026 national holidays.
    pub fn brazil_default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 18,
            weekdays: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            holidays: default_holidays_2026().into_iter().collect(),
            tz: chrono_tz::America::Sao_Paulo,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    /// Calendar date of `instant` in local time.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    fn is_business_day(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&date.weekday()) && !self.holidays.contains(&date)
    }

    /// True iff the local weekday is open, the date is not a holiday and
    /// `start_hour <= hour < end_hour`.
    pub fn is_open(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz);
        if !self.is_business_day(local.date_naive()) {
            return false;
        }
        let hour = local.hour();
        hour >= self.start_hour && hour < self.end_hour
    }

    /// `start_hour` on `date`, local time, as a UTC instant.
    fn opening_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_hms_opt(self.start_hour, 0, 0).unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
        match self.tz.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            // Opening hour falls in a DST gap: the first valid instant is an hour later.
            None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .map(|l| l.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        }
    }

    /// The earliest open instant at or after `instant`.
    ///
    /// Returns `instant` unchanged when already open. Gives up after
    /// [`MAX_SEARCH_DAYS`] closed days and returns the last candidate, which
    /// signals a calendar with no reachable business day.
    pub fn next_open(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_open(instant) {
            return instant;
        }

        let local = instant.with_timezone(&self.tz);
        let mut date = local.date_naive();
        if local.hour() >= self.end_hour {
            date = date.succ_opt().unwrap_or(date);
        }

        for _ in 0..MAX_SEARCH_DAYS {
            if self.is_business_day(date) {
                return self.opening_on(date);
            }
            date = date.succ_opt().unwrap_or(date);
        }

        tracing::warn!(
            "⚠️ No business day within {} days of {}; check calendar configuration",
            MAX_SEARCH_DAYS,
            instant
        );
        self.opening_on(date)
    }

    /// Next open instant formatted as `dd/mm/YYYY HH:MM` in local time.
    pub fn describe_next_open(&self, instant: DateTime<Utc>) -> String {
        self.next_open(instant)
            .with_timezone(&self.tz)
            .format("%d/%m/%Y %H:%M")
            .to_string()
    }
}

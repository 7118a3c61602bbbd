//! Trigger cadences for the periodic jobs.
//! Supports: a fixed local time of day, or a fixed interval.
//! Example: `Trigger::daily_at("reminders", 09:00)` fires once per local day.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use billnotify_core::config::{Config, parse_time_of_day};
use billnotify_core::error::{BillNotifyError, Result};

/// Which batch operation a trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Reminders,
    DueToday,
    CatchUp,
    MarkOverdue,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminders => "reminders",
            Self::DueToday => "due-today",
            Self::CatchUp => "catch-up",
            Self::MarkOverdue => "mark-overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reminders" => Some(Self::Reminders),
            "due-today" => Some(Self::DueToday),
            "catch-up" => Some(Self::CatchUp),
            "mark-overdue" => Some(Self::MarkOverdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    /// Once per day at a local wall-clock time.
    DailyAt(NaiveTime),
    /// Every N, aligned to multiples of N since the Unix epoch.
    Every(Duration),
}

/// A job bound to a cadence.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub job: Job,
    pub cadence: Cadence,
}

impl Trigger {
    pub fn daily_at(job: Job, at: NaiveTime) -> Self {
        Self { job, cadence: Cadence::DailyAt(at) }
    }

    pub fn every(job: Job, interval: Duration) -> Self {
        Self { job, cadence: Cadence::Every(interval) }
    }

    /// First fire instant strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        match &self.cadence {
            Cadence::Every(interval) => {
                let step = interval.num_seconds().max(1);
                let secs = after.timestamp();
                let next = (secs.div_euclid(step) + 1) * step;
                DateTime::from_timestamp(next, 0).unwrap_or(after + *interval)
            }
            Cadence::DailyAt(at) => {
                let local_date = after.with_timezone(&tz).date_naive();
                // Nonexistent local times (DST gaps) are skipped.
                for offset in 0..3 {
                    let date = local_date + Duration::days(offset);
                    let Some(candidate) = tz.from_local_datetime(&date.and_time(*at)).earliest() else {
                        continue;
                    };
                    let candidate = candidate.with_timezone(&Utc);
                    if candidate > after {
                        return candidate;
                    }
                }
                after + Duration::days(1)
            }
        }
    }
}

fn seconds(secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| BillNotifyError::Config(format!("interval of {secs}s is out of range")))
}

/// The four periodic jobs, wired from the scheduler config.
pub fn default_triggers(config: &Config) -> Result<Vec<Trigger>> {
    let s = &config.scheduler;
    Ok(vec![
        Trigger::daily_at(Job::Reminders, parse_time_of_day(&s.reminder_at)?),
        Trigger::daily_at(Job::DueToday, parse_time_of_day(&s.due_today_at)?),
        Trigger::every(Job::CatchUp, seconds(s.catch_up_every_secs)?),
        Trigger::daily_at(Job::MarkOverdue, parse_time_of_day(&s.mark_overdue_at)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::America::Sao_Paulo;

    fn local(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Sao_Paulo.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_daily_at_later_today() {
        let t = Trigger::daily_at(Job::Reminders, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(t.next_fire_after(local(10, 7, 30), Sao_Paulo), local(10, 9, 0));
    }

    #[test]
    fn test_daily_at_rolls_to_tomorrow() {
        let t = Trigger::daily_at(Job::Reminders, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(t.next_fire_after(local(10, 9, 0), Sao_Paulo), local(11, 9, 0));
        assert_eq!(t.next_fire_after(local(10, 22, 0), Sao_Paulo), local(11, 9, 0));
    }

    #[test]
    fn test_daily_at_uses_local_time() {
        let t = Trigger::daily_at(Job::MarkOverdue, NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        let next = t.next_fire_after(local(10, 12, 0), Sao_Paulo);
        // 23:00 in São Paulo is 02:00 UTC the next day
        assert_eq!(next.hour(), 2);
        assert_eq!(next.with_timezone(&Sao_Paulo).hour(), 23);
    }

    #[test]
    fn test_every_aligns_to_boundaries() {
        let t = Trigger::every(Job::CatchUp, Duration::hours(1));
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 14, 20, 5).unwrap();
        assert_eq!(t.next_fire_after(after, Sao_Paulo), Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap());
        let on_boundary = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        assert_eq!(t.next_fire_after(on_boundary, Sao_Paulo), Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_default_triggers() {
        let triggers = default_triggers(&Config::default()).unwrap();
        let jobs: Vec<Job> = triggers.iter().map(|t| t.job).collect();
        assert_eq!(jobs, vec![Job::Reminders, Job::DueToday, Job::CatchUp, Job::MarkOverdue]);
        assert_eq!(triggers[2].cadence, Cadence::Every(Duration::hours(1)));
    }

    #[test]
    fn test_out_of_range_interval_is_config_error() {
        let mut config = Config::default();
        config.scheduler.catch_up_every_secs = u64::MAX;
        assert!(matches!(default_triggers(&config), Err(BillNotifyError::Config(_))));
    }

    #[test]
    fn test_job_names() {
        for job in [Job::Reminders, Job::DueToday, Job::CatchUp, Job::MarkOverdue] {
            assert_eq!(Job::parse(job.as_str()), Some(job));
        }
        assert!(Job::parse("bad").is_none());
    }
}

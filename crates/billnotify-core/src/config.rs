//! BillNotify configuration system.

use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BillNotifyError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

impl Config {
    /// Load config from the default path (~/.billnotify/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BillNotifyError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BillNotifyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the BillNotify home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".billnotify")
    }

    /// Environment overrides for endpoints and secrets.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BILLNOTIFY_REDIS_URL") {
            self.queue.redis_url = url;
        }
        if let Some(url) = lookup("EVOLUTION_API_URL") {
            self.whatsapp.base_url = url;
        }
        if let Some(key) = lookup("EVOLUTION_API_KEY") {
            self.whatsapp.api_key = key;
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            self.email.password = password;
        }
    }

    /// Check every setting that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<()> {
        self.calendar.validate()?;
        self.scheduler.validate()?;
        self.queue.validate()?;
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

/// Business-hours window for outbound messaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<Weekday>,
    #[serde(default = "default_holidays_2026")]
    pub holidays: Vec<NaiveDate>,
}

fn default_timezone() -> String { "America/Sao_Paulo".into() }
fn default_start_hour() -> u32 { 8 }
fn default_end_hour() -> u32 { 18 }
fn default_weekdays() -> Vec<Weekday> {
    vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
}

/// Brazilian national holidays for 2026.
pub fn default_holidays_2026() -> Vec<NaiveDate> {
    [
        (1, 1),   // Confraternização Universal
        (2, 16),  // Carnaval
        (2, 17),  // Carnaval
        (4, 3),   // Sexta-feira Santa
        (4, 21),  // Tiradentes
        (5, 1),   // Dia do Trabalho
        (6, 4),   // Corpus Christi
        (9, 7),   // Independência
        (10, 12), // Nossa Senhora Aparecida
        (11, 2),  // Finados
        (11, 15), // Proclamação da República
        (12, 25), // Natal
    ]
    .into_iter()
    .filter_map(|(m, d)| NaiveDate::from_ymd_opt(2026, m, d))
    .collect()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            weekdays: default_weekdays(),
            holidays: default_holidays_2026(),
        }
    }
}

impl CalendarConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| BillNotifyError::Calendar(format!("Unknown timezone '{}': {e}", self.timezone)))
    }

    pub fn validate(&self) -> Result<()> {
        self.tz()?;
        if self.end_hour > 24 {
            return Err(BillNotifyError::Calendar(format!("end_hour {} is past 24", self.end_hour)));
        }
        if self.start_hour >= self.end_hour {
            return Err(BillNotifyError::Calendar(format!(
                "start_hour {} must be before end_hour {}",
                self.start_hour, self.end_hour
            )));
        }
        if self.weekdays.is_empty() {
            return Err(BillNotifyError::Calendar("at least one weekday must be open".into()));
        }
        Ok(())
    }
}

/// Trigger times and the reminder window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reminder_window")]
    pub reminder_window_days: u32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_morning")]
    pub reminder_at: String,
    #[serde(default = "default_morning")]
    pub due_today_at: String,
    #[serde(default = "default_catch_up_every")]
    pub catch_up_every_secs: u64,
    #[serde(default = "default_mark_overdue_at")]
    pub mark_overdue_at: String,
}

fn default_reminder_window() -> u32 { 3 }
fn default_tick_interval() -> u64 { 30 }
fn default_morning() -> String { "09:00".into() }
fn default_catch_up_every() -> u64 { 3600 }
fn default_mark_overdue_at() -> String { "23:00".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_window_days: default_reminder_window(),
            tick_interval_secs: default_tick_interval(),
            reminder_at: default_morning(),
            due_today_at: default_morning(),
            catch_up_every_secs: default_catch_up_every(),
            mark_overdue_at: default_mark_overdue_at(),
        }
    }
}

pub const MAX_TICK_INTERVAL_SECS: u64 = 3_600;
pub const MAX_CATCH_UP_EVERY_SECS: u64 = 7 * 86_400;
pub const MAX_BASE_RETRY_SECS: u64 = 86_400;
/// Upper bound for the remaining queue timers.
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Parse an `HH:MM` time of day.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| BillNotifyError::Config(format!("Invalid time of day '{s}' (expected HH:MM): {e}")))
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reminder_window_days == 0 {
            return Err(BillNotifyError::Config("reminder_window_days must be at least 1".into()));
        }
        if self.tick_interval_secs == 0 || self.catch_up_every_secs == 0 {
            return Err(BillNotifyError::Config("scheduler intervals must be greater than 0".into()));
        }
        if self.tick_interval_secs > MAX_TICK_INTERVAL_SECS {
            return Err(BillNotifyError::Config(format!(
                "scheduler.tick_interval_secs must be at most {MAX_TICK_INTERVAL_SECS}"
            )));
        }
        if self.catch_up_every_secs > MAX_CATCH_UP_EVERY_SECS {
            return Err(BillNotifyError::Config(format!(
                "scheduler.catch_up_every_secs must be at most {MAX_CATCH_UP_EVERY_SECS}"
            )));
        }
        parse_time_of_day(&self.reminder_at)?;
        parse_time_of_day(&self.due_today_at)?;
        parse_time_of_day(&self.mark_overdue_at)?;
        Ok(())
    }
}

/// Durable queue, worker pool, rate limit and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_rate")]
    pub rate_per_sec: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_pop_timeout")]
    pub pop_timeout_secs: u64,
    #[serde(default = "default_base_retry")]
    pub base_retry_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_housekeeping")]
    pub housekeeping_interval_secs: u64,
    /// Where exhausted tasks are parked. `None` logs and drops them.
    #[serde(default)]
    pub dead_letter_queue: Option<String>,
}

fn default_redis_url() -> String { "redis://127.0.0.1:6379".into() }
fn default_queue_name() -> String { "billnotify:queue:notifications".into() }
fn default_workers() -> usize { 10 }
fn default_rate() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_pop_timeout() -> u64 { 5 }
fn default_base_retry() -> u64 { 300 }
fn default_max_attempts() -> u32 { 3 }
fn default_housekeeping() -> u64 { 3600 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            name: default_queue_name(),
            workers: default_workers(),
            rate_per_sec: default_rate(),
            burst: default_burst(),
            pop_timeout_secs: default_pop_timeout(),
            base_retry_secs: default_base_retry(),
            max_attempts: default_max_attempts(),
            housekeeping_interval_secs: default_housekeeping(),
            dead_letter_queue: None,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(BillNotifyError::Config("queue.workers must be at least 1".into()));
        }
        if self.rate_per_sec == 0 || self.burst == 0 {
            return Err(BillNotifyError::Config("queue.rate_per_sec and queue.burst must be greater than 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(BillNotifyError::Config("queue.max_attempts must be at least 1".into()));
        }
        if self.pop_timeout_secs == 0 {
            // BRPOP treats 0 as "block forever".
            return Err(BillNotifyError::Config("queue.pop_timeout_secs must be at least 1".into()));
        }
        if self.base_retry_secs > MAX_BASE_RETRY_SECS {
            return Err(BillNotifyError::Config(format!(
                "queue.base_retry_secs must be at most {MAX_BASE_RETRY_SECS}"
            )));
        }
        if self.pop_timeout_secs > MAX_INTERVAL_SECS || self.housekeeping_interval_secs > MAX_INTERVAL_SECS {
            return Err(BillNotifyError::Config(format!(
                "queue.pop_timeout_secs and queue.housekeeping_interval_secs must be at most {MAX_INTERVAL_SECS}"
            )));
        }
        if self.name.trim().is_empty() {
            return Err(BillNotifyError::Config("queue.name must not be empty".into()));
        }
        Ok(())
    }
}

/// SQLite billing store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.billnotify/billing.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Evolution API (WhatsApp) sender settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_evolution_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_evolution_url() -> String { "http://127.0.0.1:8081".into() }
fn default_http_timeout() -> u64 { 30 }

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_evolution_url(),
            api_key: String::new(),
            timeout_secs: default_http_timeout(),
        }
    }
}

/// SMTP e-mail sender settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from")]
    pub from: String,
}

fn default_smtp_port() -> u16 { 587 }
fn default_from() -> String { "BillNotify <no-reply@billnotify.local>".into() }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: default_from(),
        }
    }
}

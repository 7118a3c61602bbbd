//! # BillNotify — business-hours billing notifications
//!
//! Usage:
//!   billnotify run                               # Scheduler + worker pool daemon
//!   billnotify trigger reminders                 # Run one job body once
//!   billnotify stats                             # Queue depth and rate limits
//!   billnotify calendar --at 2026-03-13T19:00:00-03:00
//!   billnotify add-record --tenant acme --name "Ana" --email ana@example.com \
//!       --amount 150.00 --due 2026-03-13

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use billnotify_channels::{EmailSender, WhatsAppSender};
use billnotify_core::clock::{Clock, SystemClock};
use billnotify_core::config::Config;
use billnotify_core::traits::ChannelSender;
use billnotify_scheduler::{
    BusinessCalendar, Dispatcher, Job, NewBillingRecord, NotificationQueue, RedisQueueStore, Scheduler,
    SqliteBillingStore, TokenBucket, WorkerPool,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "billnotify", version, about = "📅 BillNotify — billing reminders within business hours")]
struct Cli {
    /// Config file (default: ~/.billnotify/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the worker pool until Ctrl-C
    Run,
    /// Run one job once: reminders, due-today, catch-up, mark-overdue
    Trigger {
        #[arg(value_parser = parse_job)]
        job: Job,
    },
    /// Show queue statistics
    Stats,
    /// Report whether messaging is allowed at an instant, and when it next is
    Calendar {
        /// RFC 3339 instant (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Insert a billing record
    AddRecord {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Amount in reais, e.g. 150.00
        #[arg(long)]
        amount: String,
        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due: NaiveDate,
        #[arg(long, default_value = "")]
        description: String,
        /// WhatsApp instance the tenant sends through
        #[arg(long)]
        whatsapp_instance: Option<String>,
    },
}

fn parse_job(s: &str) -> std::result::Result<Job, String> {
    Job::parse(s).ok_or_else(|| format!("unknown job '{s}' (reminders, due-today, catch-up, mark-overdue)"))
}

/// Parse `150`, `150.5` or `150,05` into cents.
fn parse_amount_cents(s: &str) -> Result<i64> {
    let normalized = s.trim().replace(',', ".");
    if normalized.starts_with('-') {
        bail!("amount must not be negative");
    }
    let (whole, frac) = normalized.split_once('.').unwrap_or((normalized.as_str(), ""));
    if frac.len() > 2 || whole.is_empty() {
        bail!("invalid amount '{s}'");
    }
    let whole: i64 = whole.parse().with_context(|| format!("invalid amount '{s}'"))?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().with_context(|| format!("invalid amount '{s}'"))? * 10,
        _ => frac.parse().with_context(|| format!("invalid amount '{s}'"))?,
    };
    whole
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(frac))
        .with_context(|| format!("amount '{s}' is too large"))
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(p) => {
            let mut config = Config::load_from(&PathBuf::from(shellexpand::tilde(p).to_string()))?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Shared components built once at startup.
struct App {
    config: Config,
    calendar: Arc<BusinessCalendar>,
    db: Arc<SqliteBillingStore>,
    queue: Arc<NotificationQueue>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl App {
    async fn build(config: Config) -> Result<Self> {
        let calendar = Arc::new(BusinessCalendar::from_config(&config.calendar)?);
        let db = Arc::new(SqliteBillingStore::open(&config.database_path())?);

        let queue = match RedisQueueStore::open(&config.queue.redis_url) {
            Ok(store) => NotificationQueue::connect(Arc::new(store), &config.queue).await,
            Err(e) => {
                tracing::warn!("⚠️ {e}; notifications will be sent directly");
                NotificationQueue::disabled(&config.queue)
            }
        };

        let mut channels: Vec<Arc<dyn ChannelSender>> = Vec::new();
        if config.whatsapp.enabled {
            match WhatsAppSender::new(config.whatsapp.clone()) {
                Ok(sender) => channels.push(Arc::new(sender)),
                Err(e) => tracing::warn!("⚠️ WhatsApp disabled: {e}"),
            }
        }
        if config.email.enabled {
            match EmailSender::new(&config.email) {
                Ok(sender) => channels.push(Arc::new(sender)),
                Err(e) => tracing::warn!("⚠️ Email disabled: {e}"),
            }
        }
        let dispatcher = Dispatcher::new(channels);
        if dispatcher.channel_names().is_empty() {
            tracing::warn!("⚠️ No channel configured; every dispatch will fail");
        } else {
            tracing::info!("📡 Channels: {}", dispatcher.channel_names().join(", "));
        }

        Ok(Self {
            config,
            calendar,
            db,
            queue: Arc::new(queue),
            dispatcher,
            clock: Arc::new(SystemClock),
        })
    }

    fn scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::new(
            self.calendar.clone(),
            self.db.clone(),
            self.queue.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            &self.config,
        )?)
    }

    fn worker_pool(&self) -> WorkerPool {
        let limiter = Arc::new(TokenBucket::new(self.config.queue.rate_per_sec, self.config.queue.burst));
        WorkerPool::new(
            self.queue.clone(),
            limiter,
            self.dispatcher.clone(),
            self.calendar.clone(),
            self.clock.clone(),
            &self.config.queue,
        )
    }
}

async fn run(app: App) -> Result<()> {
    let scheduler = Arc::new(app.scheduler()?);
    for (job, at) in scheduler.upcoming() {
        tracing::info!("   {:<13} next at {}", job.as_str(), at.with_timezone(&app.calendar.timezone()));
    }

    let scheduler = scheduler.spawn();
    let pool = Arc::new(app.worker_pool()).spawn();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("🛑 Shutting down...");
    scheduler.stop().await;
    pool.shutdown().await;
    Ok(())
}

async fn trigger(app: App, job: Job) -> Result<()> {
    let scheduler = app.scheduler()?;
    for report in scheduler.run_trigger(job).await? {
        println!(
            "{:<13} scanned={} enqueued={} direct={} claimed={} updated={} failed={}{}",
            report.job.as_str(),
            report.scanned,
            report.enqueued,
            report.sent_direct,
            report.already_claimed,
            report.updated,
            report.failed,
            if report.skipped_closed { " (outside business hours)" } else { "" }
        );
    }
    Ok(())
}

async fn stats(app: App) -> Result<()> {
    if !app.queue.is_enabled() {
        println!("⚠️  Queue '{}' unavailable", app.queue.name());
        return Ok(());
    }
    let stats = app.queue.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn calendar_report(config: &Config, at: Option<&str>) -> Result<()> {
    let calendar = BusinessCalendar::from_config(&config.calendar)?;
    let instant = match at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid instant '{s}'"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let local = instant.with_timezone(&calendar.timezone());

    println!("🗓️  {} ({})", local.format("%d/%m/%Y %H:%M"), calendar.timezone());
    println!("   Hours:     {:02}h–{:02}h", calendar.start_hour(), calendar.end_hour());
    if calendar.is_open(instant) {
        println!("   Status:    ✅ open");
    } else {
        println!("   Status:    ⏸️  closed");
        println!("   Next open: {}", calendar.describe_next_open(instant));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add_record(
    config: &Config,
    tenant: &str,
    name: &str,
    email: Option<&str>,
    phone: Option<&str>,
    amount: &str,
    due: NaiveDate,
    description: &str,
    whatsapp_instance: Option<&str>,
) -> Result<()> {
    let db = SqliteBillingStore::open(&config.database_path())?;
    let customer_id = db.insert_customer(name, email, phone)?;
    if let Some(instance) = whatsapp_instance {
        db.set_whatsapp_instance(tenant, instance)?;
    }
    let id = db.insert_record(&NewBillingRecord {
        tenant_id: tenant.to_string(),
        customer_id,
        amount_cents: parse_amount_cents(amount)?,
        description: description.to_string(),
        due_date: due,
    })?;
    println!("✅ Record {id} created for {name}, due {}", due.format("%d/%m/%Y"));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "billnotify=debug,billnotify_scheduler=debug,billnotify_channels=debug"
    } else {
        "billnotify=info,billnotify_scheduler=info,billnotify_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => {
            println!("📅 BillNotify v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Database: {}", config.database_path().display());
            println!("   📦 Queue:    {} ({})", config.queue.name, config.queue.redis_url);
            println!("   👷 Workers:  {} @ {}/s (burst {})", config.queue.workers, config.queue.rate_per_sec, config.queue.burst);
            run(App::build(config).await?).await
        }
        Command::Trigger { job } => trigger(App::build(config).await?, job).await,
        Command::Stats => stats(App::build(config).await?).await,
        Command::Calendar { at } => calendar_report(&config, at.as_deref()),
        Command::AddRecord { tenant, name, email, phone, amount, due, description, whatsapp_instance } => add_record(
            &config,
            &tenant,
            &name,
            email.as_deref(),
            phone.as_deref(),
            &amount,
            due,
            &description,
            whatsapp_instance.as_deref(),
        ),
    }
}

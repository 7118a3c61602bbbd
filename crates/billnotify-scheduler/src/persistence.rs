//! SQLite-backed billing store — the records the scheduler scans and flags.
//!
//! Dates are stored as `YYYY-MM-DD` text so range filters compare
//! lexicographically. Notification flags only move from 0 to 1.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use billnotify_core::error::{BillNotifyError, Result};
use billnotify_core::traits::BillingSource;
use billnotify_core::types::{BillingRecord, Customer, NotificationKind, RecordId, RecordStatus};
use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row, params};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_RECORD: &str = "
    SELECT r.id, r.tenant_id, c.id, c.name, c.email, c.phone,
           r.amount_cents, r.description, r.due_date, r.status,
           r.reminder_sent, r.due_sent, w.instance_name
    FROM billing_records r
    JOIN customers c ON c.id = r.customer_id
    LEFT JOIN whatsapp_instances w ON w.tenant_id = r.tenant_id";

/// A record to insert; the id is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewBillingRecord {
    pub tenant_id: String,
    pub customer_id: i64,
    pub amount_cents: i64,
    pub description: String,
    pub due_date: NaiveDate,
}

pub struct SqliteBillingStore {
    conn: Mutex<Connection>,
}

fn repo_err(context: &str, e: impl std::fmt::Display) -> BillNotifyError {
    BillNotifyError::Repository(format!("{context}: {e}"))
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<BillingRecord> {
    let due_raw: String = row.get(8)?;
    let due_date = NaiveDate::parse_from_str(&due_raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;
    let status_raw: String = row.get(9)?;
    let status = RecordStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown status '{status_raw}'").into(),
        )
    })?;

    Ok(BillingRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        customer: Customer {
            id: row.get(2)?,
            name: row.get(3)?,
            email: row.get(4)?,
            phone: row.get(5)?,
        },
        amount_cents: row.get(6)?,
        description: row.get(7)?,
        due_date,
        status,
        reminder_sent: row.get::<_, i64>(10)? != 0,
        due_sent: row.get::<_, i64>(11)? != 0,
        whatsapp_instance: row.get(12)?,
    })
}

impl SqliteBillingStore {
    /// Open or create the billing database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| repo_err("DB open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| repo_err("DB open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| repo_err("Lock", e))
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                created_at TEXT DEFAULT (datetime('now'))
            );

            -- One chat instance per tenant
            CREATE TABLE IF NOT EXISTS whatsapp_instances (
                tenant_id TEXT PRIMARY KEY,
                instance_name TEXT NOT NULL,
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS billing_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                customer_id INTEGER NOT NULL REFERENCES customers(id),
                amount_cents INTEGER NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                due_date TEXT NOT NULL,          -- YYYY-MM-DD
                status TEXT NOT NULL DEFAULT 'PENDING',
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                due_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT DEFAULT (datetime('now')),
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_billing_status_due
                ON billing_records(status, due_date);
            ",
            )
            .map_err(|e| repo_err("Migration", e))
    }

    pub fn insert_customer(&self, name: &str, email: Option<&str>, phone: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO customers (name, email, phone) VALUES (?1, ?2, ?3)",
            params![name, email, phone],
        )
        .map_err(|e| repo_err("Insert customer", e))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_record(&self, record: &NewBillingRecord) -> Result<RecordId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO billing_records (tenant_id, customer_id, amount_cents, description, due_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.tenant_id,
                record.customer_id,
                record.amount_cents,
                record.description,
                fmt_date(record.due_date),
            ],
        )
        .map_err(|e| repo_err("Insert record", e))?;
        Ok(conn.last_insert_rowid())
    }

    /// Bind the tenant's WhatsApp instance (insert or replace).
    pub fn set_whatsapp_instance(&self, tenant_id: &str, instance_name: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO whatsapp_instances (tenant_id, instance_name) VALUES (?1, ?2)
                 ON CONFLICT(tenant_id) DO UPDATE SET instance_name = ?2, updated_at = datetime('now')",
                params![tenant_id, instance_name],
            )
            .map_err(|e| repo_err("Set instance", e))?;
        Ok(())
    }

    pub fn get_record(&self, id: RecordId) -> Result<Option<BillingRecord>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{SELECT_RECORD} WHERE r.id = ?1"), params![id], row_to_record)
            .optional()
            .map_err(|e| repo_err("Get record", e))
    }

    fn query_records(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<BillingRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_RECORD} WHERE {filter} ORDER BY r.due_date, r.id"))
            .map_err(|e| repo_err("Prepare", e))?;
        let rows = stmt
            .query_map(args, row_to_record)
            .map_err(|e| repo_err("Query", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| repo_err("Row", e))
    }
}

#[async_trait]
impl BillingSource for SqliteBillingStore {
    async fn records_due_for_reminder(&self, today: NaiveDate, window_days: u32) -> Result<Vec<BillingRecord>> {
        let target = fmt_date(today + Duration::days(i64::from(window_days)));
        self.query_records(
            "r.status = 'PENDING' AND r.due_date = ?1 AND r.reminder_sent = 0",
            &[&target],
        )
    }

    async fn records_due_today(&self, today: NaiveDate) -> Result<Vec<BillingRecord>> {
        let today = fmt_date(today);
        self.query_records("r.status = 'PENDING' AND r.due_date = ?1 AND r.due_sent = 0", &[&today])
    }

    async fn overdue_candidates(&self, today: NaiveDate) -> Result<Vec<BillingRecord>> {
        let today = fmt_date(today);
        self.query_records("r.status = 'PENDING' AND r.due_date < ?1", &[&today])
    }

    async fn set_notification_flag(&self, id: RecordId, kind: NotificationKind) -> Result<bool> {
        let column = kind.flag_column();
        let changed = self
            .conn()?
            .execute(
                &format!(
                    "UPDATE billing_records SET {column} = 1, updated_at = datetime('now')
                     WHERE id = ?1 AND {column} = 0"
                ),
                params![id],
            )
            .map_err(|e| repo_err("Set flag", e))?;
        Ok(changed == 1)
    }

    async fn update_status(&self, id: RecordId, status: RecordStatus) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE billing_records SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![id, status.as_str()],
            )
            .map_err(|e| repo_err("Update status", e))?;
        if changed == 0 {
            return Err(BillNotifyError::Repository(format!("record {id} not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn seeded() -> (SqliteBillingStore, i64) {
        let store = SqliteBillingStore::open_in_memory().unwrap();
        let customer = store
            .insert_customer("Ana Souza", Some("ana@example.com"), Some("(11) 98765-4321"))
            .unwrap();
        (store, customer)
    }

    fn new_record(customer_id: i64, due: NaiveDate) -> NewBillingRecord {
        NewBillingRecord {
            tenant_id: "acme".into(),
            customer_id,
            amount_cents: 12_990,
            description: "Mensalidade".into(),
            due_date: due,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (store, customer) = seeded();
        store.set_whatsapp_instance("acme", "acme-main").unwrap();
        let id = store.insert_record(&new_record(customer, date(3, 13))).unwrap();

        let record = store.get_record(id).unwrap().unwrap();
        assert_eq!(record.customer.name, "Ana Souza");
        assert_eq!(record.due_date, date(3, 13));
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.whatsapp_instance.as_deref(), Some("acme-main"));
        assert!(!record.reminder_sent && !record.due_sent);
        assert!(store.get_record(999).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reminder_window_is_exact() {
        let (store, customer) = seeded();
        let in_three = store.insert_record(&new_record(customer, date(3, 13))).unwrap();
        store.insert_record(&new_record(customer, date(3, 12))).unwrap();
        store.insert_record(&new_record(customer, date(3, 14))).unwrap();

        let found = store.records_due_for_reminder(date(3, 10), 3).await.unwrap();
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![in_three]);
    }

    #[tokio::test]
    async fn test_flagged_records_excluded() {
        let (store, customer) = seeded();
        let id = store.insert_record(&new_record(customer, date(3, 10))).unwrap();
        assert_eq!(store.records_due_today(date(3, 10)).await.unwrap().len(), 1);

        assert!(store.set_notification_flag(id, NotificationKind::DueToday).await.unwrap());
        assert!(store.records_due_today(date(3, 10)).await.unwrap().is_empty());
        // Second claim loses.
        assert!(!store.set_notification_flag(id, NotificationKind::DueToday).await.unwrap());
        // The other flag is independent.
        assert!(store.set_notification_flag(id, NotificationKind::Reminder).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_pending_excluded() {
        let (store, customer) = seeded();
        let id = store.insert_record(&new_record(customer, date(3, 10))).unwrap();
        store.update_status(id, RecordStatus::Paid).await.unwrap();
        assert!(store.records_due_today(date(3, 10)).await.unwrap().is_empty());
        assert!(store.overdue_candidates(date(3, 20)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overdue_candidates_and_status() {
        let (store, customer) = seeded();
        let past = store.insert_record(&new_record(customer, date(3, 1))).unwrap();
        store.insert_record(&new_record(customer, date(3, 10))).unwrap();

        let overdue = store.overdue_candidates(date(3, 10)).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, past);

        store.update_status(past, RecordStatus::Overdue).await.unwrap();
        assert_eq!(store.get_record(past).unwrap().unwrap().status, RecordStatus::Overdue);
        assert!(store.update_status(12345, RecordStatus::Overdue).await.is_err());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = std::env::temp_dir().join(format!("billnotify-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("billing.db");
        {
            let store = SqliteBillingStore::open(&path).unwrap();
            store.insert_customer("Rui", None, None).unwrap();
        }
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}

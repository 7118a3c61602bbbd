//! # BillNotify Core
//!
//! Shared building blocks for the notification pipeline:
//! configuration, the error taxonomy, billing-record types, the clock
//! abstraction and the collaborator traits the scheduler depends on.

pub mod clock;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{BillNotifyError, Result};
pub use traits::{BillingSource, ChannelSender};
pub use types::{BillingRecord, Customer, Destination, NotificationKind, OutgoingMessage, RecordId, RecordStatus};

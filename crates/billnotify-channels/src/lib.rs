//! # BillNotify Channels
//! Outbound channel senders behind the uniform `ChannelSender` trait.
//!
//! - `whatsapp`: chat messages through an Evolution API gateway
//! - `email`: SMTP delivery via lettre

pub mod email;
pub mod phone;
pub mod whatsapp;

pub use email::EmailSender;
pub use whatsapp::WhatsAppSender;

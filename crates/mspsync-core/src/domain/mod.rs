//! # Domain Models
//!
//! Canonical records every provider adapter normalizes into.
//!
//! | Type | Family | Description |
//! |------|--------|-------------|
//! | [`Company`] | PSA | Customer account |
//! | [`Contact`] | PSA | Person at a customer |
//! | [`Ticket`] | PSA | Service ticket with canonical status/priority |
//! | [`Device`] | RMM | Managed endpoint |
//! | [`Alert`] | RMM | Monitoring alert |
//! | [`SoftwareItem`] | RMM | Installed application |
//! | [`UtcDateTime`] | shared | UTC timestamp |
//!
//! Cross-record references inside canonical records (`company_id`,
//! `contact_id`, `device_id`) carry the *provider's* ids. Translation to local
//! ids happens when records are persisted.

mod hash;
mod psa;
mod rmm;
mod timestamp;

pub use hash::change_hash;
pub use psa::{Company, Contact, Ticket, TicketPriority, TicketStatus};
pub use rmm::{Alert, AlertSeverity, AlertStatus, Device, DeviceType, OsType, SoftwareItem};
pub use timestamp::UtcDateTime;

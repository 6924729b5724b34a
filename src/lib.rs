//! Ticketflow - ticket workflow engine on SQLite
//!
//! Tickets move through a fixed status state machine, every change lands in
//! an append-only audit ledger, and two sub-workflows hang off each ticket:
//! pauses (which force the status) and progress requests (which don't).
//! Notifications fan out to a user, a role or everyone, with read state kept
//! per recipient.
//!
//! # Statuses
//!
//! | Status | Leaves to |
//! |--------|-----------|
//! | `OPEN` | PAUSED, CONFIRMED, CLOSED, CANCELLED |
//! | `PAUSED` | OPEN, CONFIRMED, CANCELLED |
//! | `CONFIRMED` | OPEN, PAUSED, CLOSED, CANCELLED |
//! | `CLOSED` | REOPENED |
//! | `REOPENED` | OPEN, CONFIRMED, CLOSED, CANCELLED |
//! | `CANCELLED` | - |
//!
//! # Quick Start
//!
//! ```no_run
//! use ticketflow::{Actor, Database, NewTicketInput, Role, TicketStatus};
//!
//! let db = Database::new("ticketflow.db").unwrap();
//! let me = Actor::new("alice", Role::Editor);
//!
//! let ticket = db.create_ticket(NewTicketInput::titled("Leaking pipe"), &me).unwrap();
//! db.add_comment(ticket.id, "Valve closed for now", &me).unwrap();
//! let closed = db.change_status(ticket.id, TicketStatus::Closed, Some("fixed"), None, &me).unwrap();
//!
//! // The description now holds the closing digest
//! println!("{}", closed.description.unwrap_or_default());
//! ```

#[macro_use]
mod macros;

pub mod actor;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod pause;
pub mod progress;
pub mod schema;
pub mod serve;
pub mod status;
pub mod summary;
pub mod tickets;

pub use actor::{Actor, Role};
pub use config::Config;
pub use dashboard::{StatusCounts, TicketFilter};
pub use db::{
    AuditAction, Comment, Database, Notification, PauseRecord, ProgressRequest, ProgressUpdate,
    Ticket, CURRENT_SCHEMA,
};
pub use error::{Error, Result};
pub use notify::{
    Audience, NewNotification, NotificationKind, NotificationStats, NotificationView, Priority,
};
pub use pause::{pause_duration_hours, PauseView};
pub use progress::{is_overdue, ProgressFilter, ProgressRequestView, ProgressStatus};
pub use status::{ActionKind, TicketStatus};
pub use summary::render_summary;
pub use tickets::{NewTicketInput, TicketDetail, TicketEdit};

// Re-export TS trait for downstream use
#[cfg(feature = "ts-rs")]
pub use ts_rs::TS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        assert_eq!(CURRENT_SCHEMA.name, "ticket-workflow");
        assert_eq!(TicketStatus::ALL.len(), 6);
    }
}

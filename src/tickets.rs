//! Ticket aggregate and the status-change operation
//!
//! `change_status` is the only path through the transition table. Pause and
//! resume bypass it (see `pause`), everything else goes through here.

use crate::actor::Actor;
use crate::db::{last_insert_id, now_ts, AuditAction, Comment, Database, NewTicket, Ticket};
use crate::error::{Error, Result};
use crate::ledger::{append_action, load_actions, load_comments, LedgerEntry};
use crate::notify::{insert_notification, Audience, NewNotification, NotificationKind};
use crate::pause::{close_active_pause, load_pause_views, open_pause, PauseView};
use crate::progress::{load_request_views, ProgressRequestView};
use crate::schema::tickets;
use crate::status::{check_transition, ActionKind, TicketStatus};
use crate::summary::render_summary;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};

/// Input for `create_ticket`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTicketInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Caller-chosen external code; generated when absent
    #[serde(default)]
    pub external_code: Option<String>,
    #[serde(default)]
    pub is_blocking: bool,
}

impl NewTicketInput {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Field edits; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketEdit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_blocking: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Ticket with everything hanging off it
#[derive(Debug, Clone, Serialize)]
pub struct TicketDetail {
    pub ticket: Ticket,
    pub actions: Vec<AuditAction>,
    pub comments: Vec<Comment>,
    pub pauses: Vec<PauseView>,
    pub progress_requests: Vec<ProgressRequestView>,
}

/// Load a ticket regardless of soft-delete state
pub(crate) fn load_ticket(conn: &mut SqliteConnection, ticket_id: i32) -> Result<Ticket> {
    tickets::table
        .find(ticket_id)
        .first::<Ticket>(conn)
        .optional()?
        .ok_or_else(|| Error::not_found("ticket", ticket_id))
}

/// Load a ticket that may still be mutated (not soft-deleted)
pub(crate) fn load_live_ticket(conn: &mut SqliteConnection, ticket_id: i32) -> Result<Ticket> {
    let ticket = load_ticket(conn, ticket_id)?;
    if ticket.is_deleted {
        return Err(Error::not_found("ticket", ticket_id));
    }
    Ok(ticket)
}

/// Set status plus the modifier stamp
pub(crate) fn write_status(
    conn: &mut SqliteConnection,
    ticket_id: i32,
    status: TicketStatus,
    actor: &str,
    at: &str,
) -> Result<()> {
    diesel::update(tickets::table.find(ticket_id))
        .set((
            tickets::status.eq(status),
            tickets::last_modified_by.eq(actor),
            tickets::updated_at.eq(at),
        ))
        .execute(conn)?;
    Ok(())
}

fn generate_code(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        prefix,
        chrono::Utc::now().format("%Y%m%d"),
        &suffix[..6]
    )
}

fn is_unique_violation(e: &Error) -> bool {
    matches!(
        e,
        Error::Query(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
    )
}

impl Database {
    /// Create a ticket in OPEN with its Create ledger row and a global
    /// NewTicket notification, all in one transaction
    pub fn create_ticket(&self, input: NewTicketInput, actor: &Actor) -> Result<Ticket> {
        actor.require_mutate("create tickets")?;
        let title = input.title.trim();
        if title.is_empty() {
            return Err(Error::Validation("ticket title must not be empty".to_string()));
        }
        let code = match input.external_code.as_deref().map(str::trim) {
            Some("") => return Err(Error::Validation("external code must not be empty".to_string())),
            Some(code) => code.to_string(),
            None => generate_code(&self.config.tickets.code_prefix),
        };
        let priority = self.config.notifications.new_ticket_priority;
        let expires_at = self.notification_expiry();

        let ticket = self
            .write(|conn| {
                let taken = tickets::table
                    .filter(tickets::external_code.eq(&code))
                    .count()
                    .get_result::<i64>(conn)?;
                if taken > 0 {
                    return Err(Error::Conflict(format!("external code {} already exists", code)));
                }

                let now = now_ts();
                diesel::insert_into(tickets::table)
                    .values(&NewTicket {
                        external_code: &code,
                        title,
                        description: input.description.as_deref(),
                        status: TicketStatus::Open,
                        confirmation_status: None,
                        is_blocking: input.is_blocking,
                        resolution_date: None,
                        is_deleted: false,
                        is_active: true,
                        owner_id: &actor.id,
                        last_modified_by: &actor.id,
                        created_at: &now,
                        updated_at: &now,
                    })
                    .execute(conn)?;
                let id = last_insert_id(conn)?;

                append_action(
                    conn,
                    &LedgerEntry {
                        ticket_id: id,
                        kind: ActionKind::Create,
                        from: None,
                        to: Some(TicketStatus::Open),
                        notes: Some("Ticket created"),
                        actor: &actor.id,
                        at: &now,
                    },
                )?;

                insert_notification(
                    conn,
                    &NewNotification {
                        kind: NotificationKind::NewTicket,
                        priority,
                        ticket_id: Some(id),
                        progress_request_id: None,
                        title: format!("New ticket {}", code),
                        message: title.to_string(),
                        audience: Audience::Global,
                        requires_action: false,
                        expires_at,
                    },
                    &actor.id,
                    &now,
                )?;

                load_ticket(conn, id)
            })
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!("external code {} already exists", code))
                } else {
                    e
                }
            })?;

        tracing::info!(
            ticket_id = ticket.id,
            code = %ticket.external_code,
            actor = %actor.id,
            "ticket created"
        );
        Ok(ticket)
    }

    /// Validate and apply a status transition.
    ///
    /// Entering CLOSED stamps `resolution_date` and replaces the description
    /// with the rendered ledger digest. Entering or leaving PAUSED opens or
    /// closes the matching pause record.
    pub fn change_status(
        &self,
        ticket_id: i32,
        to: TicketStatus,
        notes: Option<&str>,
        confirmation: Option<&str>,
        actor: &Actor,
    ) -> Result<Ticket> {
        actor.require_mutate("change ticket status")?;
        let max_comments = self.config.summary.max_comments;

        let result = self.write(|conn| {
            let ticket = load_live_ticket(conn, ticket_id)?;
            let from = ticket.status;
            check_transition(from, to)?;

            let now = now_ts();
            append_action(
                conn,
                &LedgerEntry::status_change(ticket_id, from, to, notes, &actor.id, &now),
            )?;
            write_status(conn, ticket_id, to, &actor.id, &now)?;

            if let Some(label) = confirmation.map(str::trim).filter(|l| !l.is_empty()) {
                diesel::update(tickets::table.find(ticket_id))
                    .set(tickets::confirmation_status.eq(label))
                    .execute(conn)?;
            }

            if to == TicketStatus::Paused {
                let reason = notes.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("Paused");
                open_pause(conn, ticket_id, reason, &actor.id, &now)?;
            } else if from == TicketStatus::Paused {
                close_active_pause(conn, ticket_id, notes, &actor.id, &now)?;
            }

            if to == TicketStatus::Closed {
                diesel::update(tickets::table.find(ticket_id))
                    .set(tickets::resolution_date.eq(Some(now.as_str())))
                    .execute(conn)?;

                let closed = load_ticket(conn, ticket_id)?;
                let actions = load_actions(conn, ticket_id)?;
                let comments = load_comments(conn, ticket_id)?;
                let digest = render_summary(&closed, &actions, &comments, max_comments);
                diesel::update(tickets::table.find(ticket_id))
                    .set(tickets::description.eq(Some(digest)))
                    .execute(conn)?;
            }

            Ok((from, load_ticket(conn, ticket_id)?))
        });

        match result {
            Ok((from, ticket)) => {
                tracing::info!(ticket_id, %from, %to, actor = %actor.id, "status changed");
                Ok(ticket)
            }
            Err(e) => {
                tracing::debug!(ticket_id, %to, actor = %actor.id, error = %e, "status change rejected");
                Err(e)
            }
        }
    }

    /// Edit title/description/flags and record an Edit ledger row
    pub fn edit_ticket(&self, ticket_id: i32, edit: TicketEdit, actor: &Actor) -> Result<Ticket> {
        actor.require_mutate("edit tickets")?;
        if let Some(title) = &edit.title {
            if title.trim().is_empty() {
                return Err(Error::Validation("ticket title must not be empty".to_string()));
            }
        }

        let ticket = self.write(|conn| {
            let current = load_live_ticket(conn, ticket_id)?;

            let mut changed = Vec::new();
            let title = match edit.title.as_deref().map(str::trim) {
                Some(t) if t != current.title => {
                    changed.push("title");
                    t.to_string()
                }
                _ => current.title.clone(),
            };
            let description = match &edit.description {
                Some(d) if Some(d) != current.description.as_ref() => {
                    changed.push("description");
                    Some(d.clone())
                }
                _ => current.description.clone(),
            };
            let is_blocking = match edit.is_blocking {
                Some(b) if b != current.is_blocking => {
                    changed.push("blocking");
                    b
                }
                _ => current.is_blocking,
            };
            let is_active = match edit.is_active {
                Some(a) if a != current.is_active => {
                    changed.push("active");
                    a
                }
                _ => current.is_active,
            };

            if changed.is_empty() {
                return Ok(current);
            }

            let now = now_ts();
            diesel::update(tickets::table.find(ticket_id))
                .set((
                    tickets::title.eq(&title),
                    tickets::description.eq(description.as_deref()),
                    tickets::is_blocking.eq(is_blocking),
                    tickets::is_active.eq(is_active),
                    tickets::last_modified_by.eq(&actor.id),
                    tickets::updated_at.eq(&now),
                ))
                .execute(conn)?;

            let notes = format!("Edited: {}", changed.join(", "));
            append_action(
                conn,
                &LedgerEntry::plain(ticket_id, ActionKind::Edit, Some(&notes), &actor.id, &now),
            )?;
            load_ticket(conn, ticket_id)
        })?;

        tracing::info!(ticket_id, actor = %actor.id, "ticket edited");
        Ok(ticket)
    }

    /// Hide a ticket from default listings. Ledger rows stay.
    pub fn soft_delete_ticket(&self, ticket_id: i32, actor: &Actor) -> Result<Ticket> {
        actor.require_admin("delete tickets")?;
        let ticket = self.write(|conn| {
            load_live_ticket(conn, ticket_id)?;
            let now = now_ts();
            diesel::update(tickets::table.find(ticket_id))
                .set((
                    tickets::is_deleted.eq(true),
                    tickets::last_modified_by.eq(&actor.id),
                    tickets::updated_at.eq(&now),
                ))
                .execute(conn)?;
            append_action(
                conn,
                &LedgerEntry::plain(ticket_id, ActionKind::Edit, Some("Deleted"), &actor.id, &now),
            )?;
            load_ticket(conn, ticket_id)
        })?;
        tracing::info!(ticket_id, actor = %actor.id, "ticket soft-deleted");
        Ok(ticket)
    }

    pub fn restore_ticket(&self, ticket_id: i32, actor: &Actor) -> Result<Ticket> {
        actor.require_admin("restore tickets")?;
        let ticket = self.write(|conn| {
            let current = load_ticket(conn, ticket_id)?;
            if !current.is_deleted {
                return Err(Error::Conflict(format!("ticket {} is not deleted", ticket_id)));
            }
            let now = now_ts();
            diesel::update(tickets::table.find(ticket_id))
                .set((
                    tickets::is_deleted.eq(false),
                    tickets::last_modified_by.eq(&actor.id),
                    tickets::updated_at.eq(&now),
                ))
                .execute(conn)?;
            append_action(
                conn,
                &LedgerEntry::plain(ticket_id, ActionKind::Edit, Some("Restored"), &actor.id, &now),
            )?;
            load_ticket(conn, ticket_id)
        })?;
        tracing::info!(ticket_id, actor = %actor.id, "ticket restored");
        Ok(ticket)
    }

    pub fn get_ticket(&self, ticket_id: i32) -> Result<Ticket> {
        self.read(|conn| load_ticket(conn, ticket_id))
    }

    pub fn get_ticket_by_code(&self, code: &str) -> Result<Ticket> {
        self.read(|conn| {
            tickets::table
                .filter(tickets::external_code.eq(code))
                .first::<Ticket>(conn)
                .optional()?
                .ok_or_else(|| Error::not_found("ticket", code))
        })
    }

    /// Ticket with ledger, comments, pauses and progress requests
    pub fn ticket_detail(&self, ticket_id: i32) -> Result<TicketDetail> {
        let now = chrono::Utc::now();
        self.read(|conn| {
            let ticket = load_ticket(conn, ticket_id)?;
            Ok(TicketDetail {
                actions: load_actions(conn, ticket_id)?,
                comments: load_comments(conn, ticket_id)?,
                pauses: load_pause_views(conn, ticket_id, now)?,
                progress_requests: load_request_views(conn, ticket_id, now)?,
                ticket,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{admin, editor, temp_db, viewer};
    use TicketStatus::*;

    fn status_changes(db: &Database, ticket_id: i32) -> Vec<(TicketStatus, TicketStatus)> {
        db.get_actions(ticket_id)
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ActionKind::StatusChange)
            .map(|a| (a.from_status.unwrap(), a.to_status.unwrap()))
            .collect()
    }

    #[test]
    fn test_create_ticket_starts_open_with_one_create_row() {
        let (_dir, db) = temp_db();
        let ticket = db
            .create_ticket(NewTicketInput::titled("Elevator stuck"), &editor("u1"))
            .unwrap();

        assert_eq!(ticket.status, Open);
        assert!(ticket.external_code.starts_with("TCK-"));
        assert!(ticket.resolution_date.is_none());
        assert_eq!(ticket.owner_id, "u1");

        let actions = db.get_actions(ticket.id).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Create);
    }

    #[test]
    fn test_duplicate_external_code_conflicts() {
        let (_dir, db) = temp_db();
        let mut input = NewTicketInput::titled("Door");
        input.external_code = Some("MNT-1".to_string());
        db.create_ticket(input.clone(), &editor("u1")).unwrap();

        assert!(matches!(
            db.create_ticket(input, &editor("u1")),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_viewer_cannot_create() {
        let (_dir, db) = temp_db();
        assert!(matches!(
            db.create_ticket(NewTicketInput::titled("x"), &viewer("v")),
            Err(Error::Forbidden { .. })
        ));
    }

    #[test]
    fn test_change_status_missing_ticket() {
        let (_dir, db) = temp_db();
        assert!(matches!(
            db.change_status(42, Closed, None, None, &editor("u1")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_rejected_transition_writes_nothing() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let mut input = NewTicketInput::titled("Pump noise");
        input.description = Some("rattles at night".to_string());
        let t = db.create_ticket(input, &u1).unwrap();
        db.change_status(t.id, Closed, Some("fixed"), None, &u1).unwrap();
        let before = db.get_ticket(t.id).unwrap();
        let ledger_before = db.get_actions(t.id).unwrap().len();

        let err = db.change_status(t.id, Confirmed, None, None, &u1).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { from: Closed, to: Confirmed }));

        let after = db.get_ticket(t.id).unwrap();
        assert_eq!(after.status, Closed);
        assert_eq!(after.description, before.description);
        assert_eq!(db.get_actions(t.id).unwrap().len(), ledger_before);
    }

    #[test]
    fn test_every_pair_from_open_matches_table() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        for to in TicketStatus::ALL.iter().copied() {
            let t = db.create_ticket(NewTicketInput::titled("grid"), &u1).unwrap();
            let outcome = db.change_status(t.id, to, None, None, &u1);
            assert_eq!(outcome.is_ok(), Open.can_transition_to(to), "OPEN -> {}", to);
            if outcome.is_err() {
                assert_eq!(db.get_ticket(t.id).unwrap().status, Open);
                assert_eq!(db.get_actions(t.id).unwrap().len(), 1);
            }
        }
    }

    #[test]
    fn test_close_stamps_resolution_and_rewrites_description() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let mut input = NewTicketInput::titled("Roof leak");
        input.description = Some("water in hallway".to_string());
        input.is_blocking = true;
        let t = db.create_ticket(input, &u1).unwrap();
        db.add_comment(t.id, "Bucket placed", &u1).unwrap();
        db.change_status(t.id, Confirmed, Some("seen on site"), Some("Verified"), &u1)
            .unwrap();

        let closed = db.change_status(t.id, Closed, Some("patched"), None, &u1).unwrap();

        assert_eq!(closed.status, Closed);
        assert_eq!(closed.confirmation_status.as_deref(), Some("Verified"));
        let resolved = closed.resolution_date.clone().unwrap();
        assert_eq!(resolved, closed.updated_at);

        let digest = closed.description.unwrap();
        assert!(digest.contains("Roof leak"));
        assert!(!digest.contains("water in hallway"));
        assert!(digest.contains("Bucket placed"));
        let open_confirmed = digest.find("OPEN -> CONFIRMED").unwrap();
        let confirmed_closed = digest.find("CONFIRMED -> CLOSED").unwrap();
        assert!(open_confirmed < confirmed_closed);
    }

    #[test]
    fn test_reopen_keeps_resolution_and_reclose_restamps() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Heater"), &u1).unwrap();
        let first = db.change_status(t.id, Closed, None, None, &u1).unwrap();
        let reopened = db.change_status(t.id, Reopened, Some("still cold"), None, &u1).unwrap();
        assert_eq!(reopened.resolution_date, first.resolution_date);

        let second = db.change_status(t.id, Closed, None, None, &u1).unwrap();
        assert!(second.resolution_date.unwrap() > first.resolution_date.unwrap());
    }

    #[test]
    fn test_cancelled_has_no_exit() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Dup"), &u1).unwrap();
        db.change_status(t.id, Cancelled, Some("duplicate"), None, &u1).unwrap();
        for to in TicketStatus::ALL.iter().copied() {
            assert!(db.change_status(t.id, to, None, None, &u1).is_err());
        }
    }

    #[test]
    fn test_pause_through_change_status_round_trip() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Chiller"), &u1).unwrap();

        db.change_status(t.id, Paused, Some("waiting on parts"), None, &u1).unwrap();
        let active = db.active_pause(t.id).unwrap().unwrap();
        assert_eq!(active.reason, "waiting on parts");

        db.change_status(t.id, Open, Some("parts arrived"), None, &u1).unwrap();
        assert!(db.active_pause(t.id).unwrap().is_none());
        assert_eq!(status_changes(&db, t.id), vec![(Open, Paused), (Paused, Open)]);
    }

    #[test]
    fn test_edit_records_changed_fields() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Window"), &u1).unwrap();

        let edited = db
            .edit_ticket(
                t.id,
                TicketEdit {
                    title: Some("Cracked window".to_string()),
                    is_blocking: Some(true),
                    ..Default::default()
                },
                &editor("u2"),
            )
            .unwrap();
        assert_eq!(edited.title, "Cracked window");
        assert!(edited.is_blocking);
        assert_eq!(edited.last_modified_by, "u2");

        let last = db.get_actions(t.id).unwrap().pop().unwrap();
        assert_eq!(last.kind, ActionKind::Edit);
        assert_eq!(last.notes.as_deref(), Some("Edited: title, blocking"));

        // No-op edit appends nothing
        db.edit_ticket(t.id, TicketEdit::default(), &u1).unwrap();
        assert_eq!(db.get_actions(t.id).unwrap().len(), 2);
    }

    #[test]
    fn test_soft_delete_blocks_mutation_until_restored() {
        let (_dir, db) = temp_db();
        let t = db.create_ticket(NewTicketInput::titled("Old"), &editor("u1")).unwrap();

        assert!(db.soft_delete_ticket(t.id, &editor("u1")).is_err());
        db.soft_delete_ticket(t.id, &admin("root")).unwrap();
        assert!(matches!(
            db.change_status(t.id, Closed, None, None, &editor("u1")),
            Err(Error::NotFound { .. })
        ));
        assert!(db.get_ticket(t.id).unwrap().is_deleted);

        db.restore_ticket(t.id, &admin("root")).unwrap();
        db.change_status(t.id, Closed, None, None, &editor("u1")).unwrap();
    }

    #[test]
    fn test_detail_collects_children() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Boiler"), &u1).unwrap();
        db.create_pause(t.id, "night shift", &u1).unwrap();
        db.create_progress_request(t.id, "u2", "status?", None, &u1).unwrap();

        let detail = db.ticket_detail(t.id).unwrap();
        assert_eq!(detail.ticket.status, Paused);
        assert_eq!(detail.pauses.len(), 1);
        assert!(detail.pauses[0].is_active);
        assert_eq!(detail.progress_requests.len(), 1);
        assert_eq!(detail.actions.len(), 2);
        assert_eq!(db.get_ticket_by_code(&t.external_code).unwrap().id, t.id);
    }
}

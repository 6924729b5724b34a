//! Append-only audit ledger and comments
//!
//! Rows are only ever inserted. Every subsystem that touches a ticket appends
//! here from inside its own transaction, so a failed write never leaves a
//! ledger row behind.

use crate::actor::Actor;
use crate::db::{
    last_insert_id, now_ts, AuditAction, Comment, Database, NewAuditAction, NewComment,
};
use crate::error::{Error, Result};
use crate::schema::{audit_actions, comments};
use crate::status::{ActionKind, TicketStatus};
use crate::tickets::load_live_ticket;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Ledger entry to append
#[derive(Debug, Clone)]
pub(crate) struct LedgerEntry<'a> {
    pub ticket_id: i32,
    pub kind: ActionKind,
    pub from: Option<TicketStatus>,
    pub to: Option<TicketStatus>,
    pub notes: Option<&'a str>,
    pub actor: &'a str,
    pub at: &'a str,
}

impl<'a> LedgerEntry<'a> {
    pub fn status_change(
        ticket_id: i32,
        from: TicketStatus,
        to: TicketStatus,
        notes: Option<&'a str>,
        actor: &'a str,
        at: &'a str,
    ) -> Self {
        Self {
            ticket_id,
            kind: ActionKind::StatusChange,
            from: Some(from),
            to: Some(to),
            notes,
            actor,
            at,
        }
    }

    pub fn plain(
        ticket_id: i32,
        kind: ActionKind,
        notes: Option<&'a str>,
        actor: &'a str,
        at: &'a str,
    ) -> Self {
        Self {
            ticket_id,
            kind,
            from: None,
            to: None,
            notes,
            actor,
            at,
        }
    }
}

pub(crate) fn append_action(conn: &mut SqliteConnection, entry: &LedgerEntry<'_>) -> Result<i32> {
    let row = NewAuditAction {
        ticket_id: entry.ticket_id,
        kind: entry.kind,
        from_status: entry.from,
        to_status: entry.to,
        notes: entry.notes.filter(|n| !n.trim().is_empty()),
        performed_by: entry.actor,
        created_at: entry.at,
    };

    diesel::insert_into(audit_actions::table)
        .values(&row)
        .execute(conn)?;

    last_insert_id(conn)
}

/// Insert a comment together with its Comment-kind ledger row
pub(crate) fn append_comment(
    conn: &mut SqliteConnection,
    ticket_id: i32,
    body: &str,
    author: &str,
    at: &str,
) -> Result<i32> {
    diesel::insert_into(comments::table)
        .values(&NewComment {
            ticket_id,
            body,
            author_id: author,
            created_at: at,
        })
        .execute(conn)?;
    let comment_id = last_insert_id(conn)?;

    append_action(
        conn,
        &LedgerEntry::plain(ticket_id, ActionKind::Comment, Some(body), author, at),
    )?;

    Ok(comment_id)
}

/// Ledger rows for a ticket, by timestamp then insertion order
pub(crate) fn load_actions(conn: &mut SqliteConnection, ticket_id: i32) -> Result<Vec<AuditAction>> {
    let rows = audit_actions::table
        .filter(audit_actions::ticket_id.eq(ticket_id))
        .order((audit_actions::created_at.asc(), audit_actions::id.asc()))
        .load::<AuditAction>(conn)?;
    Ok(rows)
}

pub(crate) fn load_comments(conn: &mut SqliteConnection, ticket_id: i32) -> Result<Vec<Comment>> {
    let rows = comments::table
        .filter(comments::ticket_id.eq(ticket_id))
        .order((comments::created_at.asc(), comments::id.asc()))
        .load::<Comment>(conn)?;
    Ok(rows)
}

impl Database {
    /// Add a user comment to a ticket's timeline
    pub fn add_comment(&self, ticket_id: i32, body: &str, actor: &Actor) -> Result<Comment> {
        actor.require_mutate("comment on tickets")?;
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::Validation("comment body must not be empty".to_string()));
        }

        let comment = self.write(|conn| {
            load_live_ticket(conn, ticket_id)?;
            let now = now_ts();
            let id = append_comment(conn, ticket_id, body, &actor.id, &now)?;
            Ok(comments::table.find(id).first::<Comment>(conn)?)
        })?;

        tracing::info!(ticket_id, comment_id = comment.id, actor = %actor.id, "comment added");
        Ok(comment)
    }

    /// Full ledger of a ticket, oldest first
    pub fn get_actions(&self, ticket_id: i32) -> Result<Vec<AuditAction>> {
        self.read(|conn| load_actions(conn, ticket_id))
    }

    pub fn get_comments(&self, ticket_id: i32) -> Result<Vec<Comment>> {
        self.read(|conn| load_comments(conn, ticket_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::db::testing::{editor, temp_db, viewer};
    use crate::error::Error;
    use crate::status::ActionKind;
    use crate::tickets::NewTicketInput;

    #[test]
    fn test_comment_pairs_with_ledger_row() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let ticket = db.create_ticket(NewTicketInput::titled("Leaking valve"), &u1).unwrap();

        db.add_comment(ticket.id, "Ordered a replacement gasket", &u1).unwrap();

        let comments = db.get_comments(ticket.id).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author_id, "u1");

        let actions = db.get_actions(ticket.id).unwrap();
        let kinds: Vec<ActionKind> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Create, ActionKind::Comment]);
        assert_eq!(actions[1].notes.as_deref(), Some("Ordered a replacement gasket"));
    }

    #[test]
    fn test_comment_rejects_blank_and_viewers() {
        let (_dir, db) = temp_db();
        let ticket = db.create_ticket(NewTicketInput::titled("Broken lamp"), &editor("u1")).unwrap();

        assert!(matches!(
            db.add_comment(ticket.id, "   ", &editor("u1")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            db.add_comment(ticket.id, "hi", &viewer("v1")),
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            db.add_comment(9999, "hi", &editor("u1")),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(db.get_actions(ticket.id).unwrap().len(), 1);
    }
}

//! Pause / resume sub-workflow
//!
//! A pause forces the ticket into PAUSED without consulting the transition
//! table, and resuming forces it back to OPEN. At most one pause per ticket
//! is active (`resumed_at IS NULL`); the check runs inside the write
//! transaction and a partial unique index backs it up.

use crate::actor::Actor;
use crate::db::{last_insert_id, now_ts, parse_ts, Database, NewPause, PauseRecord};
use crate::error::{Error, Result};
use crate::ledger::{append_action, LedgerEntry};
use crate::schema::pauses;
use crate::status::TicketStatus;
use crate::tickets::{load_live_ticket, write_status};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;

/// Whole hours between `paused_at` and `resumed_at`, or `now` while active
pub fn pause_duration_hours(
    paused_at: DateTime<Utc>,
    resumed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    let end = resumed_at.unwrap_or(now);
    (end - paused_at).num_hours().max(0)
}

/// Pause record with its duration computed at read time
#[derive(Debug, Clone, Serialize)]
pub struct PauseView {
    #[serde(flatten)]
    pub pause: PauseRecord,
    pub is_active: bool,
    pub duration_hours: i64,
}

impl PauseView {
    pub fn at(pause: PauseRecord, now: DateTime<Utc>) -> Self {
        let duration_hours = match parse_ts(&pause.paused_at) {
            Some(start) => {
                let end = pause.resumed_at.as_deref().and_then(parse_ts);
                pause_duration_hours(start, end, now)
            }
            None => 0,
        };
        Self {
            is_active: pause.resumed_at.is_none(),
            duration_hours,
            pause,
        }
    }
}

pub(crate) fn find_active_pause(
    conn: &mut SqliteConnection,
    ticket_id: i32,
) -> Result<Option<PauseRecord>> {
    let row = pauses::table
        .filter(pauses::ticket_id.eq(ticket_id))
        .filter(pauses::resumed_at.is_null())
        .first::<PauseRecord>(conn)
        .optional()?;
    Ok(row)
}

/// Insert a new active pause; `Conflict` when one is already open
pub(crate) fn open_pause(
    conn: &mut SqliteConnection,
    ticket_id: i32,
    reason: &str,
    actor: &str,
    at: &str,
) -> Result<i32> {
    if let Some(active) = find_active_pause(conn, ticket_id)? {
        return Err(Error::Conflict(format!(
            "ticket {} already has active pause {}",
            ticket_id, active.id
        )));
    }

    diesel::insert_into(pauses::table)
        .values(&NewPause {
            ticket_id,
            paused_at: at,
            reason,
            paused_by: actor,
        })
        .execute(conn)?;

    last_insert_id(conn)
}

fn close_pause(
    conn: &mut SqliteConnection,
    pause_id: i32,
    notes: Option<&str>,
    actor: &str,
    at: &str,
) -> Result<()> {
    diesel::update(pauses::table.find(pause_id))
        .set((
            pauses::resumed_at.eq(Some(at)),
            pauses::resumed_by.eq(Some(actor)),
            pauses::resume_notes.eq(notes.filter(|n| !n.trim().is_empty())),
        ))
        .execute(conn)?;
    Ok(())
}

/// Close the active pause, if any. Used when a status change leaves PAUSED.
pub(crate) fn close_active_pause(
    conn: &mut SqliteConnection,
    ticket_id: i32,
    notes: Option<&str>,
    actor: &str,
    at: &str,
) -> Result<Option<i32>> {
    match find_active_pause(conn, ticket_id)? {
        Some(active) => {
            close_pause(conn, active.id, notes, actor, at)?;
            Ok(Some(active.id))
        }
        None => Ok(None),
    }
}

pub(crate) fn load_pause_views(
    conn: &mut SqliteConnection,
    ticket_id: i32,
    now: DateTime<Utc>,
) -> Result<Vec<PauseView>> {
    let rows = pauses::table
        .filter(pauses::ticket_id.eq(ticket_id))
        .order((pauses::paused_at.asc(), pauses::id.asc()))
        .load::<PauseRecord>(conn)?;
    Ok(rows.into_iter().map(|p| PauseView::at(p, now)).collect())
}

impl Database {
    /// Suspend work on a ticket
    pub fn create_pause(&self, ticket_id: i32, reason: &str, actor: &Actor) -> Result<PauseRecord> {
        actor.require_mutate("pause tickets")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::Validation("pause reason is required".to_string()));
        }

        let (from, pause) = self.write(|conn| {
            let ticket = load_live_ticket(conn, ticket_id)?;
            let from = ticket.status;
            if from == TicketStatus::Paused {
                return Err(Error::Conflict(format!("ticket {} is already paused", ticket_id)));
            }
            if !from.can_pause() {
                return Err(Error::InvalidTransition {
                    from,
                    to: TicketStatus::Paused,
                });
            }

            let now = now_ts();
            let pause_id = open_pause(conn, ticket_id, reason, &actor.id, &now)?;
            write_status(conn, ticket_id, TicketStatus::Paused, &actor.id, &now)?;
            append_action(
                conn,
                &LedgerEntry::status_change(
                    ticket_id,
                    from,
                    TicketStatus::Paused,
                    Some(reason),
                    &actor.id,
                    &now,
                ),
            )?;

            Ok((from, pauses::table.find(pause_id).first::<PauseRecord>(conn)?))
        })?;

        tracing::info!(ticket_id, pause_id = pause.id, %from, actor = %actor.id, "ticket paused");
        Ok(pause)
    }

    /// End a pause and put the ticket back to OPEN
    pub fn resume_pause(&self, pause_id: i32, notes: Option<&str>, actor: &Actor) -> Result<PauseRecord> {
        actor.require_mutate("resume tickets")?;

        let pause = self.write(|conn| {
            let pause = pauses::table
                .find(pause_id)
                .first::<PauseRecord>(conn)
                .optional()?
                .ok_or_else(|| Error::not_found("pause", pause_id))?;
            if pause.resumed_at.is_some() {
                return Err(Error::Conflict(format!("pause {} was already resumed", pause_id)));
            }

            let ticket = load_live_ticket(conn, pause.ticket_id)?;
            let now = now_ts();
            close_pause(conn, pause_id, notes, &actor.id, &now)?;
            write_status(conn, ticket.id, TicketStatus::Open, &actor.id, &now)?;
            append_action(
                conn,
                &LedgerEntry::status_change(
                    ticket.id,
                    ticket.status,
                    TicketStatus::Open,
                    notes,
                    &actor.id,
                    &now,
                ),
            )?;

            Ok(pauses::table.find(pause_id).first::<PauseRecord>(conn)?)
        })?;

        tracing::info!(
            ticket_id = pause.ticket_id,
            pause_id,
            actor = %actor.id,
            "ticket resumed"
        );
        Ok(pause)
    }

    pub fn active_pause(&self, ticket_id: i32) -> Result<Option<PauseRecord>> {
        self.read(|conn| find_active_pause(conn, ticket_id))
    }

    /// Pauses of a ticket with durations as of now
    pub fn list_pauses(&self, ticket_id: i32) -> Result<Vec<PauseView>> {
        let now = Utc::now();
        self.read(|conn| load_pause_views(conn, ticket_id, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{editor, temp_db, viewer};
    use crate::status::ActionKind;
    use crate::tickets::NewTicketInput;
    use chrono::Duration;
    use proptest::prelude::*;
    use TicketStatus::*;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_ts(raw).unwrap()
    }

    #[test]
    fn test_duration_floors_to_hours() {
        let start = at("2026-03-01T08:00:00Z");
        let end = at("2026-03-01T10:59:59Z");
        assert_eq!(pause_duration_hours(start, Some(end), start), 2);
        assert_eq!(pause_duration_hours(start, None, start + Duration::minutes(59)), 0);
        assert_eq!(pause_duration_hours(start, None, start + Duration::hours(30)), 30);
    }

    proptest! {
        #[test]
        fn resumed_duration_ignores_now(minutes in 0i64..100_000, later in 0i64..100_000) {
            let start = at("2026-01-01T00:00:00Z");
            let end = start + Duration::minutes(minutes);
            let now = end + Duration::minutes(later);
            prop_assert_eq!(pause_duration_hours(start, Some(end), now), minutes / 60);
        }
    }

    #[test]
    fn test_view_of_resumed_pause() {
        let pause = PauseRecord {
            id: 1,
            ticket_id: 1,
            paused_at: "2026-03-01T08:00:00.000000Z".to_string(),
            resumed_at: Some("2026-03-01T13:30:00.000000Z".to_string()),
            reason: "parts".to_string(),
            resume_notes: None,
            paused_by: "u1".to_string(),
            resumed_by: Some("u1".to_string()),
        };
        let view = PauseView::at(pause, at("2027-01-01T00:00:00Z"));
        assert!(!view.is_active);
        assert_eq!(view.duration_hours, 5);
    }

    #[test]
    fn test_pause_scenario_two_status_changes() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Compressor"), &u1).unwrap();

        db.change_status(t.id, Paused, Some("awaiting vendor"), None, &u1).unwrap();
        assert!(matches!(
            db.create_pause(t.id, "again", &u1),
            Err(Error::Conflict(_))
        ));

        let active = db.active_pause(t.id).unwrap().unwrap();
        db.resume_pause(active.id, Some("vendor came"), &u1).unwrap();

        assert_eq!(db.get_ticket(t.id).unwrap().status, Open);
        let changes: Vec<(Option<TicketStatus>, Option<TicketStatus>)> = db
            .get_actions(t.id)
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ActionKind::StatusChange)
            .map(|a| (a.from_status, a.to_status))
            .collect();
        assert_eq!(changes, vec![(Some(Open), Some(Paused)), (Some(Paused), Some(Open))]);
    }

    #[test]
    fn test_create_pause_forces_paused_from_open() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Fan"), &u1).unwrap();

        let pause = db.create_pause(t.id, "holiday", &u1).unwrap();
        assert!(pause.resumed_at.is_none());
        assert_eq!(pause.reason, "holiday");
        assert_eq!(db.get_ticket(t.id).unwrap().status, Paused);

        let last = db.get_actions(t.id).unwrap().pop().unwrap();
        assert_eq!(last.notes.as_deref(), Some("holiday"));
    }

    #[test]
    fn test_pause_bypasses_table_from_reopened() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Gate"), &u1).unwrap();
        db.change_status(t.id, Closed, None, None, &u1).unwrap();
        db.change_status(t.id, Reopened, None, None, &u1).unwrap();
        db.create_pause(t.id, "x", &u1).unwrap();
        assert_eq!(db.get_ticket(t.id).unwrap().status, Paused);
    }

    #[test]
    fn test_closed_ticket_can_pause_and_resume() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Shed"), &u1).unwrap();
        db.change_status(t.id, Closed, None, None, &u1).unwrap();

        let pause = db.create_pause(t.id, "warranty claim", &u1).unwrap();
        assert_eq!(db.get_ticket(t.id).unwrap().status, Paused);
        let last = db.get_actions(t.id).unwrap().pop().unwrap();
        assert_eq!((last.from_status, last.to_status), (Some(Closed), Some(Paused)));

        db.resume_pause(pause.id, None, &u1).unwrap();
        assert_eq!(db.get_ticket(t.id).unwrap().status, Open);
    }

    #[test]
    fn test_cancelled_ticket_cannot_pause() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Kiosk"), &u1).unwrap();
        db.change_status(t.id, Cancelled, None, None, &u1).unwrap();
        assert!(matches!(
            db.create_pause(t.id, "x", &u1),
            Err(Error::InvalidTransition { from: Cancelled, to: Paused })
        ));
        assert!(db.active_pause(t.id).unwrap().is_none());
    }

    #[test]
    fn test_resume_twice_conflicts_and_missing_is_not_found() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Pipe"), &u1).unwrap();
        let pause = db.create_pause(t.id, "freeze", &u1).unwrap();

        let resumed = db.resume_pause(pause.id, None, &editor("u2")).unwrap();
        assert_eq!(resumed.resumed_by.as_deref(), Some("u2"));
        assert!(resumed.resumed_at.is_some());

        assert!(matches!(
            db.resume_pause(pause.id, None, &u1),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            db.resume_pause(777, None, &u1),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_pause_requires_reason_and_editor() {
        let (_dir, db) = temp_db();
        let t = db.create_ticket(NewTicketInput::titled("Lift"), &editor("u1")).unwrap();
        assert!(matches!(
            db.create_pause(t.id, "  ", &editor("u1")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            db.create_pause(t.id, "x", &viewer("v")),
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(db.get_ticket(t.id).unwrap().status, Open);
    }

    #[test]
    fn test_repause_after_resume_lists_both() {
        let (_dir, db) = temp_db();
        let u1 = editor("u1");
        let t = db.create_ticket(NewTicketInput::titled("Boiler"), &u1).unwrap();
        let first = db.create_pause(t.id, "one", &u1).unwrap();
        db.resume_pause(first.id, None, &u1).unwrap();
        db.create_pause(t.id, "two", &u1).unwrap();

        let views = db.list_pauses(t.id).unwrap();
        assert_eq!(views.len(), 2);
        assert!(!views[0].is_active);
        assert!(views[1].is_active);
        assert_eq!(views[0].duration_hours, 0);
    }
}

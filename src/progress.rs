//! Progress requests
//!
//! A requester asks a target user for a status narrative on a ticket. The
//! request runs its own small lifecycle next to the ticket status:
//!
//! ```text
//! Pending -> InProgress -> Responded
//! Pending | InProgress -> Cancelled   (Admin)
//! ```
//!
//! Every update appends a history row and the `current_*` snapshot on the
//! request is rewritten from it in the same transaction.

use crate::actor::Actor;
use crate::db::{
    format_ts, last_insert_id, now_ts, parse_ts, Database, NewProgressRequest, NewProgressUpdate,
    ProgressRequest, ProgressUpdate,
};
use crate::error::{Error, Result};
use crate::ledger::append_comment;
use crate::notify::{
    insert_notification, pending_for_request, resolve_in, Audience, NewNotification,
    NotificationKind, Priority,
};
use crate::schema::{progress_requests, progress_updates, tickets};
use crate::tickets::load_live_ticket;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashMap;

text_enum! {
    /// Lifecycle of a progress request
    pub enum ProgressStatus {
        Pending => "Pending",
        InProgress => "InProgress",
        Responded => "Responded",
        Cancelled => "Cancelled",
    }
}

impl ProgressStatus {
    /// Responded and Cancelled accept no further changes
    pub fn is_closed(self) -> bool {
        matches!(self, ProgressStatus::Responded | ProgressStatus::Cancelled)
    }
}

text_enum! {
    /// Which progress requests a feed shows
    pub enum ProgressFilter {
        /// Requested by the caller
        Mine => "mine",
        /// Targeted at the caller
        AssignedToMe => "assigned",
        /// Pending or InProgress
        Pending => "pending",
        Overdue => "overdue",
        All => "all",
    }
}

/// A request is overdue once its due date has passed without a response
pub fn is_overdue(due: Option<DateTime<Utc>>, responded: bool, now: DateTime<Utc>) -> bool {
    match due {
        Some(due) => !responded && due < now,
        None => false,
    }
}

/// Progress request with its derived overdue flag and update history
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRequestView {
    #[serde(flatten)]
    pub request: ProgressRequest,
    pub is_overdue: bool,
    pub updates: Vec<ProgressUpdate>,
}

impl ProgressRequestView {
    fn at(request: ProgressRequest, updates: Vec<ProgressUpdate>, now: DateTime<Utc>) -> Self {
        let due = request.due_date.as_deref().and_then(parse_ts);
        Self {
            is_overdue: is_overdue(due, request.responded, now),
            updates,
            request,
        }
    }
}

fn load_request(conn: &mut SqliteConnection, request_id: i32) -> Result<ProgressRequest> {
    progress_requests::table
        .find(request_id)
        .first::<ProgressRequest>(conn)
        .optional()?
        .ok_or_else(|| Error::not_found("progress request", request_id))
}

fn load_open_request(conn: &mut SqliteConnection, request_id: i32) -> Result<ProgressRequest> {
    let request = load_request(conn, request_id)?;
    if request.status.is_closed() {
        return Err(Error::Conflict(format!(
            "progress request {} is already {}",
            request_id, request.status
        )));
    }
    Ok(request)
}

fn load_updates(conn: &mut SqliteConnection, request_ids: Vec<i32>) -> Result<HashMap<i32, Vec<ProgressUpdate>>> {
    let rows = progress_updates::table
        .filter(progress_updates::request_id.eq_any(request_ids))
        .order((progress_updates::created_at.asc(), progress_updates::id.asc()))
        .load::<ProgressUpdate>(conn)?;

    let mut grouped: HashMap<i32, Vec<ProgressUpdate>> = HashMap::new();
    for row in rows {
        grouped.entry(row.request_id).or_default().push(row);
    }
    Ok(grouped)
}

fn into_views(
    conn: &mut SqliteConnection,
    requests: Vec<ProgressRequest>,
    now: DateTime<Utc>,
) -> Result<Vec<ProgressRequestView>> {
    let mut updates = load_updates(conn, requests.iter().map(|r| r.id).collect())?;
    Ok(requests
        .into_iter()
        .map(|r| {
            let history = updates.remove(&r.id).unwrap_or_default();
            ProgressRequestView::at(r, history, now)
        })
        .collect())
}

pub(crate) fn load_request_views(
    conn: &mut SqliteConnection,
    ticket_id: i32,
    now: DateTime<Utc>,
) -> Result<Vec<ProgressRequestView>> {
    let requests = progress_requests::table
        .filter(progress_requests::ticket_id.eq(ticket_id))
        .order((progress_requests::requested_at.asc(), progress_requests::id.asc()))
        .load::<ProgressRequest>(conn)?;
    into_views(conn, requests, now)
}

fn insert_update(
    conn: &mut SqliteConnection,
    request_id: i32,
    actor: &str,
    narrative: &str,
    percentage: i32,
    eta: Option<&str>,
    at: &str,
) -> Result<()> {
    diesel::insert_into(progress_updates::table)
        .values(&NewProgressUpdate {
            request_id,
            updated_by: actor,
            progress: narrative,
            percentage,
            estimated_completion: eta,
            created_at: at,
        })
        .execute(conn)?;
    Ok(())
}

fn check_percentage(percentage: i32) -> Result<()> {
    if !(0..=100).contains(&percentage) {
        return Err(Error::Validation(format!(
            "percentage must be between 0 and 100, got {}",
            percentage
        )));
    }
    Ok(())
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", what)));
    }
    Ok(value)
}

impl Database {
    /// Ask `target` for a progress report and notify them in the same
    /// transaction
    pub fn create_progress_request(
        &self,
        ticket_id: i32,
        target: &str,
        message: &str,
        due_date: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<ProgressRequest> {
        actor.require_mutate("request progress")?;
        let target = required(target, "target user")?;
        let message = required(message, "request message")?;
        let due = due_date.map(format_ts);
        let priority = self.config.notifications.progress_request_priority;
        let expires_at = self.notification_expiry();

        let request = self.write(|conn| {
            let ticket = load_live_ticket(conn, ticket_id)?;
            let now = now_ts();
            diesel::insert_into(progress_requests::table)
                .values(&NewProgressRequest {
                    ticket_id,
                    requested_by: &actor.id,
                    target_id: target,
                    message,
                    requested_at: &now,
                    due_date: due.as_deref(),
                    current_percentage: 0,
                    responded: false,
                    status: ProgressStatus::Pending,
                })
                .execute(conn)?;
            let id = last_insert_id(conn)?;

            insert_notification(
                conn,
                &NewNotification {
                    kind: NotificationKind::ProgressRequest,
                    priority,
                    ticket_id: Some(ticket_id),
                    progress_request_id: Some(id),
                    title: format!("Progress requested on {}", ticket.external_code),
                    message: message.to_string(),
                    audience: Audience::User(target.to_string()),
                    requires_action: true,
                    expires_at,
                },
                &actor.id,
                &now,
            )?;

            load_request(conn, id)
        })?;

        tracing::info!(
            ticket_id,
            request_id = request.id,
            target,
            actor = %actor.id,
            "progress requested"
        );
        Ok(request)
    }

    /// Record an interim update; moves the request to InProgress
    pub fn update_progress(
        &self,
        request_id: i32,
        narrative: &str,
        percentage: i32,
        eta: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<ProgressRequest> {
        actor.require_mutate("update progress")?;
        let narrative = required(narrative, "progress narrative")?;
        check_percentage(percentage)?;
        let eta = eta.map(format_ts);
        let eta = eta.as_deref();

        let request = self.write(|conn| {
            let request = load_open_request(conn, request_id)?;
            let now = now_ts();
            insert_update(conn, request_id, &actor.id, narrative, percentage, eta, &now)?;
            diesel::update(progress_requests::table.find(request_id))
                .set((
                    progress_requests::current_progress.eq(Some(narrative)),
                    progress_requests::current_percentage.eq(percentage),
                    progress_requests::current_eta.eq(eta),
                    progress_requests::status.eq(ProgressStatus::InProgress),
                ))
                .execute(conn)?;

            let body = format!("Progress update ({}%): {}", percentage, narrative);
            append_comment(conn, request.ticket_id, &body, &actor.id, &now)?;
            load_request(conn, request_id)
        })?;

        tracing::info!(request_id, percentage, actor = %actor.id, "progress updated");
        Ok(request)
    }

    /// Final answer to a request. Resolves the request notification and
    /// tells the requester.
    pub fn respond(&self, request_id: i32, notes: &str, actor: &Actor) -> Result<ProgressRequest> {
        actor.require_mutate("respond to progress requests")?;
        let notes = required(notes, "response")?;
        let expires_at = self.notification_expiry();

        let request = self.write(|conn| {
            let request = load_open_request(conn, request_id)?;
            let now = now_ts();
            insert_update(conn, request_id, &actor.id, notes, 100, None, &now)?;
            diesel::update(progress_requests::table.find(request_id))
                .set((
                    progress_requests::current_progress.eq(Some(notes)),
                    progress_requests::current_percentage.eq(100),
                    progress_requests::responded.eq(true),
                    progress_requests::responded_at.eq(Some(now.as_str())),
                    progress_requests::responded_by.eq(Some(actor.id.as_str())),
                    progress_requests::status.eq(ProgressStatus::Responded),
                ))
                .execute(conn)?;

            let body = format!("Progress response: {}", notes);
            append_comment(conn, request.ticket_id, &body, &actor.id, &now)?;

            for id in pending_for_request(conn, request_id)? {
                resolve_in(conn, id, &actor.id, "responded", Some(notes), &now)?;
            }

            insert_notification(
                conn,
                &NewNotification {
                    kind: NotificationKind::ProgressResponded,
                    priority: Priority::Normal,
                    ticket_id: Some(request.ticket_id),
                    progress_request_id: Some(request_id),
                    title: format!("{} responded to your progress request", actor.id),
                    message: notes.to_string(),
                    audience: Audience::User(request.requested_by.clone()),
                    requires_action: false,
                    expires_at,
                },
                &actor.id,
                &now,
            )?;

            load_request(conn, request_id)
        })?;

        tracing::info!(request_id, actor = %actor.id, "progress request answered");
        Ok(request)
    }

    /// Withdraw an open request
    pub fn cancel_progress_request(&self, request_id: i32, actor: &Actor) -> Result<ProgressRequest> {
        actor.require_admin("cancel progress requests")?;

        let request = self.write(|conn| {
            load_open_request(conn, request_id)?;
            let now = now_ts();
            diesel::update(progress_requests::table.find(request_id))
                .set((
                    progress_requests::status.eq(ProgressStatus::Cancelled),
                    progress_requests::cancelled_at.eq(Some(now.as_str())),
                    progress_requests::cancelled_by.eq(Some(actor.id.as_str())),
                ))
                .execute(conn)?;
            for id in pending_for_request(conn, request_id)? {
                resolve_in(conn, id, &actor.id, "cancelled", None, &now)?;
            }
            load_request(conn, request_id)
        })?;

        tracing::info!(request_id, actor = %actor.id, "progress request cancelled");
        Ok(request)
    }

    pub fn get_progress_request(&self, request_id: i32) -> Result<ProgressRequestView> {
        let now = Utc::now();
        self.read(|conn| {
            let request = load_request(conn, request_id)?;
            let mut views = into_views(conn, vec![request], now)?;
            views
                .pop()
                .ok_or_else(|| Error::not_found("progress request", request_id))
        })
    }

    /// Requests on live tickets, newest first
    pub fn progress_feed(&self, actor: &Actor, filter: ProgressFilter) -> Result<Vec<ProgressRequestView>> {
        let now = Utc::now();
        let now_text = format_ts(now);
        self.read(|conn| {
            let mut query = progress_requests::table
                .inner_join(tickets::table)
                .filter(tickets::is_deleted.eq(false))
                .select(ProgressRequest::as_select())
                .into_boxed();

            query = match filter {
                ProgressFilter::Mine => query.filter(progress_requests::requested_by.eq(&actor.id)),
                ProgressFilter::AssignedToMe => query.filter(progress_requests::target_id.eq(&actor.id)),
                ProgressFilter::Pending => query.filter(
                    progress_requests::status.eq_any([ProgressStatus::Pending, ProgressStatus::InProgress]),
                ),
                ProgressFilter::Overdue => query
                    .filter(progress_requests::responded.eq(false))
                    .filter(progress_requests::due_date.lt(&now_text)),
                ProgressFilter::All => query,
            };

            let requests = query
                .order((progress_requests::requested_at.desc(), progress_requests::id.desc()))
                .load::<ProgressRequest>(conn)?;
            into_views(conn, requests, now)
        })
    }

    /// Update rows of a request, oldest first
    pub fn progress_history(&self, request_id: i32) -> Result<Vec<ProgressUpdate>> {
        self.read(|conn| {
            load_request(conn, request_id)?;
            let mut grouped = load_updates(conn, vec![request_id])?;
            Ok(grouped.remove(&request_id).unwrap_or_default())
        })
    }
}

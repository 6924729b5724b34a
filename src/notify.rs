//! Notification fan-out
//!
//! One row per notification, addressed to exactly one audience: a single
//! user, every holder of a role, or everyone. Read state is per recipient
//! and lives in `notification_reads`, so a global notification read by one
//! user stays unread for the rest.

use crate::actor::{Actor, Role};
use crate::db::{
    format_ts, last_insert_id, now_ts, Database, NewNotificationAction, NewNotificationRow,
    Notification, NotificationAction, NotificationRead,
};
use crate::error::{Error, Result};
use crate::schema::{notification_actions, notification_reads, notifications};
use crate::tickets::load_live_ticket;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

text_enum! {
    /// What a notification is about
    pub enum NotificationKind {
        NewTicket => "NewTicket",
        ProgressRequest => "ProgressRequest",
        ProgressResponded => "ProgressResponded",
        StatusChanged => "StatusChanged",
        TicketClosed => "TicketClosed",
        CommentAdded => "CommentAdded",
        TicketAssigned => "TicketAssigned",
    }
}

text_enum! {
    pub enum Priority {
        Low => "Low",
        Normal => "Normal",
        High => "High",
        Urgent => "Urgent",
    }
}

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target")]
pub enum Audience {
    User(String),
    Role(Role),
    Global,
}

impl Audience {
    fn columns(&self) -> (Option<&str>, Option<&str>, bool) {
        match self {
            Audience::User(id) => (Some(id.as_str()), None, false),
            Audience::Role(role) => (None, Some(role.as_str()), false),
            Audience::Global => (None, None, true),
        }
    }
}

/// Notification to send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub kind: NotificationKind,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub ticket_id: Option<i32>,
    #[serde(default)]
    pub progress_request_id: Option<i32>,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    #[serde(default)]
    pub requires_action: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_priority() -> Priority {
    Priority::Normal
}

/// A notification as one recipient sees it
#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub is_read: bool,
    pub read_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
    pub pending_action: usize,
}

/// Whether `actor` is in the notification's audience
pub fn is_visible_to(n: &Notification, actor: &Actor) -> bool {
    n.is_global
        || n.target_user_id.as_deref() == Some(actor.id.as_str())
        || n.target_role.as_deref() == Some(actor.role.as_str())
}

pub(crate) fn insert_notification(
    conn: &mut SqliteConnection,
    n: &NewNotification,
    creator: &str,
    at: &str,
) -> Result<i32> {
    let (target_user_id, target_role, is_global) = n.audience.columns();
    if target_user_id.is_some_and(|u| u.trim().is_empty()) {
        return Err(Error::Validation("notification target user must not be empty".to_string()));
    }
    let expires_at = n.expires_at.map(format_ts);

    diesel::insert_into(notifications::table)
        .values(&NewNotificationRow {
            kind: n.kind,
            priority: n.priority,
            ticket_id: n.ticket_id,
            progress_request_id: n.progress_request_id,
            title: &n.title,
            message: &n.message,
            created_by: creator,
            target_user_id,
            target_role,
            is_global,
            requires_action: n.requires_action,
            is_resolved: false,
            created_at: at,
            expires_at: expires_at.as_deref(),
        })
        .execute(conn)?;

    last_insert_id(conn)
}

fn load_notification(conn: &mut SqliteConnection, id: i32) -> Result<Notification> {
    notifications::table
        .find(id)
        .first::<Notification>(conn)
        .optional()?
        .ok_or_else(|| Error::not_found("notification", id))
}

fn insert_read(conn: &mut SqliteConnection, id: i32, user: &str, channel: &str, at: &str) -> Result<bool> {
    let inserted = diesel::insert_or_ignore_into(notification_reads::table)
        .values(&NotificationRead {
            notification_id: id,
            user_id: user.to_string(),
            read_at: at.to_string(),
            channel: channel.to_string(),
        })
        .execute(conn)?;
    Ok(inserted > 0)
}

/// Mark an action-required notification resolved and record the action.
/// No audience check; callers inside the engine resolve on a user's behalf.
pub(crate) fn resolve_in(
    conn: &mut SqliteConnection,
    id: i32,
    user: &str,
    action_type: &str,
    notes: Option<&str>,
    at: &str,
) -> Result<()> {
    let n = load_notification(conn, id)?;
    if !n.requires_action {
        return Err(Error::Validation(format!("notification {} does not require action", id)));
    }
    if n.is_resolved {
        return Err(Error::Conflict(format!("notification {} is already resolved", id)));
    }

    diesel::update(notifications::table.find(id))
        .set((
            notifications::is_resolved.eq(true),
            notifications::resolved_at.eq(Some(at)),
            notifications::resolved_by.eq(Some(user)),
        ))
        .execute(conn)?;

    diesel::insert_into(notification_actions::table)
        .values(&NewNotificationAction {
            notification_id: id,
            user_id: user,
            action_type,
            notes: notes.filter(|n| !n.trim().is_empty()),
            created_at: at,
        })
        .execute(conn)?;

    insert_read(conn, id, user, "action", at)?;
    Ok(())
}

/// Open action-required notifications attached to a progress request
pub(crate) fn pending_for_request(conn: &mut SqliteConnection, request_id: i32) -> Result<Vec<i32>> {
    let ids = notifications::table
        .filter(notifications::progress_request_id.eq(request_id))
        .filter(notifications::requires_action.eq(true))
        .filter(notifications::is_resolved.eq(false))
        .select(notifications::id)
        .load::<i32>(conn)?;
    Ok(ids)
}

impl Database {
    /// Expiry stamp for a notification created now, per config
    pub(crate) fn notification_expiry(&self) -> Option<DateTime<Utc>> {
        self.config
            .notifications
            .expire_after_hours
            .map(|h| Utc::now() + Duration::hours(h))
    }

    /// Send one notification
    pub fn notify(&self, n: NewNotification, actor: &Actor) -> Result<Notification> {
        actor.require_mutate("send notifications")?;
        if n.title.trim().is_empty() {
            return Err(Error::Validation("notification title must not be empty".to_string()));
        }
        let notification = self.write(|conn| {
            if let Some(ticket_id) = n.ticket_id {
                load_live_ticket(conn, ticket_id)?;
            }
            let id = insert_notification(conn, &n, &actor.id, &now_ts())?;
            load_notification(conn, id)
        })?;
        tracing::info!(
            notification_id = notification.id,
            kind = %notification.kind,
            actor = %actor.id,
            "notification sent"
        );
        Ok(notification)
    }

    /// Record that `actor` has seen a notification. Returns false when it was
    /// already read.
    pub fn mark_read(&self, id: i32, actor: &Actor, channel: &str) -> Result<bool> {
        let fresh = self.write(|conn| {
            let n = load_notification(conn, id)?;
            if !is_visible_to(&n, actor) {
                return Err(Error::Forbidden {
                    actor: actor.id.clone(),
                    action: "read this notification",
                });
            }
            insert_read(conn, id, &actor.id, channel, &now_ts())
        })?;
        if fresh {
            tracing::debug!(notification_id = id, user = %actor.id, channel, "notification read");
        }
        Ok(fresh)
    }

    /// Resolve an action-required notification addressed to `actor`
    pub fn resolve_notification(
        &self,
        id: i32,
        actor: &Actor,
        action_type: &str,
        notes: Option<&str>,
    ) -> Result<Notification> {
        let action_type = action_type.trim();
        if action_type.is_empty() {
            return Err(Error::Validation("action type must not be empty".to_string()));
        }

        let notification = self.write(|conn| {
            let n = load_notification(conn, id)?;
            if !is_visible_to(&n, actor) {
                return Err(Error::Forbidden {
                    actor: actor.id.clone(),
                    action: "resolve this notification",
                });
            }
            resolve_in(conn, id, &actor.id, action_type, notes, &now_ts())?;
            load_notification(conn, id)
        })?;
        tracing::info!(notification_id = id, action_type, actor = %actor.id, "notification resolved");
        Ok(notification)
    }

    /// Unexpired notifications addressed to `actor`, newest first
    pub fn notification_feed(&self, actor: &Actor, unread_only: bool) -> Result<Vec<NotificationView>> {
        let now = now_ts();
        let views = self.read(|conn| {
            let rows = notifications::table
                .filter(
                    notifications::target_user_id
                        .eq(&actor.id)
                        .or(notifications::target_role.eq(actor.role.as_str()))
                        .or(notifications::is_global.eq(true)),
                )
                .filter(
                    notifications::expires_at
                        .is_null()
                        .or(notifications::expires_at.gt(&now)),
                )
                .order((notifications::created_at.desc(), notifications::id.desc()))
                .load::<Notification>(conn)?;

            let ids: Vec<i32> = rows.iter().map(|n| n.id).collect();
            let reads: HashMap<i32, String> = notification_reads::table
                .filter(notification_reads::user_id.eq(&actor.id))
                .filter(notification_reads::notification_id.eq_any(ids))
                .load::<NotificationRead>(conn)?
                .into_iter()
                .map(|r| (r.notification_id, r.read_at))
                .collect();

            Ok(rows
                .into_iter()
                .map(|notification| {
                    let read_at = reads.get(&notification.id).cloned();
                    NotificationView {
                        is_read: read_at.is_some(),
                        read_at,
                        notification,
                    }
                })
                .collect::<Vec<_>>())
        })?;

        Ok(if unread_only {
            views.into_iter().filter(|v| !v.is_read).collect()
        } else {
            views
        })
    }

    pub fn notification_stats(&self, actor: &Actor) -> Result<NotificationStats> {
        let feed = self.notification_feed(actor, false)?;
        Ok(NotificationStats {
            total: feed.len(),
            unread: feed.iter().filter(|v| !v.is_read).count(),
            pending_action: feed
                .iter()
                .filter(|v| v.notification.requires_action && !v.notification.is_resolved)
                .count(),
        })
    }

    /// Actions recorded against a notification, oldest first
    pub fn notification_actions(&self, id: i32) -> Result<Vec<NotificationAction>> {
        self.read(|conn| {
            load_notification(conn, id)?;
            let rows = notification_actions::table
                .filter(notification_actions::notification_id.eq(id))
                .order(notification_actions::id.asc())
                .load::<NotificationAction>(conn)?;
            Ok(rows)
        })
    }
}

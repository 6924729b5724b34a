//! Closing digest
//!
//! Rendered from the reloaded ledger when a ticket enters CLOSED and written
//! over the ticket description. Pure: same inputs, same text.

use crate::db::{AuditAction, Comment, Ticket};
use crate::status::ActionKind;
use std::fmt::Write;

/// Render the digest of a ticket's history.
///
/// Comments are taken oldest first, at most `max_comments` of them.
pub fn render_summary(
    ticket: &Ticket,
    actions: &[AuditAction],
    comments: &[Comment],
    max_comments: usize,
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_summary(&mut out, ticket, actions, comments, max_comments);
    out
}

fn write_summary(
    out: &mut impl Write,
    ticket: &Ticket,
    actions: &[AuditAction],
    comments: &[Comment],
    max_comments: usize,
) -> std::fmt::Result {
    writeln!(out, "# {} ({})", ticket.title, ticket.external_code)?;
    writeln!(out)?;
    writeln!(out, "Status: {}", ticket.status)?;
    if let Some(label) = &ticket.confirmation_status {
        writeln!(out, "Confirmation: {}", label)?;
    }
    writeln!(out, "Created: {} by {}", ticket.created_at, ticket.owner_id)?;
    if let Some(resolved) = &ticket.resolution_date {
        writeln!(out, "Resolved: {}", resolved)?;
    }
    if ticket.is_blocking {
        writeln!(out, "[BLOCKING]")?;
    }

    let timeline: Vec<&AuditAction> = actions
        .iter()
        .filter(|a| matches!(a.kind, ActionKind::Create | ActionKind::StatusChange | ActionKind::Edit))
        .collect();

    if !timeline.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Timeline")?;
        writeln!(out)?;
        for action in timeline {
            write!(out, "- {} {}: ", action.created_at, action.performed_by)?;
            match (action.kind, action.from_status, action.to_status) {
                (ActionKind::StatusChange, Some(from), Some(to)) => write!(out, "{} -> {}", from, to)?,
                (ActionKind::Create, _, Some(to)) => write!(out, "created as {}", to)?,
                (kind, _, _) => write!(out, "{}", kind)?,
            }
            match &action.notes {
                Some(notes) => writeln!(out, " ({})", notes)?,
                None => writeln!(out)?,
            }
        }
    }

    if !comments.is_empty() && max_comments > 0 {
        let shown = comments.len().min(max_comments);
        writeln!(out)?;
        if shown < comments.len() {
            writeln!(out, "## Comments ({} of {})", shown, comments.len())?;
        } else {
            writeln!(out, "## Comments")?;
        }
        writeln!(out)?;
        for comment in comments.iter().take(shown) {
            writeln!(out, "- {} {}: {}", comment.created_at, comment.author_id, comment.body)?;
        }
    }

    Ok(())
}

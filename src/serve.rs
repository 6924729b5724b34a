//! JSON HTTP API
//!
//! `ticketflow serve` starts a tiny_http server. A fixed number of worker
//! threads pull requests off the shared listener and call into one shared
//! `Database`. The caller identity comes from the `X-Actor-Id` and
//! `X-Actor-Role` headers; authentication is someone else's job.

use crate::actor::{Actor, Role};
use crate::config::ServerConfig;
use crate::dashboard::TicketFilter;
use crate::db::Database;
use crate::error::Error;
use crate::notify::NewNotification;
use crate::progress::ProgressFilter;
use crate::status::TicketStatus;
use crate::tickets::{NewTicketInput, TicketEdit};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(error: &ApiError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Engine(#[from] Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("no route for {0}")]
    NoRoute(String),
}

impl ApiError {
    fn status(&self) -> u16 {
        match self {
            ApiError::Engine(e) => e.http_status(),
            ApiError::BadRequest(_) => 400,
            ApiError::NoRoute(_) => 404,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.code(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NoRoute(_) => "no_route",
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("invalid JSON: {}", e))
    }
}

impl From<serde_urlencoded::de::Error> for ApiError {
    fn from(e: serde_urlencoded::de::Error) -> Self {
        ApiError::BadRequest(format!("invalid query string: {}", e))
    }
}

type ApiResult = std::result::Result<Value, ApiError>;

// ============================================================================
// Request bodies and query strings
// ============================================================================

#[derive(Deserialize)]
struct StatusBody {
    status: TicketStatus,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    confirmation: Option<String>,
}

#[derive(Deserialize)]
struct CommentBody {
    body: String,
}

#[derive(Deserialize)]
struct PauseBody {
    reason: String,
}

#[derive(Deserialize, Default)]
struct NotesBody {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct ProgressRequestBody {
    target: String,
    message: String,
    #[serde(default)]
    due_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ProgressUpdateBody {
    progress: String,
    percentage: i32,
    #[serde(default)]
    eta: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RespondBody {
    notes: String,
}

#[derive(Deserialize, Default)]
struct ReadBody {
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Deserialize)]
struct ResolveBody {
    action_type: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize, Default)]
struct ListQuery {
    #[serde(default)]
    status: Option<TicketStatus>,
    #[serde(default)]
    include_deleted: bool,
}

#[derive(Deserialize, Default)]
struct FeedQuery {
    #[serde(default)]
    filter: Option<ProgressFilter>,
    #[serde(default)]
    unread_only: bool,
}

fn json_body<T: DeserializeOwned>(body: &str) -> std::result::Result<T, ApiError> {
    let body = if body.trim().is_empty() { "{}" } else { body };
    Ok(serde_json::from_str(body)?)
}

fn query<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, ApiError> {
    Ok(serde_urlencoded::from_str(raw)?)
}

fn id(segment: &str) -> std::result::Result<i32, ApiError> {
    segment
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not an id", segment)))
}

fn to_json<T: Serialize>(value: T) -> ApiResult {
    Ok(serde_json::to_value(value)?)
}

// ============================================================================
// Routing
// ============================================================================

/// Route one request. Returns the HTTP status and the JSON body.
pub fn dispatch(db: &Database, method: &Method, url: &str, actor: Option<&Actor>, body: &str) -> (u16, String) {
    let (path, raw_query) = url.split_once('?').unwrap_or((url, ""));
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let outcome = match actor {
        Some(actor) => route(db, method, &segments, raw_query, actor, body),
        None => Err(ApiError::BadRequest("missing X-Actor-Id header".to_string())),
    };

    match outcome {
        Ok(data) => (200, serde_json::to_string(&ApiResponse::success(data)).unwrap_or_default()),
        Err(e) => {
            if e.status() >= 500 {
                tracing::error!(%method, url, error = %e, "request failed");
            } else {
                tracing::debug!(%method, url, error = %e, "request rejected");
            }
            (
                e.status(),
                serde_json::to_string(&ApiResponse::failure(&e)).unwrap_or_default(),
            )
        }
    }
}

fn route(db: &Database, method: &Method, segments: &[&str], raw_query: &str, actor: &Actor, body: &str) -> ApiResult {
    match (method, segments) {
        // Tickets
        (Method::Get, ["api", "tickets"]) => {
            let q: ListQuery = query(raw_query)?;
            to_json(db.list_tickets(TicketFilter {
                status: q.status,
                include_deleted: q.include_deleted,
            })?)
        }
        (Method::Get, ["api", "tickets", "ongoing"]) => to_json(db.ongoing_tickets()?),
        (Method::Post, ["api", "tickets"]) => {
            let input: NewTicketInput = json_body(body)?;
            to_json(db.create_ticket(input, actor)?)
        }
        (Method::Get, ["api", "tickets", ticket]) => to_json(db.ticket_detail(id(ticket)?)?),
        (Method::Patch, ["api", "tickets", ticket]) => {
            let edit: TicketEdit = json_body(body)?;
            to_json(db.edit_ticket(id(ticket)?, edit, actor)?)
        }
        (Method::Delete, ["api", "tickets", ticket]) => to_json(db.soft_delete_ticket(id(ticket)?, actor)?),
        (Method::Post, ["api", "tickets", ticket, "restore"]) => to_json(db.restore_ticket(id(ticket)?, actor)?),
        (Method::Post, ["api", "tickets", ticket, "status"]) => {
            let b: StatusBody = json_body(body)?;
            to_json(db.change_status(
                id(ticket)?,
                b.status,
                b.notes.as_deref(),
                b.confirmation.as_deref(),
                actor,
            )?)
        }
        (Method::Get, ["api", "tickets", ticket, "comments"]) => to_json(db.get_comments(id(ticket)?)?),
        (Method::Post, ["api", "tickets", ticket, "comments"]) => {
            let b: CommentBody = json_body(body)?;
            to_json(db.add_comment(id(ticket)?, &b.body, actor)?)
        }
        (Method::Get, ["api", "tickets", ticket, "actions"]) => to_json(db.get_actions(id(ticket)?)?),

        // Pauses
        (Method::Get, ["api", "tickets", ticket, "pauses"]) => to_json(db.list_pauses(id(ticket)?)?),
        (Method::Post, ["api", "tickets", ticket, "pauses"]) => {
            let b: PauseBody = json_body(body)?;
            to_json(db.create_pause(id(ticket)?, &b.reason, actor)?)
        }
        (Method::Post, ["api", "pauses", pause, "resume"]) => {
            let b: NotesBody = json_body(body)?;
            to_json(db.resume_pause(id(pause)?, b.notes.as_deref(), actor)?)
        }

        // Progress requests
        (Method::Post, ["api", "tickets", ticket, "progress"]) => {
            let b: ProgressRequestBody = json_body(body)?;
            to_json(db.create_progress_request(id(ticket)?, &b.target, &b.message, b.due_date, actor)?)
        }
        (Method::Get, ["api", "progress"]) => {
            let q: FeedQuery = query(raw_query)?;
            to_json(db.progress_feed(actor, q.filter.unwrap_or(ProgressFilter::All))?)
        }
        (Method::Get, ["api", "progress", request]) => to_json(db.get_progress_request(id(request)?)?),
        (Method::Post, ["api", "progress", request, "updates"]) => {
            let b: ProgressUpdateBody = json_body(body)?;
            to_json(db.update_progress(id(request)?, &b.progress, b.percentage, b.eta, actor)?)
        }
        (Method::Post, ["api", "progress", request, "respond"]) => {
            let b: RespondBody = json_body(body)?;
            to_json(db.respond(id(request)?, &b.notes, actor)?)
        }
        (Method::Post, ["api", "progress", request, "cancel"]) => {
            to_json(db.cancel_progress_request(id(request)?, actor)?)
        }

        // Notifications
        (Method::Get, ["api", "notifications"]) => {
            let q: FeedQuery = query(raw_query)?;
            to_json(db.notification_feed(actor, q.unread_only)?)
        }
        (Method::Get, ["api", "notifications", "stats"]) => to_json(db.notification_stats(actor)?),
        (Method::Post, ["api", "notifications"]) => {
            let n: NewNotification = json_body(body)?;
            to_json(db.notify(n, actor)?)
        }
        (Method::Post, ["api", "notifications", n, "read"]) => {
            let b: ReadBody = json_body(body)?;
            let fresh = db.mark_read(id(n)?, actor, b.channel.as_deref().unwrap_or("api"))?;
            to_json(serde_json::json!({ "newly_read": fresh }))
        }
        (Method::Post, ["api", "notifications", n, "resolve"]) => {
            let b: ResolveBody = json_body(body)?;
            to_json(db.resolve_notification(id(n)?, actor, &b.action_type, b.notes.as_deref())?)
        }

        // Dashboard
        (Method::Get, ["api", "stats"]) => {
            let q: ListQuery = query(raw_query)?;
            to_json(db.status_counts(q.include_deleted)?)
        }

        _ => Err(ApiError::NoRoute(format!("{} /{}", method, segments.join("/")))),
    }
}

// ============================================================================
// Server
// ============================================================================

fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Identity from request headers; a bad role string is a client error
fn request_actor(request: &Request) -> std::result::Result<Option<Actor>, Error> {
    let Some(user) = header_value(request, "X-Actor-Id").map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let role = match header_value(request, "X-Actor-Role") {
        Some(raw) => raw.parse::<Role>()?,
        None => Role::Viewer,
    };
    Ok(Some(Actor::new(user, role)))
}

fn handle_request(db: &Database, mut request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let method = request.method().clone();

    let mut body = String::new();
    let (status, json) = if let Err(e) = request.as_reader().read_to_string(&mut body) {
        let err = ApiError::BadRequest(format!("failed to read body: {}", e));
        (400, serde_json::to_string(&ApiResponse::failure(&err))?)
    } else {
        match request_actor(&request) {
            Ok(actor) => dispatch(db, &method, &url, actor.as_ref(), &body),
            Err(e) => {
                let err = ApiError::Engine(e);
                (err.status(), serde_json::to_string(&ApiResponse::failure(&err))?)
            }
        }
    };

    let mut response = Response::from_string(json).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    request.respond(response)
}

/// Serve the API until the process is stopped
pub fn start(db: Database, config: &ServerConfig) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", config.port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;
    let server = Arc::new(server);
    let db = Arc::new(db);

    tracing::info!(addr = %addr, workers = config.workers, "ticketflow API listening");

    let handles: Vec<_> = (0..config.workers.max(1))
        .map(|worker| {
            let server = Arc::clone(&server);
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for request in server.incoming_requests() {
                    if let Err(e) = handle_request(&db, request) {
                        tracing::warn!(worker, error = %e, "failed to write response");
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("API worker panicked");
        }
    }
    Ok(())
}

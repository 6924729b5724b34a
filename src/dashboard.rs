//! Dashboard queries and their cache
//!
//! Listings and counts are cached under `"{entity}:{status|all}:{deleted|live}"`.
//! Every committed write bumps the cache generation; entries stored under an
//! older generation count as misses, so nothing has to enumerate keys.

use crate::db::{Database, Ticket};
use crate::error::Result;
use crate::schema::tickets;
use crate::status::TicketStatus;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Ticket count per status; every status is present
pub type StatusCounts = BTreeMap<TicketStatus, i64>;

#[derive(Debug, Clone)]
enum Cached {
    Tickets(Vec<Ticket>),
    Counts(StatusCounts),
}

#[derive(Debug, Default)]
pub struct DashboardCache {
    generation: AtomicU64,
    entries: Mutex<HashMap<String, (u64, Cached)>>,
}

/// Deterministic cache key
pub fn cache_key(entity: &str, status: Option<&str>, include_deleted: bool) -> String {
    format!(
        "{}:{}:{}",
        entity,
        status.unwrap_or("all"),
        if include_deleted { "deleted" } else { "live" }
    )
}

impl DashboardCache {
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop every entry logically
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn lookup(&self, key: &str) -> Option<Cached> {
        let current = self.generation();
        let entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((generation, value)) if *generation == current => Some(value.clone()),
            _ => None,
        }
    }

    fn store(&self, key: String, generation: u64, value: Cached) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (generation, value));
        }
    }

    fn tickets<F>(&self, key: String, load: F) -> Result<Vec<Ticket>>
    where
        F: FnOnce() -> Result<Vec<Ticket>>,
    {
        if let Some(Cached::Tickets(rows)) = self.lookup(&key) {
            tracing::trace!(key = %key, "dashboard cache hit");
            return Ok(rows);
        }
        // Tag with the generation seen before loading so a write that
        // lands mid-load leaves the entry stale
        let generation = self.generation();
        let rows = load()?;
        self.store(key, generation, Cached::Tickets(rows.clone()));
        Ok(rows)
    }

    fn counts<F>(&self, key: String, load: F) -> Result<StatusCounts>
    where
        F: FnOnce() -> Result<StatusCounts>,
    {
        if let Some(Cached::Counts(counts)) = self.lookup(&key) {
            return Ok(counts);
        }
        let generation = self.generation();
        let counts = load()?;
        self.store(key, generation, Cached::Counts(counts.clone()));
        Ok(counts)
    }
}

/// Listing filter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TicketFilter {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl Database {
    /// Tickets, most recently updated first
    pub fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>> {
        let key = cache_key(
            "tickets",
            filter.status.map(|s| s.as_str()),
            filter.include_deleted,
        );
        self.cache.tickets(key, || {
            self.read(|conn| {
                let mut query = tickets::table.into_boxed();
                if let Some(status) = filter.status {
                    query = query.filter(tickets::status.eq(status));
                }
                if !filter.include_deleted {
                    query = query.filter(tickets::is_deleted.eq(false));
                }
                let rows = query
                    .order((tickets::updated_at.desc(), tickets::id.desc()))
                    .load::<Ticket>(conn)?;
                Ok(rows)
            })
        })
    }

    /// Live tickets that still need work: OPEN, PAUSED, CONFIRMED, REOPENED
    pub fn ongoing_tickets(&self) -> Result<Vec<Ticket>> {
        let ongoing: Vec<TicketStatus> = TicketStatus::ALL
            .iter()
            .copied()
            .filter(|s| s.is_ongoing())
            .collect();
        self.cache.tickets(cache_key("tickets", Some("ongoing"), false), || {
            self.read(|conn| {
                let rows = tickets::table
                    .filter(tickets::is_deleted.eq(false))
                    .filter(tickets::status.eq_any(ongoing))
                    .order((tickets::updated_at.desc(), tickets::id.desc()))
                    .load::<Ticket>(conn)?;
                Ok(rows)
            })
        })
    }

    pub fn status_counts(&self, include_deleted: bool) -> Result<StatusCounts> {
        self.cache.counts(cache_key("counts", None, include_deleted), || {
            self.read(|conn| {
                let rows: Vec<(TicketStatus, i64)> = if include_deleted {
                    tickets::table
                        .group_by(tickets::status)
                        .select((tickets::status, diesel::dsl::count_star()))
                        .load(conn)?
                } else {
                    tickets::table
                        .filter(tickets::is_deleted.eq(false))
                        .group_by(tickets::status)
                        .select((tickets::status, diesel::dsl::count_star()))
                        .load(conn)?
                };

                let mut counts: StatusCounts = TicketStatus::ALL.iter().map(|s| (*s, 0)).collect();
                counts.extend(rows);
                Ok(counts)
            })
        })
    }
}

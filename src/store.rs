use crate::db::SnapshotStorage;
use crate::normalize::canonical_category;
use crate::types::{Snapshot, Ticket, TicketData, TicketPatch};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Storage entry holding the whole ticket state.
pub const STORAGE_KEY: &str = "tickets-storage";

/// Owns the ticket collection (newest first) and the active category filter.
///
/// Every mutation rewrites the full snapshot under [`STORAGE_KEY`]. Storage
/// failures are logged and otherwise ignored: the in-memory state stays
/// authoritative for the session.
pub struct TicketStore<S> {
    storage: S,
    state: Snapshot,
    last_id: i64,
}

impl<S: SnapshotStorage> TicketStore<S> {
    /// Rehydrate from `storage`, falling back to an empty state when the
    /// entry is missing, unreadable or corrupt.
    pub fn open(storage: S) -> Self {
        let state = match storage.load(STORAGE_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<StoredState>(&json) {
                Ok(stored) => sanitize(stored.into_snapshot()),
                Err(e) => {
                    warn!(error = %e, "persisted ticket state is corrupt, starting empty");
                    Snapshot::default()
                }
            },
            Ok(None) => Snapshot::default(),
            Err(e) => {
                warn!(error = %e, "could not read persisted ticket state, starting empty");
                Snapshot::default()
            }
        };
        let last_id = state
            .tickets
            .iter()
            .filter_map(|t| t.id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        debug!(tickets = state.tickets.len(), "ticket store opened");
        TicketStore {
            storage,
            state,
            last_id,
        }
    }

    /// Assign a fresh id and put the ticket at the front.
    pub fn create(&mut self, data: TicketData) -> Ticket {
        let mut data = data;
        if !data.amount.is_finite() {
            data.amount = 0.0;
        }
        let ticket = Ticket {
            id: self.next_id(),
            data,
        };
        self.state.tickets.insert(0, ticket.clone());
        info!(id = %ticket.id, merchant = %ticket.data.merchant, amount = ticket.data.amount, "ticket created");
        self.persist();
        ticket
    }

    /// Merge `patch` into the ticket with `id`. Unknown ids are ignored.
    /// Returns whether a ticket was changed.
    pub fn update(&mut self, id: &str, patch: TicketPatch) -> bool {
        let updated = match self.state.tickets.iter_mut().find(|t| t.id == id) {
            Some(ticket) => {
                apply_patch(&mut ticket.data, patch);
                true
            }
            None => {
                debug!(id, "update for unknown ticket ignored");
                false
            }
        };
        self.persist();
        updated
    }

    /// Delete the ticket with `id`, if present.
    pub fn remove(&mut self, id: &str) -> Option<Ticket> {
        let removed = self
            .state
            .tickets
            .iter()
            .position(|t| t.id == id)
            .map(|pos| self.state.tickets.remove(pos));
        self.persist();
        removed
    }

    /// Drop every ticket and reset the filter to show all.
    pub fn clear(&mut self) {
        self.state.tickets.clear();
        self.state.filter_category = None;
        self.persist();
    }

    /// `None` shows all tickets. The collection is not touched.
    pub fn set_filter(&mut self, category: Option<String>) {
        self.state.filter_category = category.and_then(canonical_category);
        self.persist();
    }

    pub fn tickets(&self) -> &[Ticket] {
        &self.state.tickets
    }

    pub fn get(&self, id: &str) -> Option<&Ticket> {
        self.state.tickets.iter().find(|t| t.id == id)
    }

    pub fn filter_category(&self) -> Option<&str> {
        self.state.filter_category.as_deref()
    }

    /// Tickets passing the active filter, newest first.
    pub fn visible_tickets(&self) -> Vec<&Ticket> {
        match self.state.filter_category.as_deref() {
            Some(filter) => self
                .state
                .tickets
                .iter()
                .filter(|t| t.data.category.as_deref() == Some(filter))
                .collect(),
            None => self.state.tickets.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.tickets.is_empty()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.state
    }

    fn next_id(&mut self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let mut candidate = now.max(self.last_id + 1);
        while self.get(&candidate.to_string()).is_some() {
            candidate += 1;
        }
        self.last_id = candidate;
        candidate.to_string()
    }

    fn persist(&self) {
        let json = match serde_json::to_string(&self.state) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "could not serialize ticket state");
                return;
            }
        };
        if let Err(e) = self.storage.save(STORAGE_KEY, &json) {
            warn!(error = %e, "could not persist ticket state");
        }
    }
}

fn apply_patch(data: &mut TicketData, patch: TicketPatch) {
    if let Some(date) = patch.date {
        data.date = date;
    }
    if let Some(amount) = patch.amount {
        data.amount = if amount.is_finite() { amount } else { 0.0 };
    }
    if let Some(amount_raw) = patch.amount_raw {
        data.amount_raw = amount_raw;
    }
    if let Some(merchant) = patch.merchant {
        data.merchant = merchant;
    }
    if let Some(text) = patch.text {
        data.text = text;
    }
    if let Some(text_lines) = patch.text_lines {
        data.text_lines = text_lines;
    }
    if let Some(image_url) = patch.image_url {
        data.image_url = image_url;
    }
    if let Some(tokens) = patch.tokens {
        data.tokens = Some(tokens);
    }
    if let Some(amount_debug) = patch.amount_debug {
        data.amount_debug = Some(amount_debug);
    }
    if let Some(category) = patch.category {
        data.category = category.and_then(canonical_category);
    }
}

/// Persisted state as first read: tickets are parsed one by one so a single
/// unreadable record does not take the rest with it.
#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct StoredState {
    tickets: Vec<Value>,
    filter_category: Option<Value>,
}

impl StoredState {
    fn into_snapshot(self) -> Snapshot {
        let total = self.tickets.len();
        let tickets: Vec<Ticket> = self
            .tickets
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Ticket>(value) {
                Ok(ticket) => Some(ticket),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable persisted ticket");
                    None
                }
            })
            .collect();
        if tickets.len() != total {
            warn!(kept = tickets.len(), total, "some persisted tickets were dropped");
        }
        Snapshot {
            tickets,
            filter_category: self
                .filter_category
                .and_then(|v| v.as_str().map(String::from)),
        }
    }
}

/// Enforce collection invariants on rehydrated state.
fn sanitize(mut snapshot: Snapshot) -> Snapshot {
    let mut seen = HashSet::new();
    let before = snapshot.tickets.len();
    snapshot.tickets.retain(|t| seen.insert(t.id.clone()));
    if snapshot.tickets.len() != before {
        warn!(dropped = before - snapshot.tickets.len(), "duplicate ticket ids in persisted state");
    }
    for ticket in &mut snapshot.tickets {
        if let Some(category) = ticket.data.category.take() {
            ticket.data.category = canonical_category(category);
        }
    }
    snapshot.filter_category = snapshot.filter_category.and_then(canonical_category);
    snapshot
}

//! In-process reference implementation of the order store.
//!
//! The store holds orders, audit events and authentication sessions. All mutation happens
//! inside [`Store::transaction`]:
//!
//! - the store mutex is held for the whole closure, so transactions are serialised and a
//!   status check followed by a status write inside one closure is atomic
//! - the closure works on a copy of the state; the copy replaces the live state only when the
//!   closure returns `Ok` (and, for file-backed stores, after the snapshot is durably written)
//! - on `Err` the copy is discarded, so no partial writes are ever visible
//!
//! File-backed stores persist a JSON snapshot, written to a temporary file and renamed into
//! place. Several processes may share one snapshot: every read takes a shared lock and every
//! transaction an exclusive lock on a sibling `.lock` file, and the snapshot is re-read under
//! that lock, so a transaction always starts from the latest committed state on disk.

use crate::events::{Event, EventId, EventPayload};
use crate::order::{Order, OrderStatus, SignerId};
use chrono::{DateTime, Utc};
use orderly_ids::ShardableUuid;
use orderly_types::Sha256Hash;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,
    #[error("order number {0} already exists")]
    DuplicateOrderNumber(String),
    #[error("order {0} already exists")]
    DuplicateOrder(ShardableUuid),
    #[error("order {0} does not exist")]
    OrderMissing(ShardableUuid),
    #[error("order {order} status changed concurrently (expected {expected}, found {actual})")]
    StatusConflict {
        order: ShardableUuid,
        expected: OrderStatus,
        actual: OrderStatus,
    },
    #[error("order {order} reached the limit of {limit} events")]
    EventLimitReached { order: ShardableUuid, limit: usize },
    #[error("failed to read or write store snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialise store snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bounds enforced by the store itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_events_per_order: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_events_per_order: crate::constants::DEFAULT_MAX_EVENTS_PER_ORDER,
        }
    }
}

/// A live authentication session. Keyed in the store by the SHA-256 of its token, so the
/// snapshot never contains usable tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub signer_id: SignerId,
    pub ip_address: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Token hash of the session this one was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Sha256Hash>,
}

impl AuthSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Everything the store holds. Read access is shared between [`Store::read`] and
/// [`Transaction`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreState {
    orders: BTreeMap<ShardableUuid, Order>,
    events: Vec<Event>,
    sessions: BTreeMap<Sha256Hash, AuthSession>,
    last_event_id: Option<EventId>,
}

impl StoreState {
    pub fn order(&self, id: &ShardableUuid) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn order_number_exists(&self, order_number: &str) -> bool {
        self.orders
            .values()
            .any(|order| order.order_number == order_number)
    }

    /// Events for one order, ascending by creation time.
    pub fn events_for_order(&self, order_id: &ShardableUuid) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|event| event.order_id.as_ref() == Some(order_id))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        events
    }

    /// Signer-level events (those not tied to an order) acted on by `signer_id`.
    pub fn events_for_signer(&self, signer_id: SignerId) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|event| event.order_id.is_none() && event.actor_id == Some(signer_id))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        events
    }

    /// Failed authentication attempts for `(signer_id, ip_address)` at or after `since`.
    pub fn failed_attempts_since(
        &self,
        signer_id: SignerId,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> usize {
        self.events
            .iter()
            .filter(|event| event.created_at >= since)
            .filter(|event| {
                matches!(
                    &event.payload,
                    EventPayload::AuthFailed { signer_id: s, ip_address: ip, .. }
                        if *s == signer_id && ip == ip_address
                )
            })
            .count()
    }

    pub fn session(&self, token_hash: &Sha256Hash) -> Option<&AuthSession> {
        self.sessions.get(token_hash)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// A unit of work against a private copy of the store state.
#[derive(Debug)]
pub struct Transaction {
    state: StoreState,
    limits: StoreLimits,
}

impl Deref for Transaction {
    type Target = StoreState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl Transaction {
    /// Inserts a new order, enforcing unique ids and order numbers.
    pub fn insert_order(&mut self, order: Order) -> StoreResult<()> {
        if self.state.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        if self.state.order_number_exists(&order.order_number) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number));
        }
        self.state.orders.insert(order.id, order);
        Ok(())
    }

    /// Replaces an existing order. The status field is not writable through this method.
    pub fn update_order(&mut self, order: Order) -> StoreResult<()> {
        let existing = self
            .state
            .orders
            .get_mut(&order.id)
            .ok_or(StoreError::OrderMissing(order.id))?;
        if existing.status != order.status {
            return Err(StoreError::StatusConflict {
                order: order.id,
                expected: existing.status,
                actual: order.status,
            });
        }
        *existing = order;
        Ok(())
    }

    /// Compare-and-set on the status field. Fails unless the order is currently `expected`.
    pub fn transition_status(
        &mut self,
        order_id: &ShardableUuid,
        expected: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Order> {
        let order = self
            .state
            .orders
            .get_mut(order_id)
            .ok_or(StoreError::OrderMissing(*order_id))?;
        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order: *order_id,
                expected,
                actual: order.status,
            });
        }

        order.status = to;
        order.updated_at = at;
        match to {
            OrderStatus::Sent => order.sent_at = Some(at),
            OrderStatus::Ack => order.ack_at = Some(at),
            OrderStatus::Final | OrderStatus::Corrected => order.final_at = Some(at),
            _ => {}
        }
        Ok(order.clone())
    }

    /// Appends an event, assigning a strictly increasing id.
    pub fn append_event(
        &mut self,
        order_id: Option<ShardableUuid>,
        payload: EventPayload,
        actor_id: Option<SignerId>,
        now: DateTime<Utc>,
    ) -> StoreResult<EventId> {
        if let Some(order_id) = order_id {
            if !self.state.orders.contains_key(&order_id) {
                return Err(StoreError::OrderMissing(order_id));
            }
            let existing = self
                .state
                .events
                .iter()
                .filter(|event| event.order_id == Some(order_id))
                .count();
            if existing >= self.limits.max_events_per_order {
                return Err(StoreError::EventLimitReached {
                    order: order_id,
                    limit: self.limits.max_events_per_order,
                });
            }
        }

        let id = EventId::generate(self.state.last_event_id.as_ref(), now);
        self.state.events.push(Event {
            id: id.clone(),
            order_id,
            actor_id,
            created_at: id.timestamp(),
            payload,
        });
        self.state.last_event_id = Some(id.clone());
        Ok(id)
    }

    pub fn insert_session(&mut self, token_hash: Sha256Hash, session: AuthSession) {
        self.state.sessions.insert(token_hash, session);
    }

    /// Removes a session. Returns whether one was present.
    pub fn remove_session(&mut self, token_hash: &Sha256Hash) -> bool {
        self.state.sessions.remove(token_hash).is_some()
    }

    /// Removes every session expired at `now`. Returns how many were removed.
    pub fn purge_expired_sessions(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.state.sessions.len();
        self.state.sessions.retain(|_, session| session.is_live(now));
        before - self.state.sessions.len()
    }
}

#[derive(Debug)]
pub struct Store {
    state: Mutex<StoreState>,
    snapshot: Option<Snapshot>,
    limits: StoreLimits,
}

impl Store {
    /// A store that lives only as long as the process.
    pub fn in_memory(limits: StoreLimits) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            snapshot: None,
            limits,
        }
    }

    /// Opens a file-backed store, loading the snapshot at `path` if it exists.
    pub fn open(path: &Path, limits: StoreLimits) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot::new(path);
        let state = {
            let _lock = snapshot.lock_shared()?;
            snapshot.load()?.unwrap_or_default()
        };

        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(snapshot),
            limits,
        })
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Runs `f` against the latest committed state.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> StoreResult<R> {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let _lock = match &self.snapshot {
            Some(snapshot) => Some(snapshot.refresh_shared(&mut guard)?),
            None => None,
        };
        Ok(f(&guard))
    }

    /// Runs `f` as one atomic unit of work.
    ///
    /// Commits the transaction's state when `f` returns `Ok`, discards it otherwise. For
    /// file-backed stores the exclusive file lock is held from the re-read of the snapshot
    /// until the new snapshot is in place.
    pub fn transaction<R, E>(
        &self,
        f: impl FnOnce(&mut Transaction) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let _lock = match &self.snapshot {
            Some(snapshot) => Some(snapshot.refresh_exclusive(&mut guard)?),
            None => None,
        };
        let mut tx = Transaction {
            state: (*guard).clone(),
            limits: self.limits,
        };

        let value = f(&mut tx)?;

        if let Some(snapshot) = &self.snapshot {
            snapshot.write(&tx.state)?;
        }
        *guard = tx.state;
        Ok(value)
    }
}

/// On-disk snapshot plus the lock file that guards it.
///
/// The lock lives in a separate file because the snapshot itself is replaced by rename on
/// every commit. Locks are released when the returned [`File`] is dropped.
#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    lock_path: PathBuf,
}

impl Snapshot {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock_path: path.with_extension("json.lock"),
        }
    }

    fn lock_file(&self) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)?)
    }

    fn lock_shared(&self) -> StoreResult<File> {
        let file = self.lock_file()?;
        FileExt::lock_shared(&file)?;
        Ok(file)
    }

    fn lock_exclusive(&self) -> StoreResult<File> {
        let file = self.lock_file()?;
        FileExt::lock_exclusive(&file)?;
        Ok(file)
    }

    fn refresh_shared(&self, state: &mut StoreState) -> StoreResult<File> {
        let lock = self.lock_shared()?;
        if let Some(latest) = self.load()? {
            *state = latest;
        }
        Ok(lock)
    }

    fn refresh_exclusive(&self, state: &mut StoreState) -> StoreResult<File> {
        let lock = self.lock_exclusive()?;
        if let Some(latest) = self.load()? {
            *state = latest;
        }
        Ok(lock)
    }

    fn load(&self) -> StoreResult<Option<StoreState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write(&self, state: &StoreState) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

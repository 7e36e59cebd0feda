//! Append-only audit log.
//!
//! Audit writes never fail the operation that caused them. A rejected append (for example an
//! order that has reached its event limit) is reported through `tracing::error!` and the
//! caller carries on. A rejected event is never inserted, so the enclosing transaction stays
//! consistent.

use crate::clock::Clock;
use crate::events::{Event, EventId, EventPayload};
use crate::order::SignerId;
use crate::store::{Store, StoreError, StoreResult, Transaction};
use orderly_ids::ShardableUuid;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AuditLog {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Appends an event in its own unit of work.
    pub fn append(
        &self,
        order_id: Option<ShardableUuid>,
        payload: EventPayload,
        actor_id: Option<SignerId>,
    ) -> Option<EventId> {
        let now = self.clock.now();
        let event_type = payload.event_type();
        let result: StoreResult<EventId> = self
            .store
            .transaction(|tx| tx.append_event(order_id, payload, actor_id, now));
        swallow(result, event_type, order_id)
    }

    /// Appends an event inside an existing transaction, so it commits or rolls back with it.
    pub fn append_in(
        &self,
        tx: &mut Transaction,
        order_id: Option<ShardableUuid>,
        payload: EventPayload,
        actor_id: Option<SignerId>,
    ) -> Option<EventId> {
        let event_type = payload.event_type();
        let result = tx.append_event(order_id, payload, actor_id, self.clock.now());
        swallow(result, event_type, order_id)
    }

    /// Events for an order, oldest first.
    pub fn list_for_order(&self, order_id: &ShardableUuid) -> StoreResult<Vec<Event>> {
        self.store.read(|state| state.events_for_order(order_id))
    }

    /// Signer-level events (authentication history), oldest first.
    pub fn list_for_signer(&self, signer_id: SignerId) -> StoreResult<Vec<Event>> {
        self.store.read(|state| state.events_for_signer(signer_id))
    }
}

fn swallow(
    result: Result<EventId, StoreError>,
    event_type: &str,
    order_id: Option<ShardableUuid>,
) -> Option<EventId> {
    match result {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(
                event_type,
                order_id = ?order_id,
                error = %e,
                "failed to record audit event"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::order::tests::sample_order;
    use crate::store::StoreLimits;

    fn updated() -> EventPayload {
        EventPayload::OrderUpdated {
            changed_fields: vec!["priority".into()],
        }
    }

    #[test]
    fn test_append_and_list() {
        let store = Arc::new(Store::in_memory(StoreLimits::default()));
        let audit = AuditLog::new(store.clone(), Arc::new(SystemClock));
        let order = sample_order();
        let id = order.id;
        store.transaction(|tx| tx.insert_order(order)).unwrap();

        assert!(audit.append(Some(id), updated(), Some(3)).is_some());
        assert!(audit.append(Some(id), updated(), Some(3)).is_some());

        let events = audit.list_for_order(&id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "order_updated");
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn test_failed_append_is_swallowed() {
        let store = Arc::new(Store::in_memory(StoreLimits {
            max_events_per_order: 1,
        }));
        let audit = AuditLog::new(store.clone(), Arc::new(SystemClock));
        let order = sample_order();
        let id = order.id;
        store.transaction(|tx| tx.insert_order(order)).unwrap();

        assert!(audit.append(Some(id), updated(), None).is_some());
        assert!(audit.append(Some(id), updated(), None).is_none());
        assert_eq!(audit.list_for_order(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_in_transaction_append_rolls_back_with_caller() {
        let store = Arc::new(Store::in_memory(StoreLimits::default()));
        let audit = AuditLog::new(store.clone(), Arc::new(SystemClock));
        let order = sample_order();
        let id = order.id;
        store.transaction(|tx| tx.insert_order(order)).unwrap();

        let result: Result<(), StoreError> = store.transaction(|tx| {
            audit.append_in(tx, Some(id), updated(), None);
            Err(StoreError::OrderMissing(id))
        });

        assert!(result.is_err());
        assert!(audit.list_for_order(&id).unwrap().is_empty());
    }

    #[test]
    fn test_signer_history_excludes_order_events() {
        let store = Arc::new(Store::in_memory(StoreLimits::default()));
        let audit = AuditLog::new(store.clone(), Arc::new(SystemClock));
        let order = sample_order();
        let id = order.id;
        store.transaction(|tx| tx.insert_order(order)).unwrap();

        audit.append(Some(id), updated(), Some(3));
        audit.append(
            None,
            EventPayload::AuthFailed {
                signer_id: 3,
                ip_address: "10.1.1.1".into(),
                reason: crate::events::AuthFailureReason::InvalidCredential,
            },
            Some(3),
        );

        let history = audit.list_for_signer(3).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type(), "auth_failed");
    }
}

//! Volatile, memory-resident subscriber registry.
//!
//! Keyed strictly by [`SubscriberId`]; email is a secondary key reached
//! through a linear scan. Readers share the lock, writers hold it
//! exclusively, and no lock is ever held across an `.await`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::{Subscriber, SubscriberEmail, SubscriberId, SubscriberLookup};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("A subscriber with identifier {0} is already registered.")]
    DuplicateId(SubscriberId),
    #[error("A subscriber with email {0} is already registered.")]
    DuplicateEmail(SubscriberEmail),
}

#[derive(Default)]
pub struct SubscriberStore {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uniqueness of both identifier and email is checked under the same
    /// write lock as the insertion.
    pub fn insert(&self, subscriber: Subscriber) -> Result<SubscriberId, StoreError> {
        let mut subscribers = self.subscribers.write();
        if subscribers.contains_key(&subscriber.id) {
            return Err(StoreError::DuplicateId(subscriber.id));
        }
        if subscribers
            .values()
            .any(|existing| existing.email.matches(&subscriber.email))
        {
            return Err(StoreError::DuplicateEmail(subscriber.email));
        }
        let id = subscriber.id;
        subscribers.insert(id, subscriber);
        Ok(id)
    }

    pub fn get(&self, id: &SubscriberId) -> Option<Subscriber> {
        self.subscribers.read().get(id).cloned()
    }

    /// First match of an unordered scan.
    pub fn find_by_email(&self, email: &SubscriberEmail) -> Option<Subscriber> {
        self.subscribers
            .read()
            .values()
            .find(|s| s.email.matches(email))
            .cloned()
    }

    pub fn find(&self, lookup: &SubscriberLookup) -> Option<Subscriber> {
        let subscribers = self.subscribers.read();
        locate(&subscribers, lookup).and_then(|id| subscribers.get(&id).cloned())
    }

    pub fn delete(&self, id: &SubscriberId) -> bool {
        self.subscribers.write().remove(id).is_some()
    }

    /// Locates, runs `before_delete` and deletes as one exclusive step, so no
    /// reader can observe the record once its job handle has been released.
    pub fn remove<F>(&self, lookup: &SubscriberLookup, before_delete: F) -> Option<Subscriber>
    where
        F: FnOnce(&Subscriber),
    {
        let mut subscribers = self.subscribers.write();
        let id = locate(&subscribers, lookup)?;
        if let Some(subscriber) = subscribers.get(&id) {
            before_delete(subscriber);
        }
        subscribers.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

fn locate(
    subscribers: &HashMap<SubscriberId, Subscriber>,
    lookup: &SubscriberLookup,
) -> Option<SubscriberId> {
    if let Some(id) = lookup.id().filter(|id| subscribers.contains_key(*id)) {
        return Some(*id);
    }
    let email = lookup.email()?;
    subscribers
        .values()
        .find(|s| s.email.matches(email))
        .map(|s| s.id)
}

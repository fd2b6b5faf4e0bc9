//! Mutation notifications.
//!
//! Repositories fire these after a write commits. Observers run in the
//! mutation's context and cannot fail it: the signatures are infallible and
//! implementations log and discard their own errors.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use zerqu_core::Entity;

/// Kind of committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Inserted,
    Updated,
    Deleted,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives post-commit lifecycle events for entities of type `T`.
#[async_trait]
pub trait MutationObserver<T: Entity>: Send + Sync {
    async fn on_inserted(&self, entity: &T);

    async fn on_updated(&self, entity: &T);

    async fn on_deleted(&self, entity: &T);
}

/// The observers registered for one entity type.
///
/// Observers may be registered after the repository is built, which lets an
/// entity cache wrap the repository and then subscribe to it.
pub struct HookRegistry<T: Entity> {
    observers: RwLock<Vec<Arc<dyn MutationObserver<T>>>>,
}

impl<T: Entity> HookRegistry<T> {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe an observer. Observers are notified in registration order.
    pub fn register(&self, observer: Arc<dyn MutationObserver<T>>) {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every observer, one after another.
    pub async fn fire(&self, kind: MutationKind, entity: &T) {
        let observers = self.snapshot();
        if observers.is_empty() {
            return;
        }
        tracing::debug!(
            table = T::TABLE,
            event = %kind,
            observers = observers.len(),
            "firing mutation hooks"
        );
        for observer in observers {
            match kind {
                MutationKind::Inserted => observer.on_inserted(entity).await,
                MutationKind::Updated => observer.on_updated(entity).await,
                MutationKind::Deleted => observer.on_deleted(entity).await,
            }
        }
    }

    pub async fn fire_inserted(&self, entity: &T) {
        self.fire(MutationKind::Inserted, entity).await
    }

    pub async fn fire_updated(&self, entity: &T) {
        self.fire(MutationKind::Updated, entity).await
    }

    pub async fn fire_deleted(&self, entity: &T) {
        self.fire(MutationKind::Deleted, entity).await
    }

    // Cloned out so the lock is never held across an await.
    fn snapshot(&self) -> Vec<Arc<dyn MutationObserver<T>>> {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<T: Entity> Default for HookRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> fmt::Debug for HookRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("table", &T::TABLE)
            .field("observers", &self.len())
            .finish()
    }
}

//! Cancellation tokens and the token registry.
//!
//! `CancellationToken` is a cloneable cooperative-cancellation flag that can
//! be awaited. Child tokens observe their parent's cancellation, never the
//! other way round. `CancellationRegistry` hands out opaque ids so tokens can
//! be referenced across the bridge and cancelled by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenState>>>,
}

impl TokenState {
    fn cancel(self: &Arc<Self>) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
        true
    }
}

/// A cancellation token for cooperative cancellation of async operations.
///
/// This token can be cloned and shared across tasks. When `cancel()` is called
/// on any clone, all clones (and all child tokens) observe the cancellation.
///
/// # Example
///
/// ```
/// use hostbridge::cancel::CancellationToken;
///
/// let parent = CancellationToken::new();
/// let child = parent.child_token();
///
/// parent.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if the
    /// token was already cancelled.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Create a child token linked to this one.
    ///
    /// Cancelling the parent cancels the child. Cancelling the child leaves the
    /// parent untouched.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let mut children = self
            .state
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            child.cancel();
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.state));
        }
        drop(children);
        child
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// True when both values refer to the same token.
    pub fn same_token(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

/// A registered token and the upstream source it is linked to, if any.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub token: CancellationToken,
    pub parent: Option<CancellationToken>,
}

/// Issues ids for cancellable operations.
///
/// Tokens created by the registry itself are children of a registry-wide root
/// token, so `cancel_all` reaches every operation of a session.
#[derive(Debug)]
pub struct CancellationRegistry {
    root: CancellationToken,
    entries: Mutex<HashMap<String, TokenEntry>>,
    next_id: AtomicU64,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, TokenEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> String {
        format!("ct{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an existing token and return its id.
    pub fn register(&self, token: CancellationToken) -> String {
        let id = self.allocate_id();
        self.entries().insert(
            id.clone(),
            TokenEntry {
                token,
                parent: None,
            },
        );
        id
    }

    /// Create a token linked to `parent` and register it.
    pub fn register_linked(&self, parent: &CancellationToken) -> (String, CancellationToken) {
        let token = parent.child_token();
        let id = self.allocate_id();
        self.entries().insert(
            id.clone(),
            TokenEntry {
                token: token.clone(),
                parent: Some(parent.clone()),
            },
        );
        (id, token)
    }

    /// Look up a token by id.
    pub fn get(&self, id: &str) -> Option<CancellationToken> {
        self.entries().get(id).map(|entry| entry.token.clone())
    }

    /// Look up a token, creating and registering a fresh one under `id` if absent.
    pub fn get_or_create(&self, id: &str) -> CancellationToken {
        let mut entries = self.entries();
        if let Some(entry) = entries.get(id) {
            return entry.token.clone();
        }
        let token = self.root.child_token();
        entries.insert(
            id.to_string(),
            TokenEntry {
                token: token.clone(),
                parent: Some(self.root.clone()),
            },
        );
        token
    }

    /// Cancel the token registered under `id`.
    ///
    /// Returns `false` for unknown ids and for tokens that were already
    /// cancelled.
    pub fn cancel(&self, id: &str) -> bool {
        let token = self.get(id);
        match token {
            Some(token) => {
                let cancelled = token.cancel();
                debug!("Cancel token {}: {}", id, cancelled);
                cancelled
            }
            None => false,
        }
    }

    /// Remove a token. Returns `false` if the id was unknown.
    pub fn unregister(&self, id: &str) -> bool {
        self.entries().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.entries().len()
    }

    /// Cancel every outstanding operation and clear the table.
    pub fn cancel_all(&self) {
        self.root.cancel();
        let drained: Vec<TokenEntry> = self.entries().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token2.is_cancelled());
        assert!(token1.same_token(&token2));
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let second = parent.child_token();
        parent.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().is_cancelled());
    }

    #[test]
    fn test_check() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert_eq!(token.check(), Err(CancelledError));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_registry_cancel_by_id() {
        let registry = CancellationRegistry::new();
        let token = CancellationToken::new();
        let id = registry.register(token.clone());

        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
        // Second cancel reports false rather than failing
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn test_registry_cancel_unknown_or_unregistered_returns_false() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel("missing"));

        let id = registry.register(CancellationToken::new());
        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn test_registry_linked_token() {
        let registry = CancellationRegistry::new();
        let parent = CancellationToken::new();
        let (id, token) = registry.register_linked(&parent);

        // Cancelling by id reaches the live token even if the parent follows
        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
        parent.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_registry_get_or_create() {
        let registry = CancellationRegistry::new();
        let first = registry.get_or_create("driver-1");
        let second = registry.get_or_create("driver-1");
        assert!(first.same_token(&second));
        assert_eq!(registry.count(), 1);

        assert!(registry.cancel("driver-1"));
        assert!(first.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_all_clears() {
        let registry = CancellationRegistry::new();
        let external = CancellationToken::new();
        registry.register(external.clone());
        let created = registry.get_or_create("x");

        registry.cancel_all();

        assert_eq!(registry.count(), 0);
        assert!(external.is_cancelled());
        assert!(created.is_cancelled());
    }
}

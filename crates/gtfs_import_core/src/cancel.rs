use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use compact_str::CompactString;
use dashmap::DashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Running jobs' tokens, keyed by owner id. An owner may run several jobs at
/// once; a cancel request reaches all of them.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: DashMap<CompactString, Vec<CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, owner: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .entry(CompactString::from(owner))
            .or_default()
            .push(token.clone());
        token
    }

    /// Flags every running job of the owner. Returns whether any was found.
    pub fn request_cancel(&self, owner: &str) -> bool {
        let flagged = match self.tokens.get(owner) {
            Some(tokens) => {
                tokens.iter().for_each(CancellationToken::cancel);
                tokens.len()
            }
            None => 0,
        };
        if flagged == 0 {
            debug!("No running import for {}", owner);
            return false;
        }
        info!("Cancellation requested for {} ({} jobs)", owner, flagged);
        true
    }

    /// Drops `token` from the owner's entry, and the entry once it is empty.
    pub fn release(&self, owner: &str, token: &CancellationToken) {
        if let Some(mut tokens) = self.tokens.get_mut(owner) {
            tokens.retain(|current| !current.same_as(token));
        }
        self.tokens.remove_if(owner, |_, tokens| tokens.is_empty());
    }

    pub fn is_registered(&self, owner: &str) -> bool {
        self.tokens
            .get(owner)
            .is_some_and(|tokens| !tokens.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_registered_token() {
        let registry = CancellationRegistry::new();
        let token = registry.register("user-1");
        assert!(!token.is_cancelled());
        assert!(registry.request_cancel("user-1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_without_job_is_a_no_op() {
        let registry = CancellationRegistry::new();
        assert!(!registry.request_cancel("nobody"));
        let token = registry.register("nobody");
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_reaches_every_job_of_the_owner() {
        let registry = CancellationRegistry::new();
        let first = registry.register("owner");
        let second = registry.register("owner");
        let other = registry.register("someone-else");

        assert!(registry.request_cancel("owner"));
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(!other.is_cancelled());
    }

    #[test]
    fn release_removes_only_the_given_token() {
        let registry = CancellationRegistry::new();
        let first = registry.register("owner");
        let second = registry.register("owner");

        registry.release("owner", &first);
        assert!(registry.is_registered("owner"));
        assert!(registry.request_cancel("owner"));
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());

        registry.release("owner", &second);
        assert!(!registry.is_registered("owner"));
        assert!(!registry.request_cancel("owner"));
    }
}

//! Shared rule registry wrapping the library's [`RuleSet`](sitegate::RuleSet).
//!
//! Request handlers hold clones of [`SharedRules`] and read the
//! registry at decision time; only the configuration path writes.
//! Writes are visible to the next lookup immediately (no snapshot is
//! taken per request).

use sitegate::{RuleSet, Verdict};
use std::sync::{Arc, RwLock};

/// Cloneable handle to the rule registry shared across connection
/// handlers.
#[derive(Debug, Clone, Default)]
pub struct SharedRules {
    inner: Arc<RwLock<RuleSet>>,
}

impl SharedRules {
    /// Create an empty registry (nothing blocked).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blocked domain with its whitelisted path prefixes.
    ///
    /// Re-registering a domain replaces its whitelist wholesale.
    pub fn register(&self, domain: &str, allow_paths: &[String]) {
        // Lock poisoning only happens if a writer panicked; recover the
        // guard rather than propagating the panic into handlers.
        let mut rules = self.inner.write().unwrap_or_else(|e| e.into_inner());
        rules.register(domain, allow_paths);
    }

    /// Classify a plain request target (absolute URL).
    #[must_use]
    pub fn classify_url(&self, target: &str) -> Verdict {
        let rules = self.inner.read().unwrap_or_else(|e| e.into_inner());
        rules.classify_url(target)
    }

    /// Classify a tunnel target by host only.
    #[must_use]
    pub fn classify_host(&self, host: &str) -> Verdict {
        let rules = self.inner.read().unwrap_or_else(|e| e.into_inner());
        rules.classify_host(host)
    }

    /// Flat list of registered domains for the firewall collaborator.
    #[must_use]
    pub fn blocked_domains(&self) -> Vec<String> {
        let rules = self.inner.read().unwrap_or_else(|e| e.into_inner());
        rules.blocked_domains()
    }

    /// Number of registered rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        let rules = self.inner.read().unwrap_or_else(|e| e.into_inner());
        rules.len()
    }
}

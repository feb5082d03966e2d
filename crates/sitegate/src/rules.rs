//! Domain blocking rules and request classification.
//!
//! A [`RuleSet`] maps canonical domains to [`SiteRule`]s. The proxy
//! asks it two questions: [`classify_url`](RuleSet::classify_url) for
//! plain requests (where the full path and query are visible) and
//! [`classify_host`](RuleSet::classify_host) for CONNECT tunnels
//! (where only `host:port` is visible).
//!
//! # Behavioral Properties
//!
//! - **Fail open**: a target the classifier cannot parse is never
//!   blocked. Blocking only ever applies to traffic we understood.
//! - **Canonical domains**: rules are keyed by lowercase hostname with
//!   one leading `www.` stripped, so `www.example.com` and
//!   `example.com` share a rule. Other subdomains are distinct.
//! - **Whitelist boundary rule**: an entry `/not` exempts `/not`,
//!   `/not/x`, and `/not?y`, but never `/nothing`. Bare string-prefix
//!   matching would leak `/nothing` through; the `/` and `?` boundary
//!   characters are required.
//! - **Tunnels are domain-only**: whitelist entries cannot apply to a
//!   CONNECT target (no path is visible), so a registered domain is
//!   blocked outright at the tunnel layer.

use std::collections::HashMap;

/// Result of classifying a request target against the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No rule is registered for the target's domain
    NoRule {
        /// Canonical domain that was looked up
        domain: String,
    },
    /// A whitelist entry exempted the request path
    PathWhitelisted {
        /// Canonical domain of the matched rule
        domain: String,
        /// The whitelist entry that matched
        entry: String,
    },
    /// The domain is registered and nothing exempted the request
    Blocked {
        /// Canonical domain of the matched rule
        domain: String,
    },
    /// The target could not be parsed; classification fails open
    Unparseable,
}

impl Verdict {
    /// Whether the verdict is a block decision
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked { .. })
    }

    /// A human-readable reason for the decision
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Verdict::NoRule { domain } => {
                format!("no blocking rule for {}", domain)
            }
            Verdict::PathWhitelisted { domain, entry } => {
                format!("path whitelisted on {} by entry {}", domain, entry)
            }
            Verdict::Blocked { domain } => {
                format!("domain {} is blocked", domain)
            }
            Verdict::Unparseable => "unparseable target, allowed".to_string(),
        }
    }
}

/// One blocking rule: a domain and the path prefixes exempt from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRule {
    /// Canonical domain key (lowercase, leading `www.` stripped)
    pub domain: String,
    /// Exempt path prefixes, lowercased at registration
    pub whitelist_paths: Vec<String>,
    /// Whether the rule blocks. Registration always sets true; the
    /// field exists so a future enable/disable surface can flip it
    /// without deleting the rule.
    pub blocked: bool,
}

impl SiteRule {
    /// Whether `full_path` (lowercased path + query) is exempted by
    /// any whitelist entry.
    ///
    /// An entry `w` matches iff the path is exactly `w`, or continues
    /// past it with a `/` (sub-path) or `?` (query string).
    #[must_use]
    pub fn path_whitelisted(&self, full_path: &str) -> Option<&str> {
        self.whitelist_paths.iter().map(String::as_str).find(|w| {
            full_path == *w
                || (full_path.starts_with(w)
                    && matches!(
                        full_path.as_bytes().get(w.len()).copied(),
                        Some(b'/') | Some(b'?')
                    ))
        })
    }
}

/// Canonical registry key for a hostname: lowercase with at most one
/// leading `www.` removed.
#[must_use]
pub fn canonical_domain(host: &str) -> String {
    let lower = host.to_lowercase();
    match lower.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// Registry of blocked domains.
///
/// Written only by the configuration path (registration); request
/// handlers only read. A domain absent from the registry is never
/// blocked.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<String, SiteRule>,
}

impl RuleSet {
    /// Create an empty rule set (nothing blocked).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blocked domain with its whitelisted path prefixes.
    ///
    /// The domain is canonicalized and whitelist entries lowercased.
    /// Re-registering a domain replaces its whitelist wholesale.
    pub fn register(&mut self, domain: &str, whitelist_paths: &[String]) {
        let key = canonical_domain(domain);
        let rule = SiteRule {
            domain: key.clone(),
            whitelist_paths: whitelist_paths.iter().map(|p| p.to_lowercase()).collect(),
            blocked: true,
        };
        self.rules.insert(key, rule);
    }

    /// Look up the rule for a canonical domain.
    #[must_use]
    pub fn lookup(&self, domain: &str) -> Option<&SiteRule> {
        self.rules.get(domain)
    }

    /// Classify a plain request target (absolute URL).
    ///
    /// Parse failures fail open: traffic the classifier cannot
    /// understand is never blocked.
    #[must_use]
    pub fn classify_url(&self, target: &str) -> Verdict {
        let parsed = match url::Url::parse(target) {
            Ok(u) => u,
            Err(_) => return Verdict::Unparseable,
        };
        let host = match parsed.host_str() {
            Some(h) => h,
            None => return Verdict::Unparseable,
        };
        let domain = canonical_domain(host);
        let rule = match self.rules.get(&domain) {
            Some(r) if r.blocked => r,
            _ => return Verdict::NoRule { domain },
        };

        let mut full_path = parsed.path().to_lowercase();
        if let Some(query) = parsed.query() {
            full_path.push('?');
            full_path.push_str(&query.to_lowercase());
        }

        match rule.path_whitelisted(&full_path) {
            Some(entry) => Verdict::PathWhitelisted {
                domain,
                entry: entry.to_string(),
            },
            None => Verdict::Blocked { domain },
        }
    }

    /// Classify a tunnel target by host only.
    ///
    /// No path is visible at tunnel-establishment time, so whitelist
    /// entries are ignored: a registered domain is blocked outright.
    #[must_use]
    pub fn classify_host(&self, host: &str) -> Verdict {
        let domain = canonical_domain(host);
        match self.rules.get(&domain) {
            Some(r) if r.blocked => Verdict::Blocked { domain },
            _ => Verdict::NoRule { domain },
        }
    }

    /// Flat list of registered domains, sorted.
    ///
    /// This is the boundary handed to the OS-level firewall
    /// collaborator, which resolves and blocks the domains
    /// independently of the proxy.
    #[must_use]
    pub fn blocked_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.rules.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn youtube_rules() -> RuleSet {
        let mut rules = RuleSet::new();
        rules.register("youtube.com", &["/not".to_string()]);
        rules
    }

    #[test]
    fn test_whitelist_exact_match() {
        let rules = youtube_rules();
        assert!(!rules.classify_url("https://youtube.com/not").is_blocked());
    }

    #[test]
    fn test_whitelist_subpath_match() {
        let rules = youtube_rules();
        assert!(!rules
            .classify_url("https://youtube.com/not/some/path")
            .is_blocked());
    }

    #[test]
    fn test_whitelist_query_match() {
        let rules = youtube_rules();
        assert!(!rules
            .classify_url("https://youtube.com/not?y=1")
            .is_blocked());
    }

    #[test]
    fn test_whitelist_boundary_not_plain_prefix() {
        // The historical bug: "/not" must not leak "/nothing" through.
        let rules = youtube_rules();
        assert!(rules
            .classify_url("https://youtube.com/nothing")
            .is_blocked());
        assert!(rules
            .classify_url("https://youtube.com/notification")
            .is_blocked());
    }

    #[test]
    fn test_root_path_blocked() {
        let rules = youtube_rules();
        assert!(rules.classify_url("https://youtube.com").is_blocked());
    }

    #[test]
    fn test_non_whitelisted_path_blocked() {
        let rules = youtube_rules();
        assert!(rules
            .classify_url("https://youtube.com/watch?v=123")
            .is_blocked());
    }

    #[test]
    fn test_path_and_query_lowercased() {
        let mut rules = RuleSet::new();
        rules.register("example.com", &["/Watch".to_string()]);
        assert!(!rules
            .classify_url("https://example.com/wAtCh?V=1")
            .is_blocked());
    }

    #[test]
    fn test_www_strip_shares_rule() {
        let rules = youtube_rules();
        assert!(rules.classify_url("https://www.youtube.com/").is_blocked());
    }

    #[test]
    fn test_registering_www_form_strips_prefix() {
        let mut rules = RuleSet::new();
        rules.register("www.example.com", &[]);
        assert!(rules.classify_url("https://example.com/").is_blocked());
    }

    #[test]
    fn test_other_subdomain_is_distinct() {
        let rules = youtube_rules();
        assert!(!rules.classify_url("https://m.youtube.com/").is_blocked());
    }

    #[test]
    fn test_unregistered_domain_never_blocked() {
        let rules = youtube_rules();
        let verdict = rules.classify_url("https://example.com/anything");
        assert!(!verdict.is_blocked());
        assert!(matches!(verdict, Verdict::NoRule { .. }));
    }

    #[test]
    fn test_malformed_target_fails_open() {
        let rules = youtube_rules();
        assert_eq!(rules.classify_url("not a url"), Verdict::Unparseable);
        assert_eq!(rules.classify_url(""), Verdict::Unparseable);
        assert_eq!(rules.classify_url("youtube.com/watch"), Verdict::Unparseable);
    }

    #[test]
    fn test_url_without_host_fails_open() {
        let rules = youtube_rules();
        assert_eq!(rules.classify_url("mailto:me@youtube.com"), Verdict::Unparseable);
    }

    #[test]
    fn test_reregister_replaces_whitelist() {
        let mut rules = youtube_rules();
        rules.register("youtube.com", &["/feed".to_string()]);
        assert!(rules.classify_url("https://youtube.com/not").is_blocked());
        assert!(!rules.classify_url("https://youtube.com/feed").is_blocked());
    }

    #[test]
    fn test_empty_whitelist_blocks_everything() {
        let mut rules = RuleSet::new();
        rules.register("example.com", &[]);
        assert!(rules.classify_url("https://example.com/").is_blocked());
        assert!(rules
            .classify_url("https://example.com/any/path?q=1")
            .is_blocked());
    }

    #[test]
    fn test_tunnel_ignores_whitelist() {
        // No path is visible for CONNECT, so the whitelist cannot apply:
        // the registered domain is blocked outright at the tunnel layer.
        let rules = youtube_rules();
        let verdict = rules.classify_host("youtube.com");
        assert!(verdict.is_blocked());
    }

    #[test]
    fn test_tunnel_www_strip() {
        let rules = youtube_rules();
        assert!(rules.classify_host("www.youtube.com").is_blocked());
        assert!(!rules.classify_host("m.youtube.com").is_blocked());
    }

    #[test]
    fn test_tunnel_unregistered_host_allowed() {
        let rules = youtube_rules();
        let verdict = rules.classify_host("example.com");
        assert!(!verdict.is_blocked());
        assert!(matches!(verdict, Verdict::NoRule { .. }));
    }

    #[test]
    fn test_canonical_domain() {
        assert_eq!(canonical_domain("WWW.Example.COM"), "example.com");
        assert_eq!(canonical_domain("example.com"), "example.com");
        assert_eq!(canonical_domain("m.example.com"), "m.example.com");
        assert_eq!(canonical_domain("wwwexample.com"), "wwwexample.com");
    }

    #[test]
    fn test_whitelist_entries_lowercased_at_registration() {
        let mut rules = RuleSet::new();
        rules.register("example.com", &["/NotThis".to_string()]);
        let rule = rules.lookup("example.com").unwrap();
        assert_eq!(rule.whitelist_paths, vec!["/notthis"]);
    }

    #[test]
    fn test_path_whitelisted_helper_boundaries() {
        let rule = SiteRule {
            domain: "example.com".to_string(),
            whitelist_paths: vec!["/not".to_string()],
            blocked: true,
        };
        assert!(rule.path_whitelisted("/not").is_some());
        assert!(rule.path_whitelisted("/not/x").is_some());
        assert!(rule.path_whitelisted("/not?y=1").is_some());
        assert!(rule.path_whitelisted("/nothing").is_none());
        assert!(rule.path_whitelisted("/no").is_none());
    }

    #[test]
    fn test_multiple_whitelist_entries_all_tried() {
        let mut rules = RuleSet::new();
        rules.register(
            "example.com",
            &["/a".to_string(), "/b".to_string(), "/c".to_string()],
        );
        assert!(!rules.classify_url("https://example.com/c/deep").is_blocked());
        assert!(rules.classify_url("https://example.com/d").is_blocked());
    }

    #[test]
    fn test_blocked_domains_flat_list() {
        let mut rules = youtube_rules();
        rules.register("www.reddit.com", &[]);
        assert_eq!(rules.blocked_domains(), vec!["reddit.com", "youtube.com"]);
    }

    #[test]
    fn test_disabled_rule_is_not_blocked() {
        let mut rules = youtube_rules();
        // Registration never produces blocked=false, but classification
        // honors the flag for a future enable/disable surface.
        if let Some(rule) = rules.rules.get_mut("youtube.com") {
            rule.blocked = false;
        }
        assert!(!rules.classify_url("https://youtube.com/").is_blocked());
        assert!(!rules.classify_host("youtube.com").is_blocked());
    }

    #[test]
    fn test_verdict_reason() {
        let rules = youtube_rules();
        let verdict = rules.classify_url("https://youtube.com/watch");
        assert!(verdict.reason().contains("youtube.com"));

        let verdict = rules.classify_url("https://youtube.com/not");
        assert!(verdict.reason().contains("/not"));
    }

    #[test]
    fn test_len_and_empty() {
        let mut rules = RuleSet::new();
        assert!(rules.is_empty());
        rules.register("example.com", &[]);
        rules.register("www.example.com", &[]);
        // Same canonical key, one rule
        assert_eq!(rules.len(), 1);
    }
}

//! Core rule registry and traffic classifier for the sitegate proxy.
//!
//! This crate is pure and synchronous: it holds the set of blocked
//! domains with their whitelisted path prefixes and answers
//! allow/block questions about request targets. All network I/O lives
//! in `sitegate-proxy`.

pub mod rules;

pub use rules::{canonical_domain, RuleSet, SiteRule, Verdict};

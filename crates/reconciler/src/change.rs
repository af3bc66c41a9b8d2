//! Change detection.
//!
//! A snapshot is fingerprinted before and after the mapper runs; an update
//! is only needed when the two differ. The fingerprint covers exactly the
//! fields the mapper writes, so service-assigned fields never cause an
//! update.

use std::fmt;

use itertools::Itertools;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::mapper;
use crate::rule::{RemoteRule, RuleOptions};
use crate::types::MonitorSpec;

/// SHA-256 over the mapper-controlled fields of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().map(|b| format!("{b:02x}")).join(""))
    }
}

/// The fields the mapper writes, in a canonical form.
#[derive(Serialize)]
struct ComparisonView<'a> {
    name: &'a str,
    rule_type: &'a str,
    query: &'a str,
    message: &'a str,
    /// Tags are a set: order and duplicates do not matter.
    tags: Vec<&'a str>,
    options: &'a RuleOptions,
}

impl<'a> ComparisonView<'a> {
    fn of(rule: &'a RemoteRule) -> Self {
        Self {
            name: &rule.name,
            rule_type: &rule.rule_type,
            query: &rule.query,
            message: &rule.message,
            tags: rule.tags.iter().map(String::as_str).sorted().dedup().collect(),
            options: &rule.options,
        }
    }
}

/// Fingerprint the mapper-controlled fields of `rule`.
///
/// # Errors
///
/// Returns [`Error::MalformedSpec`] if the comparison view cannot be encoded.
pub fn fingerprint(rule: &RemoteRule) -> Result<Fingerprint> {
    let bytes = serde_json::to_vec(&ComparisonView::of(rule))
        .map_err(|e| Error::malformed_spec(format!("cannot fingerprint monitor: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(Fingerprint(hasher.finalize().into()))
}

/// Whether `after` differs from `before` on any mapper-controlled field.
///
/// # Errors
///
/// Returns an error if either rule cannot be fingerprinted.
pub fn has_changed(before: &RemoteRule, after: &RemoteRule) -> Result<bool> {
    Ok(fingerprint(before)? != fingerprint(after)?)
}

/// Result of mapping a spec onto a fetched snapshot.
#[derive(Debug, Clone)]
pub struct MappedRule {
    /// The snapshot with the spec applied.
    pub rule: RemoteRule,
    /// Whether writing `rule` back would change the remote monitor.
    pub changed: bool,
}

/// Map `spec` onto `snapshot` and report whether anything changed.
///
/// Options the service filled in and the spec leaves out are carried over
/// by the mapper, so they never count as a change.
///
/// # Errors
///
/// Returns [`Error::MalformedSpec`] if the spec cannot be mapped.
pub fn detect(snapshot: &RemoteRule, spec: &MonitorSpec) -> Result<MappedRule> {
    let rule = mapper::apply(snapshot, spec)?;
    let changed = has_changed(snapshot, &rule)?;
    Ok(MappedRule { rule, changed })
}

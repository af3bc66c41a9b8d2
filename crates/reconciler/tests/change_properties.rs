//! Property tests for change detection.
//!
//! The detector must report a change exactly when mapping a different spec
//! would alter a mapper-controlled field, and must ignore fields the mapper
//! never writes and options the spec leaves to the service.

use std::collections::BTreeSet;

use ddmon_reconciler::{detect, fingerprint, mapper, MonitorSpec, RemoteRule, ServerFields};
use proptest::prelude::*;
use serde_json::json;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn spec_strategy() -> impl Strategy<Value = MonitorSpec> {
    (
        prop::sample::select(vec!["cpu-high", "disk-full", "mem-low"]),
        prop::sample::select(vec!["metric alert", "query alert"]),
        prop::sample::select(vec!["avg:cpu>80", "avg:disk>90", "min:mem<10"]),
        prop::sample::select(vec!["", "paging @ops"]),
        prop::collection::vec(prop::sample::select(vec!["a:1", "b:2", "c:3"]), 0..4),
        0u32..200,
        any::<bool>(),
    )
        .prop_map(|(name, kind, query, message, tags, critical, notify)| {
            // Every spec names the same option keys, so mapping over another
            // spec's result replaces them all.
            let options = json!({
                "thresholds": {"critical": critical},
                "notify_no_data": notify
            });
            MonitorSpec {
                name: name.to_string(),
                monitor_type: kind.to_string(),
                query: query.to_string(),
                message: message.to_string(),
                tags: tags.into_iter().map(String::from).collect(),
                options,
            }
        })
}

fn server_strategy() -> impl Strategy<Value = ServerFields> {
    (
        prop::option::of(prop::sample::select(vec!["OK", "Alert", "No Data"])),
        prop::option::of(1i64..1000),
        any::<bool>(),
    )
        .prop_map(|(state, org, multi)| ServerFields {
            overall_state: state.map(String::from),
            org_id: org,
            other: [("multi".to_string(), json!(multi))].into_iter().collect(),
            ..Default::default()
        })
}

/// Mapper-controlled fields, with tags as a set.
fn controlled(rule: &RemoteRule) -> impl PartialEq + std::fmt::Debug + '_ {
    (
        &rule.name,
        &rule.rule_type,
        &rule.query,
        &rule.message,
        rule.tags.iter().collect::<BTreeSet<_>>(),
        &rule.options,
    )
}

proptest! {
    #[test]
    fn detector_reports_change_iff_mapped_fields_differ(
        first in spec_strategy(),
        second in spec_strategy(),
        server in server_strategy(),
    ) {
        let snapshot = RemoteRule { id: Some(42), server, ..Default::default() };

        let under_first = unwrap_result(mapper::apply(&snapshot, &first), "map first");
        let under_second = unwrap_result(mapper::apply(&snapshot, &second), "map second");
        let mapped = unwrap_result(detect(&under_first, &second), "detect");

        let differs = controlled(&under_first) != controlled(&under_second);
        prop_assert_eq!(mapped.changed, differs);
    }

    #[test]
    fn server_fields_never_count_as_change(
        spec in spec_strategy(),
        before in server_strategy(),
        after in server_strategy(),
    ) {
        let base = RemoteRule { id: Some(7), server: before, ..Default::default() };
        let mut converged = unwrap_result(mapper::apply(&base, &spec), "map");
        converged.server = after;

        let mapped = unwrap_result(detect(&converged, &spec), "detect");
        prop_assert!(!mapped.changed);
    }

    #[test]
    fn service_filled_options_never_count_as_change(
        spec in spec_strategy(),
        delay in prop::option::of(0i64..600),
        include_tags in prop::option::of(any::<bool>()),
        audit in prop::option::of(any::<bool>()),
    ) {
        let mut converged = unwrap_result(mapper::apply(&RemoteRule::empty(), &spec), "map");
        converged.options.new_host_delay = delay;
        converged.options.include_tags = include_tags;
        converged.options.notify_audit = audit;
        converged.options.extra.insert("on_missing_data".into(), json!("default"));

        let mapped = unwrap_result(detect(&converged, &spec), "detect");
        prop_assert!(!mapped.changed);
    }

    #[test]
    fn fingerprint_ignores_tag_order(spec in spec_strategy()) {
        let rule = unwrap_result(mapper::apply(&RemoteRule::empty(), &spec), "map");
        let mut reversed = rule.clone();
        reversed.tags.reverse();

        prop_assert_eq!(
            unwrap_result(fingerprint(&rule), "fingerprint"),
            unwrap_result(fingerprint(&reversed), "fingerprint reversed")
        );
    }
}

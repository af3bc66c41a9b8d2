//! Rule mapper: writes a desired spec onto a remote snapshot.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::rule::{RemoteRule, RuleOptions};
use crate::types::MonitorSpec;

/// Interpret the opaque options payload of a spec.
///
/// `null` (an omitted payload) means no options. Anything else has to be an
/// object whose known keys have the right types.
///
/// # Errors
///
/// Returns [`Error::MalformedSpec`] if the payload is not an object or a
/// known key has the wrong type.
pub fn parse_options(raw: &Value) -> Result<RuleOptions> {
    match raw {
        Value::Null => Ok(RuleOptions::default()),
        Value::Object(_) => RuleOptions::deserialize(raw)
            .map_err(|e| Error::malformed_spec(format!("invalid options: {e}"))),
        other => Err(Error::malformed_spec(format!(
            "options must be an object, got {}",
            json_kind(other)
        ))),
    }
}

/// Lay the options payload of a spec over the options a snapshot carries.
///
/// Keys the payload names win, recursing into nested objects such as
/// `thresholds`; keys it omits keep the value the service reported. An
/// explicit `null` clears a key. A `null` payload changes nothing.
///
/// # Errors
///
/// Returns [`Error::MalformedSpec`] if the payload does not parse or the
/// merged options do not deserialise.
pub fn merge_options(current: &RuleOptions, raw: &Value) -> Result<RuleOptions> {
    if raw.is_null() {
        return Ok(current.clone());
    }
    parse_options(raw)?;

    let mut merged = serde_json::to_value(current)
        .map_err(|e| Error::malformed_spec(format!("cannot encode current options: {e}")))?;
    merge_value(&mut merged, raw);
    RuleOptions::deserialize(&merged)
        .map_err(|e| Error::malformed_spec(format!("invalid options: {e}")))
}

fn merge_value(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_value(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}

/// Return `snapshot` with every desired field of `spec` written over it.
///
/// Identity and service-assigned fields are carried over unchanged, as are
/// options the spec does not name (see [`merge_options`]). The options
/// payload is checked first, so a malformed spec leaves nothing
/// half-applied.
///
/// # Errors
///
/// Returns [`Error::MalformedSpec`] if the options payload is malformed.
pub fn apply(snapshot: &RemoteRule, spec: &MonitorSpec) -> Result<RemoteRule> {
    let options = merge_options(&snapshot.options, &spec.options)?;

    Ok(RemoteRule {
        id: snapshot.id,
        name: spec.name.clone(),
        rule_type: spec.monitor_type.clone(),
        query: spec.query.clone(),
        message: spec.message.clone(),
        tags: spec.tags.clone(),
        options,
        server: snapshot.server.clone(),
    })
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Lifecycle gate: finalizer markers on a record's metadata.
//!
//! None of these functions contact the remote service. Callers add the
//! marker only after the external monitor is durably linked, and remove it
//! only after the external monitor is gone.

use crate::types::ObjectMeta;

/// Marker owned by this operator.
pub const FINALIZER: &str = "monitoring.datadog.com.monitor";

/// Whether `finalizer` is present.
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers.iter().any(|f| f == finalizer)
}

/// Append `finalizer` unless already present. Returns whether it was added.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers.push(finalizer.to_string());
    true
}

/// Remove `finalizer`, keeping every other marker in order.
/// Returns whether anything was removed.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let before = meta.finalizers.len();
    meta.finalizers.retain(|f| f != finalizer);
    meta.finalizers.len() != before
}

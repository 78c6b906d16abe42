//! Device-acceptance policy: a logical OR over user-supplied regex patterns.
use regex::RegexBuilder;

use crate::status::{Severity, StatusSink};

/// Decides whether a device arrival should trigger a restart run.
///
/// Returns `true` iff `device_id` matches any of `patterns`, compiled
/// case-insensitively, short-circuiting on the first match. Two deliberate
/// asymmetries, both inherited product decisions:
///
/// - An empty pattern set accepts *every* device (fail-open, "no filters
///   configured means monitor everything"). A warning is reported each time
///   because on a device-heavy machine this restarts applications on every
///   arrival.
/// - An empty `device_id` (device metadata unavailable) matches nothing,
///   even patterns like `.*` that would regex-match the empty string.
///
/// A pattern that fails to compile is a non-match for that pattern only:
/// it is reported once per evaluation and the remaining patterns still run.
///
/// Pure over its inputs; safe to call concurrently.
pub fn accepts(device_id: &str, patterns: &[String], sink: &dyn StatusSink) -> bool {
    if patterns.is_empty() {
        sink.report(
            Severity::Warning,
            "no device filters configured; every device arrival will trigger a restart",
        );
        return true;
    }
    if device_id.is_empty() {
        return false;
    }

    for pattern in patterns {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => {
                if re.is_match(device_id) {
                    return true;
                }
            }
            Err(e) => {
                sink.report(Severity::Warning, &format!("invalid device filter '{pattern}': {e}"));
            }
        }
    }
    false
}

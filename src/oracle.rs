//! External lookups for OPCheckThirdParty
//!
//! This is the only place script evaluation leaves the process. A value fetched
//! here can differ between two validators, or between two evaluations on the
//! same validator, so scripts using it are not reproducible. The capability is
//! off unless `SCRIPT_ENABLE_THIRD_PARTY` is set, and every failure (disabled,
//! network, timeout, bad JSON) reads as a failed check.

use crate::types::ScriptContext;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// Extract `path` from `document`.
///
/// Paths are dot separated. A numeric segment indexes into an array; any other
/// segment is an object key. Strings come back without quotes, every other JSON
/// value as its compact JSON text. Missing fields and `null` yield `None`.
pub fn extract_field(document: &JsonValue, path: &str) -> Option<String> {
    let mut current = document;
    if !path.is_empty() {
        for segment in path.split('.') {
            current = match current {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
    }

    match current {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse `body` as JSON and extract `path` from it
pub fn extract_field_from_text(body: &str, path: &str) -> Option<String> {
    let document: JsonValue = serde_json::from_str(body).ok()?;
    extract_field(&document, path)
}

/// Compare the field at `path` of a JSON `body` with `expected`.
///
/// A missing field or `null` reads as the empty string, so it matches an
/// expected value of `""`. A body that is not JSON never matches.
pub fn field_matches(body: &str, path: &str, expected: &str) -> bool {
    match serde_json::from_str::<JsonValue>(body) {
        Ok(document) => extract_field(&document, path).unwrap_or_default() == expected,
        Err(e) => {
            debug!(error = %e, "third-party response is not JSON");
            false
        }
    }
}

/// OPCheckThirdParty: GET `url`, pull `path` out of the JSON body and compare
/// it with `expected`.
pub fn check_third_party(ctx: &ScriptContext, url: &str, path: &str, expected: &str) -> bool {
    if !ctx.third_party_enabled() {
        debug!(url, "third-party script lookup disabled");
        return false;
    }

    match fetch(ctx, url) {
        Some(body) => field_matches(&body, path, expected),
        None => false,
    }
}

#[cfg(feature = "third-party-http")]
fn fetch(ctx: &ScriptContext, url: &str) -> Option<String> {
    use std::time::Duration;

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(ctx.third_party_timeout_secs))
        .build()
        .map_err(|e| warn!(error = %e, "failed to build third-party client"))
        .ok()?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| warn!(url, error = %e, "third-party lookup failed"))
        .ok()?;

    if !response.status().is_success() {
        warn!(url, status = %response.status(), "third-party lookup returned error status");
        return None;
    }

    response
        .text()
        .map_err(|e| warn!(url, error = %e, "third-party response unreadable"))
        .ok()
}

#[cfg(not(feature = "third-party-http"))]
fn fetch(_ctx: &ScriptContext, url: &str) -> Option<String> {
    warn!(url, "built without third-party-http, lookup skipped");
    None
}

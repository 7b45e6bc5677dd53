//! Sample response files and their on-disk layout.
//!
//! A sample file is either a response envelope (`{status, headers, body}`
//! with defaults applied) or a raw JSON payload served as-is. Samples for a
//! route live folder-first under `samples/<path template>/`, falling back to
//! the legacy flat file name at the samples root.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// A fully materialized response ready to hand to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<Value>,
}

/// Load a sample file and apply envelope defaults.
///
/// An empty file yields `200` with an empty JSON object. A JSON object
/// carrying any of `status`/`headers`/`body` is treated as an envelope;
/// everything else is served raw with status 200.
pub fn load_sample(path: &Path) -> anyhow::Result<SampleResponse> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read sample {}", path.display()))?;
    let raw = raw.trim();

    if raw.is_empty() {
        return Ok(default_response());
    }

    if looks_like_envelope(raw) {
        if let Ok(env) = serde_json::from_str::<Envelope>(raw) {
            return materialize_envelope(env);
        }
    }

    Ok(SampleResponse {
        status: 200,
        headers: default_headers(),
        body: raw.as_bytes().to_vec(),
    })
}

fn materialize_envelope(env: Envelope) -> anyhow::Result<SampleResponse> {
    let status = match env.status {
        Some(0) | None => 200,
        Some(s) => s,
    };

    let mut headers = env.headers.unwrap_or_default();
    if header_get(&headers, "content-type").is_none() {
        headers.insert("content-type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
    }

    let body = match env.body {
        None | Some(Value::Null) => b"{}".to_vec(),
        Some(value) => serde_json::to_vec(&value).context("marshal envelope body")?,
    };

    Ok(SampleResponse {
        status,
        headers,
        body,
    })
}

fn default_response() -> SampleResponse {
    SampleResponse {
        status: 200,
        headers: default_headers(),
        body: b"{}".to_vec(),
    }
}

fn default_headers() -> HashMap<String, String> {
    HashMap::from([(
        "content-type".to_string(),
        DEFAULT_CONTENT_TYPE.to_string(),
    )])
}

/// Case-insensitive header lookup.
pub fn header_get<'a>(headers: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn looks_like_envelope(raw: &str) -> bool {
    if !(raw.starts_with('{') && raw.ends_with('}')) {
        return false;
    }
    match serde_json::from_str::<HashMap<String, Value>>(raw) {
        Ok(m) if !m.is_empty() => {
            m.contains_key("status") || m.contains_key("headers") || m.contains_key("body")
        }
        _ => false,
    }
}

/// Directory holding a route's samples, mirroring its path template.
pub fn sample_dir(base: &Path, template: &str) -> PathBuf {
    base.join(template.trim_start_matches('/'))
}

/// Location of a route's scenario definition, if one is configured.
pub fn scenario_path(base: &Path, template: &str) -> PathBuf {
    sample_dir(base, template).join("scenario.json")
}

/// Resolve a route's sample file: folder-first (`<dir>/<METHOD>.json`), then
/// the legacy flat name at the samples root. Returns the first existing path.
pub fn resolve_sample_path(
    base: &Path,
    template: &str,
    method: &str,
    flat_name: &str,
) -> Option<PathBuf> {
    let nested = sample_dir(base, template).join(format!("{}.json", method.to_uppercase()));
    if nested.is_file() {
        return Some(nested);
    }
    let flat = base.join(flat_name);
    flat.is_file().then_some(flat)
}

//! In-memory model of the OpenAPI document.
//!
//! The document is kept as raw JSON; this module only interprets the parts
//! the server needs: declared paths and methods, required body parameters,
//! and response examples for the fallback mode. Declaration order of the
//! `paths` object is preserved so the route table is deterministic.

use anyhow::Context;
use serde_json::Value;
use std::path::Path;

/// HTTP methods recognized as operation keys in a path item. Anything else
/// (`parameters`, `summary`, vendor extensions) is skipped.
const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// A parsed API specification.
#[derive(Debug, Clone)]
pub struct ApiSpec {
    doc: Value,
}

impl ApiSpec {
    /// Parse a specification from a JSON or YAML string.
    pub fn from_str(raw: &str) -> anyhow::Result<Self> {
        // YAML is a superset of JSON, so one parser covers both formats
        let doc: Value = serde_yaml::from_str(raw).context("parse API specification")?;
        Ok(Self { doc })
    }

    /// Load a specification from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read API specification {}", path.display()))?;
        Self::from_str(&raw)
    }

    /// Iterate declared (path template, methods) pairs in declaration order.
    ///
    /// Methods are returned lowercase as they appear in the document.
    pub fn paths(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.doc
            .get("paths")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .map(|(template, item)| {
                let methods = item
                    .as_object()
                    .map(|ops| {
                        ops.keys()
                            .map(String::as_str)
                            .filter(|k| METHODS.contains(&k.to_ascii_lowercase().as_str()))
                            .collect()
                    })
                    .unwrap_or_default();
                (template.as_str(), methods)
            })
    }

    /// Whether the operation declares a required `in: body` parameter.
    pub fn has_required_body_param(&self, template: &str, method: &str) -> bool {
        let params = match self
            .operation(template, method)
            .and_then(|op| op.get("parameters"))
            .and_then(Value::as_array)
        {
            Some(p) => p,
            None => return false,
        };

        params.iter().any(|p| {
            p.get("in").and_then(Value::as_str) == Some("body")
                && p.get("required").and_then(Value::as_bool) == Some(true)
        })
    }

    /// Dig the first response example out of the operation, for fallback
    /// responses when no sample file exists on disk.
    ///
    /// Understands both the Swagger 2 `responses.<status>.examples` shape and
    /// the OpenAPI 3 `responses.<status>.content.<media>.example(s)` shape.
    pub fn response_example(&self, template: &str, method: &str) -> Option<(u16, Value)> {
        let responses = self
            .operation(template, method)?
            .get("responses")?
            .as_object()?;

        for (status_key, response) in responses {
            let status = status_key.parse::<u16>().unwrap_or(200);

            // Swagger 2: examples keyed by media type
            if let Some(examples) = response.get("examples").and_then(Value::as_object) {
                if let Some(example) = examples.values().next() {
                    return Some((status, example.clone()));
                }
            }

            // OpenAPI 3: content.<media>.example or content.<media>.examples.<name>.value
            if let Some(content) = response.get("content").and_then(Value::as_object) {
                for media in content.values() {
                    if let Some(example) = media.get("example") {
                        return Some((status, example.clone()));
                    }
                    if let Some(named) = media.get("examples").and_then(Value::as_object) {
                        if let Some(first) = named.values().next() {
                            if let Some(value) = first.get("value") {
                                return Some((status, value.clone()));
                            }
                        }
                    }
                }
            }
        }

        None
    }

    fn operation(&self, template: &str, method: &str) -> Option<&Value> {
        self.doc
            .get("paths")?
            .get(template)?
            .get(method.to_ascii_lowercase())
    }
}

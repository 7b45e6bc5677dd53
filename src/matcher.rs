//! Path template matching and trigger rules.
//!
//! Compiles OpenAPI-style path templates (`/items/{id}`) into anchored
//! matchers, extracts path parameters, and evaluates the advance/reset/start
//! rules that drive scenario transitions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while compiling a path template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("duplicate path parameter {name:?} in template {template:?}")]
    DuplicateParam { template: String, name: String },

    #[error("compile template {template:?}: {source}")]
    Pattern {
        template: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled OpenAPI-style path template.
///
/// Literal segments match verbatim, `{name}` segments match exactly one
/// non-empty path segment. The whole path must match; a trailing slash on
/// the concrete path is tolerated.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    pattern: Regex,
}

impl PathTemplate {
    /// Compile a template string into an anchored matcher.
    ///
    /// Placeholder names must be unique within one template.
    pub fn compile(template: &str) -> Result<Self, TemplateError> {
        let mut seen = HashSet::new();
        let mut parts = Vec::new();

        for seg in template.split('/') {
            if seg.is_empty() {
                continue;
            }
            if let Some(name) = placeholder_name(seg) {
                if !seen.insert(name.to_string()) {
                    return Err(TemplateError::DuplicateParam {
                        template: template.to_string(),
                        name: name.to_string(),
                    });
                }
                parts.push("([^/]+)".to_string());
            } else {
                parts.push(regex::escape(seg));
            }
        }

        let pat = format!("^/{}/?$", parts.join("/"));
        let pattern = Regex::new(&pat).map_err(|source| TemplateError::Pattern {
            template: template.to_string(),
            source,
        })?;

        Ok(Self {
            raw: template.to_string(),
            pattern,
        })
    }

    /// The template string this matcher was compiled from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a concrete path matches this template.
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    /// Extract the value of the placeholder `name` from a concrete path.
    pub fn extract_param(&self, path: &str, name: &str) -> Option<String> {
        extract_path_param(&self.raw, path, name)
    }
}

/// Extract a named path parameter by aligning template and path segments.
///
/// Returns `None` when the segment counts differ or the template has no
/// placeholder with that name.
pub fn extract_path_param(template: &str, path: &str, name: &str) -> Option<String> {
    let tpl = split_segments(template);
    let act = split_segments(path);
    if tpl.len() != act.len() {
        return None;
    }
    tpl.iter().zip(&act).find_map(|(t, a)| {
        placeholder_name(t)
            .filter(|n| *n == name)
            .map(|_| (*a).to_string())
    })
}

/// Segment-level template match used by rule paths (placeholders match any
/// single segment).
pub fn template_path_matches(template: &str, path: &str) -> bool {
    let tpl = split_segments(template);
    let act = split_segments(path);
    if tpl.len() != act.len() {
        return false;
    }
    tpl.iter()
        .zip(&act)
        .all(|(t, a)| placeholder_name(t).is_some() || t == a)
}

/// A (method, optional path template) predicate on incoming requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    /// HTTP method, matched case-insensitively
    pub method: String,

    /// Optional path template; absent or blank means match-any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl MatchRule {
    /// Whether this rule matches the request.
    ///
    /// `path` is `None` when the caller evaluates the rule without a concrete
    /// path (advance checks); a rule carrying a path cannot match then.
    pub fn matches(&self, method: &str, path: Option<&str>) -> bool {
        if !self.method.trim().eq_ignore_ascii_case(method) {
            return false;
        }
        match self.path.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(rule_path) => path
                .map(|p| template_path_matches(rule_path, p))
                .unwrap_or(false),
        }
    }
}

/// Whether any rule in the list matches.
pub fn any_rule_matches(rules: &[MatchRule], method: &str, path: Option<&str>) -> bool {
    rules.iter().any(|r| r.matches(method, path))
}

fn placeholder_name(segment: &str) -> Option<&str> {
    segment.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
}

fn split_segments(p: &str) -> Vec<&str> {
    p.trim_matches('/').split('/').collect()
}

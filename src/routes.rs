//! Route table built once from the API specification.

use crate::matcher::{PathTemplate, TemplateError};
use crate::spec::ApiSpec;

/// A compiled (method, path template) pair with its derived sample file name.
///
/// Routes are immutable after construction; the table is built at startup
/// and read-only for the life of the process.
#[derive(Debug, Clone)]
pub struct Route {
    /// Uppercase HTTP method
    pub method: String,
    /// Compiled path template
    pub template: PathTemplate,
    /// Legacy flat sample file name, e.g. `GET__items_{id}.json`
    pub sample_file: String,
}

/// Build one route per declared (path, method) pair, in the specification's
/// declaration order. First-match lookup therefore prefers earlier
/// declarations when templates overlap.
pub fn build_routes(spec: &ApiSpec) -> Result<Vec<Route>, TemplateError> {
    let mut out = Vec::new();
    for (template, methods) in spec.paths() {
        let compiled = PathTemplate::compile(template)?;
        for m in methods {
            let method = m.to_uppercase();
            out.push(Route {
                sample_file: sample_file_name(&method, template),
                template: compiled.clone(),
                method,
            });
        }
    }
    Ok(out)
}

/// Find the first route whose method and template match the request.
pub fn find_route<'a>(routes: &'a [Route], method: &str, path: &str) -> Option<&'a Route> {
    routes
        .iter()
        .find(|r| r.method.eq_ignore_ascii_case(method) && r.template.matches(path))
}

/// Derive the flat sample file name for a (method, template) pair.
pub fn sample_file_name(method: &str, template: &str) -> String {
    let flat = template.trim_start_matches('/').replace('/', "_");
    format!("{}__{}.json", method.to_uppercase(), flat)
}

//! Server settings.
//!
//! Mirrors the environment variables the server has always been driven by;
//! the CLI layer maps flags and env vars onto these values.

use clap::ValueEnum;

/// How requests are validated against the specification before a sample is
/// served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValidationMode {
    /// No request validation
    None,
    /// Reject requests with an empty body when the operation requires one
    Required,
}

/// What to serve when no sample file exists for a matched route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackMode {
    /// Respond 404
    None,
    /// Serve the first response example declared in the specification
    #[value(name = "openapi_examples")]
    OpenapiExamples,
}

/// Runtime settings for the sample server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub validation_mode: ValidationMode,
    pub fallback_mode: FallbackMode,
    /// Log the route table at startup and expose `GET /__routes`
    pub debug_routes: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::Required,
            fallback_mode: FallbackMode::OpenapiExamples,
            debug_routes: false,
        }
    }
}

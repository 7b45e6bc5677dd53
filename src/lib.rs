//! OpenAPI Sample Server
//!
//! Emulates an API described by an OpenAPI specification, returning canned
//! responses instead of live business logic. Useful for testing clients
//! against realistic request/response shapes and multi-step lifecycle
//! behavior without a real backend.
//!
//! # Features
//!
//! - **Route Table**: one route per declared (path, method) pair, compiled
//!   once at startup in declaration order
//! - **Path Templates**: OpenAPI-style `{name}` placeholders with parameter
//!   extraction
//! - **Sample Files**: response envelopes (`{status, headers, body}`) or raw
//!   JSON payloads, folder-first layout with a flat-file fallback
//! - **Scenarios**: step-indexed or time-indexed resource lifecycles, tracked
//!   per resource instance and driven by advance/reset rules
//! - **Spec Fallback**: serve the response example declared in the
//!   specification when no sample file exists
//!
//! # Example Scenario
//!
//! ```json
//! {
//!   "version": 1,
//!   "mode": "step",
//!   "key": {"pathParam": "id"},
//!   "sequence": [
//!     {"state": "pending", "file": "pending.json"},
//!     {"state": "ready", "file": "ready.json"}
//!   ],
//!   "behavior": {
//!     "advanceOn": [{"method": "GET"}],
//!     "resetOn": [{"method": "DELETE", "path": "/items/{id}"}]
//!   }
//! }
//! ```

pub mod config;
pub mod matcher;
pub mod routes;
pub mod samples;
pub mod scenario;
pub mod server;
pub mod spec;

pub use config::ServerSettings;
pub use scenario::{ScenarioDefinition, ScenarioEngine};
pub use server::SampleServer;
pub use spec::ApiSpec;

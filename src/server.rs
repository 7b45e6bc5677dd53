//! HTTP service: routes requests to samples and scenarios.
//!
//! The server owns the route table (built once, read-only afterwards), the
//! scenario definitions loaded at startup, and one [`ScenarioEngine`]
//! instance. Each inbound request is matched against the route table,
//! optionally validated, then answered from a scenario resolution, a sample
//! file, or a specification example.

use crate::config::{FallbackMode, ServerSettings, ValidationMode};
use crate::routes::{build_routes, find_route, Route};
use crate::samples::{load_sample, resolve_sample_path, sample_dir, scenario_path, SampleResponse};
use crate::scenario::{load_scenario, ScenarioDefinition, ScenarioEngine};
use crate::spec::ApiSpec;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const ROUTES_ENDPOINT: &str = "/__routes";
const STATE_HEADER: &str = "x-scenario-state";

/// A route's scenario configuration, loaded and validated at startup.
enum ScenarioSlot {
    Ready {
        /// Scenario identity handed to the engine (the definition file path)
        id: String,
        definition: ScenarioDefinition,
    },
    /// Validation failed; the route is not served
    Invalid(String),
}

/// One route as reported by the `/__routes` debug endpoint.
#[derive(Debug, Serialize)]
struct RouteInfo<'a> {
    method: &'a str,
    path: &'a str,
    sample_file: &'a str,
    scenario: bool,
}

/// The sample server: route table, scenario engine, and request handling.
pub struct SampleServer {
    settings: ServerSettings,
    spec: ApiSpec,
    routes: Vec<Route>,
    /// Scenario slots keyed by path template
    scenarios: HashMap<String, ScenarioSlot>,
    samples_dir: PathBuf,
    engine: ScenarioEngine,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
}

impl SampleServer {
    /// Build the server: compile the route table and load every scenario
    /// definition found under the samples directory.
    pub fn new(
        spec: ApiSpec,
        samples_dir: PathBuf,
        settings: ServerSettings,
    ) -> anyhow::Result<Self> {
        let routes = build_routes(&spec)?;

        let mut scenarios = HashMap::new();
        for route in &routes {
            let template = route.template.as_str();
            if scenarios.contains_key(template) {
                continue;
            }
            let path = scenario_path(&samples_dir, template);
            if !path.is_file() {
                continue;
            }
            match load_scenario(&path) {
                Ok(definition) => {
                    info!(
                        template,
                        mode = %definition.mode,
                        scenario = %path.display(),
                        "scenario enabled"
                    );
                    scenarios.insert(
                        template.to_string(),
                        ScenarioSlot::Ready {
                            id: path.to_string_lossy().into_owned(),
                            definition,
                        },
                    );
                }
                Err(e) => {
                    error!(template, error = %e, "invalid scenario, route will not be served");
                    scenarios.insert(template.to_string(), ScenarioSlot::Invalid(e.to_string()));
                }
            }
        }

        if settings.debug_routes {
            for r in &routes {
                debug!(
                    method = %r.method,
                    template = %r.template.as_str(),
                    sample_file = %r.sample_file,
                    "route"
                );
            }
        }
        info!(
            routes = routes.len(),
            scenarios = scenarios.len(),
            "route table built"
        );

        Ok(Self {
            settings,
            spec,
            routes,
            scenarios,
            samples_dir,
            engine: ScenarioEngine::new(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        })
    }

    /// Total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Total requests that matched a declared route.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Total requests with no matching route.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Handle one request and produce the response to write.
    pub fn handle(&self, method: &str, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if self.settings.debug_routes
            && method.eq_ignore_ascii_case("GET")
            && path == ROUTES_ENDPOINT
        {
            return self.routes_response();
        }

        let route = match find_route(&self.routes, method, path) {
            Some(r) => r,
            None => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                warn!(method, path, "no matching route");
                return json_error(StatusCode::NOT_FOUND, "not_found", "no matching route");
            }
        };
        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        debug!(method, path, template = %route.template.as_str(), "request matched route");

        if self.settings.validation_mode == ValidationMode::Required
            && self.spec.has_required_body_param(route.template.as_str(), method)
            && String::from_utf8_lossy(body).trim().is_empty()
        {
            return json_error(
                StatusCode::BAD_REQUEST,
                "validation_failed",
                "request body is required",
            );
        }

        match self.scenarios.get(route.template.as_str()) {
            Some(ScenarioSlot::Ready { id, definition }) => {
                self.scenario_response(route, id, definition, method, path)
            }
            Some(ScenarioSlot::Invalid(message)) => {
                error!(template = %route.template.as_str(), error = %message, "route has an invalid scenario");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "scenario_invalid", message)
            }
            None => self.static_response(route, method),
        }
    }

    fn scenario_response(
        &self,
        route: &Route,
        scenario_id: &str,
        definition: &ScenarioDefinition,
        method: &str,
        path: &str,
    ) -> Response<Full<Bytes>> {
        let resolved = match self.engine.resolve(
            scenario_id,
            definition,
            method,
            route.template.as_str(),
            path,
        ) {
            Ok(r) => r,
            Err(e) => {
                error!(scenario = scenario_id, error = %e, "scenario resolution failed");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "scenario_resolution_failed",
                    &e.to_string(),
                );
            }
        };
        debug!(
            scenario = scenario_id,
            state = %resolved.state,
            file = %resolved.file,
            "scenario resolved"
        );

        let file = sample_dir(&self.samples_dir, route.template.as_str()).join(&resolved.file);
        match load_sample(&file) {
            Ok(sample) => {
                let mut response = sample_response(sample);
                if let Ok(value) = resolved.state.parse() {
                    response.headers_mut().insert(STATE_HEADER, value);
                }
                response
            }
            Err(e) => {
                error!(file = %file.display(), error = %e, "failed to load scenario sample");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "sample_load_failed",
                    &e.to_string(),
                )
            }
        }
    }

    fn static_response(&self, route: &Route, method: &str) -> Response<Full<Bytes>> {
        let template = route.template.as_str();
        if let Some(path) =
            resolve_sample_path(&self.samples_dir, template, method, &route.sample_file)
        {
            return match load_sample(&path) {
                Ok(sample) => sample_response(sample),
                Err(e) => {
                    error!(file = %path.display(), error = %e, "failed to load sample");
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "sample_load_failed",
                        &e.to_string(),
                    )
                }
            };
        }

        if self.settings.fallback_mode == FallbackMode::OpenapiExamples {
            if let Some((status, example)) = self.spec.response_example(template, method) {
                debug!(template, method, status, "serving specification example");
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
                return json_response(status, &example);
            }
        }

        warn!(template, method, "no sample available");
        json_error(StatusCode::NOT_FOUND, "sample_not_found", "no sample available")
    }

    fn routes_response(&self) -> Response<Full<Bytes>> {
        let infos: Vec<RouteInfo<'_>> = self
            .routes
            .iter()
            .map(|r| RouteInfo {
                method: &r.method,
                path: r.template.as_str(),
                sample_file: &r.sample_file,
                scenario: matches!(
                    self.scenarios.get(r.template.as_str()),
                    Some(ScenarioSlot::Ready { .. })
                ),
            })
            .collect();
        json_response(StatusCode::OK, &infos)
    }

    /// Accept connections until ctrl-c, then drain in-flight requests.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!(%addr, "sample server listening");

        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Accept loop with graceful shutdown: once `shutdown` resolves, no new
    /// connections are accepted and the method returns only after every
    /// in-flight response has been written.
    async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        let graceful = GracefulShutdown::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = accepted.context("accept connection")?;
                    let io = TokioIo::new(stream);
                    let server = Arc::clone(&self);

                    let service = service_fn(move |req| {
                        let server = Arc::clone(&server);
                        async move { serve_request(req, server).await }
                    });
                    let connection = graceful.watch(http1::Builder::new().serve_connection(io, service));

                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            if !e.is_incomplete_message() {
                                warn!(remote = %remote, error = %e, "HTTP connection error");
                            }
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        info!("draining connections");
        graceful.shutdown().await;
        Ok(())
    }
}

async fn serve_request(
    req: Request<Incoming>,
    server: Arc<SampleServer>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "failed to read request body",
            ));
        }
    };

    Ok(server.handle(&method, &path, &body))
}

/// Build a response from a loaded sample, carrying its headers through.
fn sample_response(sample: SampleResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(sample.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &sample.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(Bytes::from(sample.body)))
        .unwrap_or_else(|e| {
            error!(error = %e, "invalid sample headers");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "sample_load_failed",
                "sample carries invalid headers",
            )
        })
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body)
        .unwrap_or_else(|e| format!(r#"{{"error":"serialization","message":"{e}"}}"#));
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .expect("static response builder")
}

fn json_error(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        &serde_json::json!({"error": code, "message": message}),
    )
}

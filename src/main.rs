//! OpenAPI Sample Server - CLI entry point.

use anyhow::Result;
use clap::Parser;
use openapi_sample_server::config::{FallbackMode, ServerSettings, ValidationMode};
use openapi_sample_server::server::SampleServer;
use openapi_sample_server::spec::ApiSpec;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "openapi-sample-server",
    about = "Serve canned responses and scripted resource lifecycles from an OpenAPI spec",
    version
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8086)]
    port: u16,

    /// Path to the OpenAPI specification (JSON or YAML)
    #[arg(short, long, env = "SPEC_PATH", default_value = "/work/swagger.json")]
    spec: PathBuf,

    /// Directory holding sample files and scenario definitions
    #[arg(long, env = "SAMPLES_DIR", default_value = "/work/sample")]
    samples: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Request validation mode
    #[arg(long, env = "VALIDATION_MODE", value_enum, default_value_t = ValidationMode::Required)]
    validation_mode: ValidationMode,

    /// What to serve when a sample file is missing
    #[arg(long, env = "FALLBACK_MODE", value_enum, default_value_t = FallbackMode::OpenapiExamples)]
    fallback_mode: FallbackMode,

    /// Log the route table and expose GET /__routes
    #[arg(long, env = "DEBUG_ROUTES")]
    debug_routes: bool,

    /// Validate the spec and scenarios, then exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(spec = %args.spec.display(), "loading API specification");
    let spec = ApiSpec::from_file(&args.spec)?;

    let settings = ServerSettings {
        validation_mode: args.validation_mode,
        fallback_mode: args.fallback_mode,
        debug_routes: args.debug_routes,
    };
    let server = SampleServer::new(spec, args.samples, settings)?;

    if args.validate {
        println!(
            "Specification is valid ({} routes declared)",
            server.routes().len()
        );
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    Arc::new(server).run(addr).await
}

mod config;
mod constants;
mod engine;
mod error;
mod lifecycle;
mod routes;
mod session;
mod transforms;

#[cfg(test)]
mod testing;

use axum::ServiceExt;
use axum::http::{HeaderValue, Method, header};
use clap::Parser;
use config::{Config, CorsMode};
use engine::{ClaudeCli, QueryEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use constants::{SERVICE_NAME, SESSION_HEADER};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<dyn QueryEngine>,
}

#[derive(Parser)]
#[command(name = "claude-agent-proxy")]
#[command(about = "Anthropic Messages API in front of a local Claude Code agent")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "CLAUDE_PROXY_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "CLAUDE_PROXY_PORT")]
    port: Option<u16>,

    /// Verbose logging (engine stderr, raw events)
    #[arg(short, long)]
    debug: bool,
}

fn cors_layer(mode: &CorsMode) -> CorsLayer {
    let cors_origins = mode.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin_str) = origin.to_str() else {
                return false;
            };

            match &cors_origins {
                CorsMode::AllowAll => true,
                CorsMode::LocalhostOnly => {
                    let Ok(url) = url::Url::parse(origin_str) else {
                        return false;
                    };
                    matches!(
                        url.host_str(),
                        Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
                    )
                }
                CorsMode::AllowList(allowed) => allowed.iter().any(|a| a == origin_str),
            }
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-api-key"),
            header::HeaderName::from_static("anthropic-version"),
            header::HeaderName::from_static(SESSION_HEADER),
        ])
        .expose_headers([header::HeaderName::from_static(SESSION_HEADER)])
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logging comes up before the rest of the config so its warnings are visible
    let debug = args.debug
        || std::env::var("CLAUDE_PROXY_DEBUG").is_ok_and(|v| config::parse_flag(&v));
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();
    config.debug = debug;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let engine: Arc<dyn QueryEngine> = Arc::new(ClaudeCli::new(config.claude_bin.clone()));

    match &config.cors_mode {
        CorsMode::AllowAll => info!("CORS: Allowing all origins"),
        CorsMode::LocalhostOnly => info!("CORS: Localhost only"),
        CorsMode::AllowList(list) => info!("CORS: Allowing origins: {:?}", list),
    }
    info!(
        permission_mode = %config.permission_mode,
        cwd = ?config.cwd,
        total_timeout = ?config.timeouts.total,
        inactivity_timeout = ?config.timeouts.inactivity,
        debug = config.debug,
        "Engine: {}",
        config.claude_bin.display()
    );
    if config.permission_mode == config::PermissionMode::BypassPermissions {
        warn!("Claude Code will run with bypassPermissions: tool calls are not confirmed");
    }

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid address {}:{}: {e}", config.host, config.port);
            return;
        }
    };

    let cors = cors_layer(&config.cors_mode);
    let state = Arc::new(AppState {
        config: Arc::new(config),
        engine,
    });

    let app = NormalizePath::trim_trailing_slash(routes::router(state).layer(cors));

    info!(
        "Starting {} v{}-{} (built {})",
        SERVICE_NAME, VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Listening on http://{}", addr);
    info!("Messages endpoint: http://{}/v1/messages", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            return;
        }
    };

    if let Err(e) = axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .await
    {
        error!("Server error: {e}");
    }
}

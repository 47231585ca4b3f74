use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use th_domain::config::{Config, CorsConfig, SERVER_PORT_ENV};
use th_gateway::api;
use th_gateway::bootstrap::{self, InstanceArgs};
use th_gateway::cli::call::CallArgs;
use th_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None => {
            let (config, _) = th_gateway::cli::load_config()?;
            init_tracing();
            run_server(Arc::new(config), InstanceArgs::default(), None).await
        }
        Some(Command::Serve { instance, host, upstream }) => {
            let (config, _) = th_gateway::cli::load_config()?;
            init_tracing();
            run_server(Arc::new(config), instance.into_args(upstream), host).await
        }
        Some(Command::Stdio { instance }) => {
            init_cli_tracing("info");
            let (config, _) = th_gateway::cli::load_config()?;
            let state = bootstrap::build_app_state(Arc::new(config), &instance.into_args(None)).await?;
            th_gateway::stdio::run(state).await
        }
        Some(Command::Call { tool, arguments, server, instance, timeout_ms }) => {
            init_cli_tracing("warn");
            let (config, _) = th_gateway::cli::load_config()?;
            let args = CallArgs { tool, arguments, server, instance, timeout_ms };
            th_gateway::cli::call::call(Arc::new(config), args).await
        }
        Some(Command::Tools { server, role, json }) => {
            init_cli_tracing("warn");
            let (config, _) = th_gateway::cli::load_config()?;
            th_gateway::cli::call::tools(Arc::new(config), server, role, json).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = th_gateway::cli::load_config()?;
            let valid = th_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = th_gateway::cli::load_config()?;
            th_gateway::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("toolhost {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,th_gateway=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .init();
}

/// Initialize compact stderr-only tracing for `stdio` and one-shot commands.
///
/// stdout stays reserved for protocol traffic and command output.
fn init_cli_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Start the HTTP gateway with the given configuration.
async fn run_server(
    config: Arc<Config>,
    args: InstanceArgs,
    host: Option<String>,
) -> anyhow::Result<()> {
    tracing::info!("toolhost starting");

    // ── Build shared state ───────────────────────────────────────────
    let state = bootstrap::build_app_state(config.clone(), &args).await?;

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = config.server.max_concurrent_requests.max(1);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let env_port = std::env::var(SERVER_PORT_ENV).ok();
    let port = bootstrap::resolve_port(args.port, env_port.as_deref(), &config);
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, instance = %state.instance_label(), "toolhost listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    // ── Post-shutdown cleanup ───────────────────────────────────────
    tracing::info!("server stopped");
    state.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then return to trigger graceful shutdown
/// of the Axum server.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins were checked by `Config::validate`; matching (including the
/// `:*` port wildcard) lives in [`CorsConfig::allows`].
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    let cors = cors.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin.to_str().is_ok_and(|origin| cors.allows(origin))
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

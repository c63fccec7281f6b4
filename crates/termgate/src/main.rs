//! # termgate
//!
//! Standalone server binary exposing a restricted command-line interface
//! over remote terminal sessions.
//!
//! The embedding seam is [`build_registry`]: a host application registers
//! its own commands there. This binary ships a small operational set
//! (`sessions`, `broadcast`, `shutdown`, plus demo arithmetic) so the
//! server is usable out of the box.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use termgate_command::{Command, CommandRegistry, Param, ParamType, Reply, Value};
use termgate_core::{CredentialStore, ServerConfig};
use termgate_server::Server;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Register the operational command set. The registry's case folding must
/// match the dispatch settings or built-ins and registered commands would
/// disagree. The server handle is filled in after construction;
/// introspection commands report accordingly until then.
fn build_registry(
    server_slot: Arc<OnceLock<Arc<Server>>>,
    case_insensitive: bool,
) -> anyhow::Result<CommandRegistry> {
    let mut registry = CommandRegistry::with_case_folding(case_insensitive);

    let slot = Arc::clone(&server_slot);
    registry.register(
        Command::new("sessions", "list live sessions").handler(move |_inv| {
            let slot = Arc::clone(&slot);
            async move {
                let Some(server) = slot.get() else {
                    return Ok(Reply::text("server is still starting"));
                };
                let mut lines = Vec::new();
                for info in server.sessions() {
                    let principal = info
                        .principal
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    lines.push(format!("{}  {}  {:?}", info.id, principal, info.state));
                }
                lines.sort();
                Ok(Reply::text(lines.join("\n")))
            }
        }),
    )?;

    let slot = Arc::clone(&server_slot);
    registry.register(
        Command::new("broadcast", "send a message to every session")
            .param(Param::required("message", ParamType::Str))
            .handler(move |inv| {
                let slot = Arc::clone(&slot);
                async move {
                    if let Some(server) = slot.get() {
                        server.broadcast(inv.args.str("message"));
                    }
                    Ok(Reply::empty())
                }
            }),
    )?;

    registry.register(
        Command::new("shutdown", "stop the server")
            .long_help("Stop accepting connections and close every session.")
            .handler(|_inv| async { Ok(Reply::shutdown("Shutting down server.")) }),
    )?;

    registry.register(
        Command::new("whoami", "show the authenticated principal")
            .handler(|inv| async move { Ok(Reply::text(inv.context.principal.to_string())) }),
    )?;

    registry.register(
        Command::new("add", "add two integers")
            .param(Param::required("x", ParamType::Int))
            .param(Param::required("y", ParamType::Int))
            .param(Param::optional("verbose", ParamType::Bool).help("show the full equation"))
            .handler(|inv| async move {
                let x = inv.args.int("x");
                let y = inv.args.int("y");
                Ok(Reply::text(if inv.args.flag("verbose") {
                    format!("{x} + {y} = {}", x + y)
                } else {
                    format!("{}", x + y)
                }))
            }),
    )?;

    registry.register(
        Command::new("echo", "print the given words")
            .param(Param::required("words", ParamType::List(Box::new(ParamType::Str))))
            .handler(|inv| async move {
                let words: Vec<&str> = inv
                    .args
                    .list("words")
                    .iter()
                    .filter_map(Value::as_str)
                    .collect();
                Ok(Reply::text(words.join(" ")))
            }),
    )?;

    Ok(registry)
}

fn load_config() -> anyhow::Result<ServerConfig> {
    match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}")),
        None => Ok(ServerConfig::default()),
    }
}

fn load_credentials(config: &ServerConfig) -> anyhow::Result<CredentialStore> {
    match &config.auth.password_file {
        Some(path) => CredentialStore::load(path)
            .with_context(|| format!("loading credentials from {}", path.display())),
        None => {
            if !config.auth.allow_anonymous {
                warn!("no password file configured and anonymous access disabled");
            }
            Ok(CredentialStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let credentials = load_credentials(&config)?;

    let server_slot: Arc<OnceLock<Arc<Server>>> = Arc::new(OnceLock::new());
    let registry = build_registry(Arc::clone(&server_slot), config.dispatch.case_insensitive)?;

    let server = Arc::new(Server::new(config, registry, credentials));
    let _ = server_slot.set(Arc::clone(&server));

    let addr = server.listen().await?;
    info!(%addr, "termgate ready");

    tokio::select! {
        () = server.shutdown_requested() => info!("shutdown requested by command"),
        res = tokio::signal::ctrl_c() => {
            res.context("listening for ctrl-c")?;
            info!("interrupt received");
        }
    }

    server.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

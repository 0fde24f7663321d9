//! # Switchboard Main Entry Point
//!
//! Thin CLI over the library: wires config, logging, and components. All
//! behavior lives in the library crate.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;
use zeroize::Zeroizing;

use switchboard::config::{AppConfig, ConfigLoader};
use switchboard::flow::{OAuthFlowController, ResumeOutcome};
use switchboard::health::HealthMonitor;
use switchboard::notify::{LogDesktopNotifier, NotificationDispatcher};
use switchboard::prefs::PreferenceStore;
use switchboard::realtime::{RealtimeBackend, SseRealtimeBackend, SyncedCache, Synchronizer};
use switchboard::repository::{ConnectOutcome, ConnectionRepository};
use switchboard::rpc::{HttpRpcClient, LifecycleRpc};
use switchboard::transaction::TransactionStore;

#[derive(Parser)]
#[command(name = "switchboard", about = "Connector lifecycle daemon and CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the realtime synchronizer and health monitor until interrupted
    Run,
    /// Connect a connector; OAuth flows prompt for the callback URL
    Connect {
        slug: String,
        /// API key for api_key connectors
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Force or request a token refresh for a connection
    Refresh {
        connection_id: Uuid,
        #[arg(long)]
        force: bool,
    },
    /// Revoke a connection
    Disconnect { connection_id: Uuid },
    /// One-shot connection and health overview
    Status,
    /// Enable or disable desktop health notifications
    DesktopAlerts {
        #[arg(value_parser = ["on", "off"])]
        switch: String,
    },
}

struct App {
    config: AppConfig,
    rpc: Arc<dyn LifecycleRpc>,
    backend: Arc<dyn RealtimeBackend>,
    cache: SyncedCache,
    flow: Arc<OAuthFlowController>,
    repository: ConnectionRepository,
    dispatcher: Arc<NotificationDispatcher>,
}

impl App {
    fn build(config: AppConfig) -> anyhow::Result<Self> {
        let user_id = config
            .user_id
            .context("SWITCHBOARD_USER_ID must be set")?;

        let rpc: Arc<dyn LifecycleRpc> = Arc::new(HttpRpcClient::new(&config, user_id)?);
        let backend: Arc<dyn RealtimeBackend> =
            Arc::new(SseRealtimeBackend::new(&config, user_id)?);
        let cache = SyncedCache::new(&config.realtime);
        let store = Arc::new(TransactionStore::new());
        let flow = Arc::new(OAuthFlowController::new(
            Arc::clone(&rpc),
            store,
            config.redirect_uri.clone(),
        ));
        let repository =
            ConnectionRepository::new(Arc::clone(&flow), Arc::clone(&rpc), cache.clone());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&rpc),
            PreferenceStore::new(&config.notifications),
            Box::new(LogDesktopNotifier),
            config.notifications.recipient_email.clone(),
        ));

        Ok(Self {
            config,
            rpc,
            backend,
            cache,
            flow,
            repository,
            dispatcher,
        })
    }

    /// Load one snapshot so catalog lookups work outside the daemon.
    async fn prime_cache(&self) -> anyhow::Result<()> {
        let snapshot = self.backend.snapshot().await?;
        self.cache.load_snapshot(snapshot).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load()?;
    switchboard::logging::init_subscriber(&config);

    tracing::info!(profile = %config.profile, "loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "effective configuration");
    }

    let app = App::build(config)?;

    match cli.command {
        Command::Run => run_daemon(&app).await,
        Command::Connect { slug, api_key } => connect(&app, &slug, api_key).await,
        Command::Refresh {
            connection_id,
            force,
        } => {
            app.repository.refresh(connection_id, force).await?;
            println!("refresh requested for {connection_id}");
            Ok(())
        }
        Command::Disconnect { connection_id } => {
            app.prime_cache().await?;
            app.repository.disconnect(connection_id).await?;
            println!("connection {connection_id} revoked");
            Ok(())
        }
        Command::Status => status(&app).await,
        Command::DesktopAlerts { switch } => {
            let effective = app.dispatcher.set_desktop_opt_in(switch == "on")?;
            println!(
                "desktop health alerts {}",
                if effective { "enabled" } else { "disabled" }
            );
            Ok(())
        }
    }
}

async fn run_daemon(app: &App) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let synchronizer = Synchronizer::spawn(
        Arc::clone(&app.backend),
        app.cache.clone(),
        app.config.realtime.clone(),
    );
    let monitor = HealthMonitor::new(
        Arc::clone(&app.rpc),
        Arc::clone(&app.dispatcher),
        &app.config.health,
    );

    let monitor_shutdown = shutdown.clone();
    let monitor_task = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    shutdown.cancel();
    let _ = monitor_task.await;
    synchronizer.close().await;
    Ok(())
}

async fn connect(app: &App, slug: &str, api_key: Option<String>) -> anyhow::Result<()> {
    app.prime_cache().await?;
    let outcome = app
        .repository
        .connect(slug, api_key.map(Zeroizing::new))
        .await?;

    match outcome {
        ConnectOutcome::Linked(connection) => {
            println!("connected: {} ({:?})", connection.id, connection.status);
            Ok(())
        }
        ConnectOutcome::Redirect(started) => {
            println!("open this URL in your browser:\n\n  {}\n", started.authorize_url);
            println!("then paste the full callback URL here:");
            resume_from_stdin(&app.flow).await
        }
    }
}

/// Read the callback URL from stdin and drive the flow to completion. The
/// pre- and post-redirect halves share nothing but the transaction store.
async fn resume_from_stdin(flow: &OAuthFlowController) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines
        .next_line()
        .await?
        .context("no callback URL provided")?;
    let callback = Url::parse(line.trim()).context("callback is not a valid URL")?;

    match flow.resume(&callback).await {
        ResumeOutcome::Connected {
            connector_name,
            scopes,
            ..
        } => {
            println!("connected to {connector_name} (scopes: {})", scopes.join(", "));
            Ok(())
        }
        ResumeOutcome::Failed { failure, .. } => anyhow::bail!("{failure}"),
        ResumeOutcome::Ignored { .. } => {
            // Deliberately indistinguishable from no callback at all.
            anyhow::bail!("authorization could not be completed")
        }
        ResumeOutcome::NotACallback => anyhow::bail!("that URL is not an authorization callback"),
    }
}

async fn status(app: &App) -> anyhow::Result<()> {
    app.prime_cache().await?;
    let connections = app.repository.list_for_user().await;
    println!("{} connection(s)", connections.len());
    for connection in &connections {
        println!(
            "  {}  connector={}  status={:?}",
            connection.id, connection.connector_id, connection.status
        );
    }

    let report = app.rpc.probe_health().await?;
    println!(
        "health: {} total, {} healthy, {} degraded, {} unhealthy",
        report.summary.total,
        report.summary.healthy,
        report.summary.degraded,
        report.summary.unhealthy
    );
    for result in &report.results {
        println!(
            "  {}  {:?}  latency={}ms",
            result.connector_slug,
            result.status,
            result.latency_ms.unwrap_or_default()
        );
    }
    Ok(())
}

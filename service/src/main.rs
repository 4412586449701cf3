mod cli;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use image_updater::config::{load_rules, UpdaterSettings};
use image_updater::credentials::{
    AppKey, CredentialProvider, InstallationTokenProvider, StaticTokenProvider,
};
use image_updater::secrets::SecretSource;
use image_updater::transport::{http, ConsumerSettings, QueueConsumer, SpoolQueue};
use image_updater::Updater;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level, cli.log_format)?;

    let rules = load_rules(&cli.config)
        .with_context(|| format!("loading rules from {}", cli.config.display()))?
        .into_shared();
    if rules.is_empty() {
        warn!("No registry rules configured");
    }

    let credentials = build_credentials(&cli)?;
    let updater = Arc::new(Updater::new(build_settings(&cli), credentials));

    match cli.command {
        Command::Serve { listen } => {
            let listener = TcpListener::bind(listen)
                .await
                .with_context(|| format!("binding {}", listen))?;
            http::serve(listener, http::router(updater, rules), shutdown_signal())
                .await
                .context("HTTP server failed")?;
            info!("HTTP server stopped");
        }
        Command::Consume {
            spool_dir,
            interval_secs,
            max_concurrent_updates,
            max_receive_count,
            release_backoff_secs,
        } => {
            let queue = SpoolQueue::open(&spool_dir)
                .await
                .with_context(|| format!("opening spool {}", spool_dir.display()))?
                .with_release_backoff(Duration::from_secs(release_backoff_secs));
            info!("Consuming events from {}", spool_dir.display());

            let consumer = QueueConsumer::new(
                Arc::new(queue),
                updater,
                rules,
                ConsumerSettings {
                    poll_interval: Duration::from_secs(interval_secs.max(1)),
                    max_concurrent_updates,
                    max_receive_count,
                },
            );

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(());
            });
            consumer.run(shutdown_rx).await;
        }
    }

    Ok(())
}

fn build_settings(cli: &Cli) -> UpdaterSettings {
    let defaults = UpdaterSettings::default();
    UpdaterSettings {
        github_base_url: cli.github_base_url.clone(),
        registry_host_template: cli.registry_host_template.clone(),
        author_name: cli.git_author_name.clone(),
        author_email: cli.git_author_email.clone(),
        scratch_root: cli.scratch_dir.clone().unwrap_or(defaults.scratch_root),
        git_timeout: Duration::from_secs(cli.git_timeout_secs),
    }
}

fn build_credentials(cli: &Cli) -> anyhow::Result<Arc<dyn CredentialProvider>> {
    if let (Some(app_id), Some(installation_id), Some(key_file)) = (
        cli.github_app_id,
        cli.github_app_installation_id,
        cli.github_app_key_file.as_ref(),
    ) {
        info!(
            "Using GitHub App {} installation {} for git credentials",
            app_id, installation_id
        );
        let provider = InstallationTokenProvider::new(
            cli.github_api_url.clone(),
            installation_id,
            AppKey::new(app_id, SecretSource::from_file(key_file)),
        )?;
        return Ok(Arc::new(provider));
    }

    let source = SecretSource {
        value: cli.github_token.clone(),
        file: cli.github_token_file.clone(),
        env_var: None,
    };
    if !source.is_configured() {
        bail!("no git credentials configured: set GITHUB_TOKEN, GITHUB_TOKEN_FILE, or GITHUB_APPLICATION_ID with GITHUB_INSTALLATION_ID and GITHUB_CRT_PATH");
    }
    Ok(Arc::new(StaticTokenProvider::new(cli.github_username.clone(), source)))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                warn!("Failed to register signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
}

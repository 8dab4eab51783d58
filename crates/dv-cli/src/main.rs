use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::{bail, WrapErr};
use tokio::sync::broadcast;

use dv_cli::args::{self, Cli, Command, PublishArgs, USAGE};
use dv_cli::render::{self, Progress};
use dv_core::models::{
    BuildStatus, DeploymentState, Model, OrchestratorConfig, PublishConfiguration, Status,
    VirtualDatabase,
};
use dv_core::services::config_loader;
use dv_core::services::oc::OcGateway;
use dv_core::services::registrar::HttpRegistrar;
use dv_core::services::sources::{ConfigSourceCatalog, TemplateInputGenerator};
use dv_core::{Orchestrator, StatusUpdate};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let cli = args::parse(&raw)?;

    // Held until exit so buffered lines reach the file.
    let _guard = setup_logging(cli.debug);

    if cli.command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }
    run(cli).await
}

/// `--debug` sends everything to `.dv-orchestrator-debug.log` in CWD;
/// otherwise warnings and errors go to stderr.
fn setup_logging(debug: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if debug {
        let file_appender = tracing_appender::rolling::never(".", ".dv-orchestrator-debug.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .init();
        None
    }
}

fn load_config(cli: &Cli) -> color_eyre::Result<OrchestratorConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => config_loader::find(&std::env::current_dir()?),
    };
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            Ok(config_loader::load(&path)?)
        }
        None => Ok(OrchestratorConfig::default()),
    }
}

async fn run(cli: Cli) -> color_eyre::Result<()> {
    let config = load_config(&cli)?;
    let gateway = Arc::new(OcGateway::new(
        config.oc_binary.clone(),
        config.work_directory.clone(),
    ));
    let registrar = Arc::new(HttpRegistrar::new(config.registry_url.clone()));
    let sources = Arc::new(ConfigSourceCatalog::new(config.sources.clone()));
    let orchestrator = Orchestrator::new(
        config,
        gateway,
        registrar,
        sources,
        Arc::new(TemplateInputGenerator),
    );

    match cli.command {
        Command::Publish(publish) => {
            let request = publish_configuration(&publish)?;
            let updates = orchestrator.subscribe();
            let queued = orchestrator.publish(request).await?;
            if queued.status != Status::Submitted {
                println!("{}", render::status_line(&queued));
                bail!("a previous request for '{}' is still in progress", publish.name);
            }
            let last = follow(updates, queued).await?;
            let status = orchestrator.get_status(&publish.name).await;
            println!("{}", render::summary(&status, chrono::Utc::now()));
            check_outcome(&last)
        }
        Command::Status { name, json } => {
            let status = orchestrator.get_status(&name).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", render::summary(&status, chrono::Utc::now()));
            }
            Ok(())
        }
        Command::Log { name } => {
            print!("{}", orchestrator.get_log(&name).await);
            Ok(())
        }
        Command::Delete { name } => {
            let updates = orchestrator.subscribe();
            let queued = orchestrator.delete(&name).await?;
            if queued.status != Status::DeleteSubmitted {
                println!("{}", render::status_line(&queued));
                return Ok(());
            }
            let last = follow(updates, queued).await?;
            check_outcome(&last)
        }
        Command::Help => Ok(()),
    }
}

fn publish_configuration(publish: &PublishArgs) -> color_eyre::Result<PublishConfiguration> {
    let descriptor = read_descriptor(&publish.descriptor)?;
    let vdb = VirtualDatabase {
        name: publish.name.clone(),
        models: vec![Model {
            name: publish.model.clone(),
            source_names: publish.sources.clone(),
        }],
        descriptor,
    };
    let mut config = PublishConfiguration::new(publish.name.clone(), publish.revision, vdb);
    config.enable_odata = publish.enable_odata;
    config.user_environment_variables = publish.env.clone();
    if let Some(ref stream) = publish.image_stream {
        config.build_image_stream = stream.clone();
    }
    Ok(config)
}

fn read_descriptor(path: &Path) -> color_eyre::Result<Vec<u8>> {
    std::fs::read(path).wrap_err_with(|| format!("reading descriptor {}", path.display()))
}

/// Print each change to the record until it leaves the queue or the user
/// interrupts. Interrupting stops watching; the process exit ends the work.
async fn follow(
    mut updates: broadcast::Receiver<StatusUpdate>,
    first: BuildStatus,
) -> color_eyre::Result<BuildStatus> {
    let id = first.service_id().to_string();
    let mut progress = Progress::default();
    if let Some(line) = progress.observe(&first) {
        println!("{line}");
    }

    let mut last = first;
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) if update.status.service_id() == id => {
                    if let Some(line) = progress.observe(&update.status) {
                        println!("{line}");
                    }
                    let settled = update.settled;
                    last = update.status;
                    if settled {
                        return Ok(last);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed status updates");
                }
                Err(broadcast::error::RecvError::Closed) => bail!("work queue stopped"),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted while {}", last.status);
                return Ok(last);
            }
        }
    }
}

fn check_outcome(last: &BuildStatus) -> color_eyre::Result<()> {
    match last.status {
        Status::Failed | Status::Cancelled => bail!("{}: {}", last.status, last.status_message),
        _ if last.deployment_status.status == DeploymentState::Failed => bail!(
            "deployment failed: {}",
            last.deployment_status.status_message
        ),
        _ => Ok(()),
    }
}

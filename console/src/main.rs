mod config;
mod output;

use clap::{Parser, Subcommand};
use collection_sync::{
    Folder, GuardianScreen, NewNotification, NotificationScreen, Notice, SyncError, ViewFilter,
};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use gateway::{Gateway, GatewayError, HttpGateway, RequestContext};
use metrics_exporter_statsd::StatsdBuilder;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "rosterctl", about = "Manage guardians and notifications from the terminal")]
struct Cli {
    /// YAML config file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Bearer token, overrides `session.token` from the config file.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(subcommand)]
    Guardians(GuardianCommand),
    #[command(subcommand)]
    Children(ChildrenCommand),
    #[command(subcommand)]
    Notifications(NotificationCommand),
}

#[derive(Subcommand)]
enum GuardianCommand {
    List {
        #[arg(long)]
        search: Option<String>,
    },
    /// Replace a guardian's children.
    Assign {
        guardian: String,
        #[arg(required = true)]
        children: Vec<String>,
    },
    /// Move one child to a guardian, keeping that guardian's other children.
    Reassign { child: String, guardian: String },
    RemoveChild { guardian: String, child: String },
    Delete { id: String },
    ResetCredentials { id: String },
}

#[derive(Subcommand)]
enum ChildrenCommand {
    List,
}

#[derive(Subcommand)]
enum NotificationCommand {
    List {
        #[arg(long, default_value = "received")]
        folder: String,
        #[arg(long)]
        search: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
    },
    /// Mark notifications as read.
    Read {
        #[arg(long, default_value = "received")]
        folder: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Delete {
        #[arg(long, default_value = "received")]
        folder: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Send {
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long = "type", default_value = "info")]
        kind: String,
        #[arg(long, default_value = "all")]
        recipients: String,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("could not initialize logging: {0}")]
    Logging(String),
    #[error("could not initialize metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Sentry has to be initialized before the runtime starts
    let _sentry = init_logging(config.common.logging.as_ref())?;
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    let token = cli.token.or_else(|| config.session.token.clone());
    let context = token
        .map(RequestContext::with_bearer)
        .unwrap_or_else(RequestContext::anonymous);
    let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(&config.gateway, context)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli.command, gateway))
}

fn init_logging(
    config: Option<&LoggingConfig>,
) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => config.map_or_else(|| "info".to_string(), |c| c.filter.clone()),
    };
    let env_filter = EnvFilter::try_new(filter).map_err(|e| CliError::Logging(e.to_string()))?;

    let guard = config.and_then(|c| c.sentry_dsn.as_deref()).map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_layer)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))?;

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(config.prefix.as_str()))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(collection_sync::metrics_defs::ALL_METRICS);
    tracing::debug!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Metrics exporter installed"
    );
    Ok(())
}

async fn dispatch(command: Command, gateway: Arc<dyn Gateway>) -> Result<(), CliError> {
    match command {
        Command::Guardians(command) => guardians(command, GuardianScreen::new(gateway)).await,
        Command::Children(ChildrenCommand::List) => children(GuardianScreen::new(gateway)).await,
        Command::Notifications(command) => {
            notifications(command, NotificationScreen::new(gateway)).await
        }
    }
}

async fn guardians(command: GuardianCommand, screen: GuardianScreen) -> Result<(), CliError> {
    let filter = match &command {
        GuardianCommand::List {
            search: Some(search),
        } => ViewFilter::default().with_search(search.as_str()),
        _ => ViewFilter::default(),
    };
    let loaded = screen.load(filter).await;
    print_notices(screen.take_notices());
    loaded?;

    match command {
        GuardianCommand::List { .. } => {}
        GuardianCommand::Assign { guardian, children } => {
            // Unknown ids are looked up in the directory
            screen.load_child_directory().await.ok();
            screen.assign_children(&guardian, children).await?;
        }
        GuardianCommand::Reassign { child, guardian } => {
            screen.load_child_directory().await.ok();
            screen.reassign_child(&child, &guardian).await?;
        }
        GuardianCommand::RemoveChild { guardian, child } => {
            screen.remove_child(&guardian, &child).await?;
        }
        GuardianCommand::Delete { id } => {
            screen.delete_guardian(&id).await?;
        }
        GuardianCommand::ResetCredentials { id } => {
            screen.reset_credentials(&id).await?;
        }
    }

    let view = screen.view();
    for guardian in &view.entities {
        println!("{}", output::guardian_line(guardian, &view));
    }
    print_notices(screen.take_notices());
    screen.close();
    Ok(())
}

async fn children(screen: GuardianScreen) -> Result<(), CliError> {
    let (loaded, directory) = tokio::join!(
        screen.load(ViewFilter::default()),
        screen.load_child_directory()
    );
    print_notices(screen.take_notices());
    loaded?;
    let directory = directory?;

    let view = screen.view();
    for child in &directory {
        let holder = view.entities.iter().find(|g| g.has_child(&child.id));
        println!("{}", output::child_line(child, holder));
    }
    screen.close();
    Ok(())
}

async fn notifications(
    command: NotificationCommand,
    screen: NotificationScreen,
) -> Result<(), CliError> {
    let filter = match &command {
        NotificationCommand::List {
            folder,
            search,
            kind,
        } => {
            let mut filter = folder.parse::<Folder>()?.filter();
            filter.search = search.clone();
            filter.kind = kind.clone();
            filter
        }
        NotificationCommand::Read { folder, .. } | NotificationCommand::Delete { folder, .. } => {
            folder.parse::<Folder>()?.filter()
        }
        NotificationCommand::Send { .. } => Folder::Sent.filter(),
    };
    let loaded = screen.load(filter).await;
    print_notices(screen.take_notices());
    loaded?;

    match command {
        NotificationCommand::List { .. } => {}
        NotificationCommand::Read { ids, .. } => {
            if let [id] = ids.as_slice() {
                screen.mark_as_read(id).await?;
            } else {
                select(&screen, &ids)?;
                screen.bulk_mark_as_read().await?;
            }
        }
        NotificationCommand::Delete { ids, .. } => {
            if let [id] = ids.as_slice() {
                screen.delete(id).await?;
            } else {
                select(&screen, &ids)?;
                screen.bulk_delete().await?;
            }
        }
        NotificationCommand::Send {
            message,
            title,
            kind,
            recipients,
        } => {
            let sent = screen
                .send(NewNotification {
                    title,
                    message,
                    kind,
                    recipients,
                })
                .await;
            if sent.is_err() {
                print_notices(screen.take_notices());
            }
            sent?;
        }
    }

    let view = screen.view();
    for notification in &view.entities {
        println!("{}", output::notification_line(notification, &view));
    }
    println!("{} unread in {}", screen.unread_count(), screen.folder());
    print_notices(screen.take_notices());
    screen.close();
    Ok(())
}

fn select(screen: &NotificationScreen, ids: &[String]) -> Result<(), SyncError> {
    screen.cache().clear_selection();
    let ids: BTreeSet<&String> = ids.iter().collect();
    for id in ids {
        if !screen.cache().toggle(id) {
            return Err(SyncError::NotFound(id.clone()));
        }
    }
    Ok(())
}

fn print_notices(notices: Vec<Notice>) {
    for notice in &notices {
        eprintln!("{}", output::notice_line(notice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from([
            "rosterctl",
            "--token",
            "t",
            "guardians",
            "assign",
            "g1",
            "c1",
            "c2",
        ])
        .unwrap();
        assert_eq!(cli.token.as_deref(), Some("t"));
        assert!(matches!(
            cli.command,
            Command::Guardians(GuardianCommand::Assign { ref children, .. }) if children.len() == 2
        ));

        let cli = Cli::try_parse_from([
            "rosterctl",
            "notifications",
            "list",
            "--folder",
            "sent",
            "--type",
            "alert",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Notifications(NotificationCommand::List { ref folder, ref kind, .. })
                if folder == "sent" && kind.as_deref() == Some("alert")
        ));

        assert!(Cli::try_parse_from(["rosterctl", "notifications", "delete"]).is_err());
        assert!(Cli::try_parse_from(["rosterctl", "guardians", "remove-child", "g1"]).is_err());
    }
}

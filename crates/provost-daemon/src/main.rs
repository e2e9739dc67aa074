//! provostd - identity provisioning daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use provost_core::config::Config;
use provost_core::directory::person_entry;
use provost_core::Ledger;

use provost_daemon::observer::{
    MailJobBuilder, Observer, UidJobBuilder, UserHandleJobBuilder,
};
use provost_daemon::proxy::directory::discover_uid_numbers;
use provost_daemon::proxy::{DirectoryProxy, Emailer, LdifProducer, LogMailTransport};
use provost_daemon::queue::{self, Dispatch};

/// Handle the daemon registers its own ledger events under.
const CONTROLLER_HANDLE: &str = "identity.controller";

#[derive(Debug, Parser)]
#[command(name = "provostd", version, about = "Identity provisioning daemon")]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "provost.toml")]
    config: PathBuf,

    /// Override the ledger database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the scan interval in seconds.
    #[arg(long)]
    interval: Option<u64>,

    /// Print the initial directory entry for NAME and exit.
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = if args.config.exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "no config file, using defaults");
        Config::default()
    };
    if let Some(db) = args.db {
        config.daemon.db_path = db;
    }
    if let Some(secs) = args.interval {
        config.daemon.interval_secs = secs;
    }

    if let Some(name) = args.name {
        let record = person_entry(
            &config.ldap.search.query,
            &name,
            provost_daemon::observer::ENTRY_DESCRIPTION,
        );
        println!("{record}");
        return Ok(());
    }

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let ledger = Ledger::open(&config.daemon.db_path)
        .with_context(|| format!("opening ledger at {}", config.daemon.db_path.display()))?;
    let controller = ledger.register_component(CONTROLLER_HANDLE)?;
    info!(db = %config.daemon.db_path.display(), actor = %controller.uuid, "ledger open");

    let directory = LdifProducer;
    let reserved = match discover_uid_numbers(
        &directory,
        &config.ldap.search.query,
        &config.ldap.search.filter,
    )
    .await
    {
        Ok(taken) => taken,
        Err(err) => {
            warn!(%err, "uid discovery failed; allocating without reservations");
            Default::default()
        }
    };

    let (mail_tx, mail_rx) = queue::channel();
    let (dir_tx, dir_rx) = queue::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = Duration::from_secs(config.daemon.interval_secs);
    let base_dn = config.ldap.search.query.clone();

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        Observer::new(
            ledger.clone(),
            MailJobBuilder {
                portal_url: config.daemon.portal_url.clone(),
            },
            mail_tx.clone(),
            controller.uuid.clone(),
        )
        .run(interval, shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        Observer::new(
            ledger.clone(),
            UserHandleJobBuilder {
                base_dn: base_dn.clone(),
            },
            dir_tx.clone(),
            controller.uuid.clone(),
        )
        .run(interval, shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        Observer::new(
            ledger.clone(),
            UidJobBuilder {
                base_dn: base_dn.clone(),
                pool: config.uid_pool(),
                reserved,
            },
            dir_tx.clone(),
            controller.uuid.clone(),
        )
        .run(interval, shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        Emailer::new(
            ledger.clone(),
            controller.uuid.clone(),
            LogMailTransport,
            config.smtp.src.from.clone(),
            config.smtp.src.subject.clone(),
        )
        .run(mail_rx),
    ));
    tasks.push(tokio::spawn(
        DirectoryProxy::new(ledger, controller.uuid, directory, base_dn).run(dir_rx),
    ));

    wait_for_signal().await?;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = mail_tx.send(Dispatch::Shutdown);
    let _ = dir_tx.send(Dispatch::Shutdown);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = term.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

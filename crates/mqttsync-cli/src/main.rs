//! Command-line entry point for the MQTT instance-sync bridge.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use mqttsync_core::session::session_stamp;
use mqttsync_core::shadow::MemoryShadowStore;
use mqttsync_core::{
    mailbox, spawn_heartbeat, BrokerConfig, HttpRequester, LinkId, MasterSession, MqttLink, Role,
    SessionParams, SlaveSession, SyncConfig, SyncEvent, HEARTBEAT_PERIOD,
};

/// mqttsync - mirror devices between two home-automation instances.
#[derive(Parser, Debug)]
#[command(name = "mqttsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Role this process plays.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    /// Authoritative instance: propagates device state outward.
    Master,
    /// Mirroring instance: provisions shadow devices locally.
    Slave,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Master => Role::Master,
            RoleArg::Slave => Role::Slave,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge until interrupted.
    Run {
        /// Role to assume.
        #[arg(short, long, value_enum)]
        role: RoleArg,
        /// Path to the JSON configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Hardware identifier for this host, part of the client id.
        #[arg(long, default_value = "1")]
        hardware_id: String,
        /// Version of the local instance backend.
        #[arg(long, default_value = "2024.1")]
        backend_version: String,
    },
    /// Validate a configuration file and exit.
    CheckConfig {
        /// Path to the JSON configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Validate for one role only; default checks both.
        #[arg(short, long, value_enum)]
        role: Option<RoleArg>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directives = if args.verbose {
        "mqttsync=debug"
    } else {
        "mqttsync=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        Command::Run {
            role,
            config,
            hardware_id,
            backend_version,
        } => run(role.into(), &config, hardware_id, backend_version).await,
        Command::CheckConfig { config, role } => check_config(&config, role.map(Into::into)),
    }
}

fn load_config(path: &PathBuf) -> Result<SyncConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = SyncConfig::from_json(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

fn check_config(path: &PathBuf, role: Option<Role>) -> Result<()> {
    let config = load_config(path)?;
    let roles: &[Role] = match role {
        Some(Role::Master) => &[Role::Master],
        Some(Role::Slave) => &[Role::Slave],
        None => &[Role::Master, Role::Slave],
    };
    for role in roles {
        config.validate(*role)?;
        config.instance_endpoint(*role)?;
    }
    println!(
        "{}: ok ({} mapping entries, bridge {}2{})",
        path.display(),
        config.mapping.len(),
        config.settings.master_name,
        config.settings.slave_name
    );
    Ok(())
}

async fn run(
    role: Role,
    path: &PathBuf,
    hardware_id: String,
    backend_version: String,
) -> Result<()> {
    let config = load_config(path)?;
    config.validate(role)?;
    info!(
        ?role,
        bridge = format!(
            "{}2{}",
            config.settings.master_name, config.settings.slave_name
        ),
        "starting sync bridge"
    );

    let params = SessionParams {
        hardware_id,
        backend_version,
        sequence: session_stamp(),
    };

    let (tx, rx) = mailbox();
    let heartbeat = spawn_heartbeat(tx.clone(), HEARTBEAT_PERIOD);

    // Translate Ctrl-C into an orderly shutdown of the dispatch loop.
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(SyncEvent::Shutdown).await;
        }
    });

    let slave_broker = BrokerConfig::new(
        config.settings.slave_mqtt_host.clone(),
        config.settings.slave_mqtt_port,
    )
    .with_auth(
        config.settings.slave_mqtt_user.clone(),
        config.settings.slave_mqtt_password.clone(),
    );

    match role {
        Role::Master => {
            let master_broker = BrokerConfig::new(
                config.settings.master_mqtt_host.clone(),
                config.settings.master_mqtt_port,
            )
            .with_auth(
                config.settings.master_mqtt_user.clone(),
                config.settings.master_mqtt_password.clone(),
            );
            let master_link = MqttLink::new(LinkId::MasterFeed, master_broker, tx.clone());
            let slave_link = MqttLink::new(LinkId::SlaveBridge, slave_broker, tx.clone());
            let http = HttpRequester::new(config.instance_endpoint(role)?, tx.clone())?;
            let mut session = MasterSession::new(
                config,
                params,
                Box::new(master_link),
                Box::new(slave_link),
                Box::new(http),
            )?;
            session.start().await?;
            session.run(rx).await;
        }
        Role::Slave => {
            let slave_link = MqttLink::new(LinkId::SlaveBridge, slave_broker, tx.clone());
            let store = MemoryShadowStore::new();
            let mut session =
                SlaveSession::new(config, params, Box::new(slave_link), Box::new(store))?;
            session.start().await?;
            session.run(rx).await;
        }
    }

    heartbeat.abort();
    Ok(())
}

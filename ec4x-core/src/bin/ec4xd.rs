use anyhow::Result;
use clap::Parser;
use ec4x_core::cli_args::{Cli, Commands};
use ec4x_core::configuration::DaemonConfig;
use ec4x_core::daemon::{resolve, Daemon, DaemonModel};
use ec4x_core::identity;
use ec4x_core::relay::RelayClient;
use ec4x_domain::config::load_game_config;
use std::sync::Arc;
use tracing::{event, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    match args.command {
        Commands::Start {
            data_dir,
            poll_interval,
            config,
        } => {
            let mut daemon_config = DaemonConfig::load(config.as_deref())?;
            if let Some(data_dir) = data_dir {
                daemon_config.data_dir = data_dir;
            }
            if let Some(poll_interval) = poll_interval {
                daemon_config.poll_interval_secs = poll_interval;
            }

            let game_config = Arc::new(load_game_config(daemon_config.game_config_path.as_deref())?);
            let daemon_identity = identity::load_or_create(&daemon_config.data_dir)?;

            event!(
                Level::INFO,
                data_dir = %daemon_config.data_dir.display(),
                relays = daemon_config.relay_urls.len(),
                pubkey = %daemon_identity.public_hex(),
                "starting ec4x daemon"
            );

            let (relay, inbound) = RelayClient::spawn(daemon_config.relay_urls.clone());
            let model = DaemonModel::new(daemon_config, game_config, daemon_identity, relay.clone(), Some(relay));
            Daemon::new(model).run(inbound).await
        }
        Commands::Resolve {
            game_id,
            data_dir,
            game_config,
        } => {
            let game_config = load_game_config(game_config.as_deref())?;
            let next_turn = resolve::resolve_once(&data_dir, &game_id, &game_config).await?;
            println!("game {game_id} advanced to turn {next_turn}");
            Ok(())
        }
        Commands::Status { data_dir } => {
            let games_dir = data_dir.join("games");
            if !games_dir.is_dir() {
                println!("no games under {}", games_dir.display());
                return Ok(());
            }
            let mut dirs: Vec<_> = std::fs::read_dir(&games_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| ec4x_store::is_game_dir(path))
                .collect();
            dirs.sort();
            for dir in dirs {
                let db = ec4x_store::GameDb::open(&dir).await?;
                if let Some(meta) = ec4x_store::GameBmc::load_meta(&db).await? {
                    println!("{}  turn {}  phase {}  ({})", meta.id, meta.turn, meta.phase, meta.name);
                }
            }
            Ok(())
        }
        Commands::Version => {
            println!("ec4xd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

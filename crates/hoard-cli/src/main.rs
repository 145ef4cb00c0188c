//! hoard - EntityStore を手元で触るための CLI
//!
//! プレイヤーデータ（uuid, name, coins, first_join）を設定ファイルのバックエンドに保存・参照する。
//!
//! ```text
//! hoard --config hoard.toml get 069a79f4-44e9-4726-a5be-fca90e38aaf5
//! hoard rename 069a79f4-... Notch
//! hoard coins 069a79f4-... -- -5
//! hoard list
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hoard_core::{AnyBackend, Entity, EntityStore, HoardConfig};

#[derive(Debug, Parser)]
#[command(name = "hoard", version, about = "Inspect and edit player data in a hoard store")]
struct Cli {
    /// Config file; built-in defaults (hoard.sqlite in the working directory) when absent.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a player's data, creating it unless --no-create is given.
    Get {
        uuid: String,
        #[arg(long)]
        no_create: bool,
    },
    /// Set a player's display name.
    Rename { uuid: String, name: String },
    /// Add (or subtract) coins.
    Coins {
        uuid: String,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },
    /// Print every stored player, ordered by uuid.
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerData {
    uuid: String,
    name: String,
    coins: i64,
    first_join: DateTime<Utc>,
}

impl PlayerData {
    fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: String::new(),
            coins: 0,
            first_join: Utc::now(),
        }
    }
}

impl Entity for PlayerData {
    const NAME: &'static str = "player_data";

    fn id(&self) -> &str {
        &self.uuid
    }
}

type Store = EntityStore<PlayerData, AnyBackend>;

fn init_tracing() {
    // stdout は JSON 出力用なのでログは stderr へ
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_store(config: Option<&PathBuf>) -> Result<Store> {
    let config = match config {
        Some(path) => HoardConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HoardConfig::default(),
    };
    debug!(?config, "config loaded");

    let backend = AnyBackend::from_config(&config.backend)?;
    let store = EntityStore::builder(backend)
        .settings(&config.store)
        .default_entity(PlayerData::new)
        .build()?;

    if !store.initialize() {
        bail!(
            "could not initialize store at {} (see log output)",
            store.connection_params()
        );
    }
    info!(table = ?store.table(), "store ready");
    Ok(store)
}

async fn run(store: &Store, command: Command) -> Result<()> {
    match command {
        Command::Get { uuid, no_create } => {
            match store.load_with(uuid.as_str(), !no_create)?.await? {
                Some(player) => print_json(&player)?,
                None => bail!("no player data for {uuid}"),
            }
        }
        Command::Rename { uuid, name } => {
            let mut player = store.load(uuid)?.await?;
            player.name = name;
            print_json(&store.save(player)?.await?)?;
        }
        Command::Coins { uuid, delta } => {
            let mut player = store.load(uuid)?.await?;
            player.coins = player
                .coins
                .checked_add(delta)
                .context("coin balance overflow")?;
            print_json(&store.save(player)?.await?)?;
        }
        Command::List => {
            for player in store.load_all()?.await? {
                print_json(&player)?;
            }
        }
    }
    Ok(())
}

fn print_json(player: &PlayerData) -> Result<()> {
    println!("{}", serde_json::to_string(player)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = Arc::new(open_store(cli.config.as_ref())?);
    let outcome = run(&store, cli.command).await;

    // close は drain と join を待つのでブロッキングスレッドで行う
    let closing = Arc::clone(&store);
    tokio::task::spawn_blocking(move || closing.close())
        .await
        .context("close task panicked")??;

    outcome
}

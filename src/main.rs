//! Survival service binary

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use survival::{
    api::ApiServer,
    config::{generate_sample_config, ConfigLoader, SurvivalConfig},
    content::ContentCatalog,
    events::EventBus,
    lobby::MAX_LOBBY_PARTICIPANTS,
    payout::validate_pool,
    settlement::{RetryPolicy, SettlementGateway},
    simulation::{MatchSetup, SimulationEngine},
    types::{ArenaKey, BonusRule, Participant, PoolSettings},
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "survival")]
#[command(about = "Survival elimination tournament service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket API
    Serve {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one offline match without a ledger and print the standings
    Simulate {
        #[arg(long, default_value = "8")]
        players: usize,

        /// Points added to the pool per participant
        #[arg(long, default_value = "50")]
        increment: u64,

        /// Players required for the bonus multiplier
        #[arg(long)]
        bonus_players: Option<usize>,

        #[arg(long, default_value = "1.0")]
        bonus_multiplier: f64,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// JSON content catalog
        #[arg(long)]
        content: Option<PathBuf>,
    },
    /// Write a configuration file with every default
    GenerateConfig { path: PathBuf },
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            let loader = match config {
                Some(path) => ConfigLoader::new().with_path(path),
                None => ConfigLoader::new(),
            };
            let config = loader.load()?;
            init_tracing(&config.logging.filter);

            ApiServer::from_config(config)?.run().await?;
        }
        Command::Simulate {
            players,
            increment,
            bonus_players,
            bonus_multiplier,
            seed,
            content,
        } => {
            init_tracing(&SurvivalConfig::default().logging.filter);
            if players == 0 || players > MAX_LOBBY_PARTICIPANTS {
                return Err(format!("--players must be between 1 and {}", MAX_LOBBY_PARTICIPANTS).into());
            }

            let catalog = match content {
                Some(path) => ContentCatalog::load(path)?,
                None => ContentCatalog::default(),
            };
            let events = Arc::new(EventBus::new());
            let gateway = Arc::new(SettlementGateway::new(None, RetryPolicy::default()));
            let engine = SimulationEngine::new(Arc::new(catalog), gateway, events).with_rng_seed(seed);

            let setup = MatchSetup {
                arena: ArenaKey::new("offline"),
                match_id: Uuid::new_v4(),
                participants: (1..=players)
                    .map(|i| Participant::new(format!("{}", i), format!("Player {}", i)))
                    .collect(),
                pool: PoolSettings {
                    increment,
                    bonus: bonus_players.map(|required_players| BonusRule {
                        required_players,
                        multiplier: bonus_multiplier,
                    }),
                },
                created_at: Utc::now(),
                joined_at: HashMap::new(),
            };
            validate_pool(&setup.pool)?;

            let report = engine.run(setup).await;

            println!("Match {} finished after {} rounds", report.match_id, report.rounds);
            println!(
                "Pool: {} (base {}, bonus {})",
                report.pool.final_pool,
                report.pool.base,
                if report.pool.bonus_triggered { "applied" } else { "not applied" }
            );
            for payout in &report.payouts {
                let name = report
                    .placements
                    .iter()
                    .find(|p| p.id == payout.participant)
                    .map(|p| p.display_name.as_str())
                    .unwrap_or("?");
                println!("  #{} {} -> {} points", payout.rank, name, payout.amount);
            }
        }
        Command::GenerateConfig { path } => {
            generate_sample_config(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

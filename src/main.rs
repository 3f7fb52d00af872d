//! duelpvp command line
//!
//! Batch simulation, crash round verification, the swarm feed and sample
//! configuration output.

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use duelpvp::config_loader::{generate_sample_config, ConfigLoader};
use duelpvp::games::fairness;
use duelpvp::logging::init_tracing;
use duelpvp::simulation::{Simulator, Strategy};
use duelpvp::swarm::SwarmSim;
use duelpvp::{DuelConfig, GameKind, Multiplier};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "duelpvp")]
#[command(about = "duelpvp wager engines", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a batch of rounds against the in-process backend
    Simulate {
        #[arg(long, value_enum, default_value = "mines")]
        game: GameArg,

        #[arg(long, default_value = "1000")]
        rounds: usize,

        #[arg(long, default_value = "100")]
        bet: u64,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Crash auto-cashout target, e.g. 2.0
        #[arg(long)]
        target: Option<f64>,

        #[arg(long)]
        mines: Option<u8>,

        /// Mines cells revealed before cashing out
        #[arg(long)]
        reveals: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a revealed crash seed against its commitment
    Verify {
        #[arg(long)]
        seed: String,

        #[arg(long)]
        commitment: String,
    },
    /// Print the swarm feed after simulated seconds
    Swarm {
        #[arg(long, default_value = "60")]
        seconds: u64,

        #[arg(long, default_value = "1")]
        seed: u64,
    },
    /// Write a sample configuration file
    Config {
        #[arg(long, default_value = "duelpvp.toml")]
        output: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GameArg {
    Crash,
    Mines,
    Blackjack,
}

impl From<GameArg> for GameKind {
    fn from(arg: GameArg) -> Self {
        match arg {
            GameArg::Crash => GameKind::Crash,
            GameArg::Mines => GameKind::Mines,
            GameArg::Blackjack => GameKind::Blackjack,
        }
    }
}

fn load_config(path: Option<&str>) -> Result<DuelConfig, Box<dyn std::error::Error>> {
    let loader = match path {
        Some(p) => ConfigLoader::new().with_path(p),
        None => ConfigLoader::new(),
    };
    Ok(loader.load()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Command::Config { output } = &args.command {
        generate_sample_config(output)?;
        println!("✅ Sample configuration written to {}", output);
        return Ok(());
    }

    let config = load_config(args.config.as_deref())?;
    init_tracing(&config.logging);

    match args.command {
        Command::Simulate {
            game,
            rounds,
            bet,
            seed,
            target,
            mines,
            reveals,
            json,
        } => {
            let kind = GameKind::from(game);
            let strategy = match (Strategy::default_for(kind), target, mines, reveals) {
                (Strategy::CrashAuto { target: default }, t, _, _) => Strategy::CrashAuto {
                    target: t.map(Multiplier::from_f64).unwrap_or(default),
                },
                (
                    Strategy::MinesReveal {
                        mine_count,
                        reveals: default_reveals,
                    },
                    _,
                    m,
                    r,
                ) => Strategy::MinesReveal {
                    mine_count: m.unwrap_or(mine_count),
                    reveals: r.unwrap_or(default_reveals),
                },
                (other, _, _, _) => other,
            };

            let mut simulator = Simulator::new(config, seed);
            let report = simulator.run(strategy, rounds, bet).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
        Command::Verify { seed, commitment } => {
            match fairness::verify(&seed, &commitment, config.crash.rtp_bps, config.crash.max_multiplier_bps) {
                Ok(point) => println!("✅ Commitment matches; crash point {}", point),
                Err(e) => {
                    println!("❌ Verification failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Swarm { seconds, seed } => {
            let mut sim = SwarmSim::new(config.swarm.clone(), Utc::now(), seed);
            sim.advance(Duration::from_secs(seconds));
            println!(
                "🤖 {} bots, generation {}, {} wallets [{}]",
                sim.bots().len(),
                sim.generation(),
                sim.wallets(),
                sim.status()
            );
            for entry in sim.feed() {
                println!("{}", entry);
            }
        }
        Command::Config { .. } => {}
    }

    Ok(())
}

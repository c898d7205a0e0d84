use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "loyalty")]
#[command(about = "Loyalty points ledger and rules engine")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.loyalty/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the ledger database (defaults to ~/.loyalty/ledger.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Enroll a user as a member
    Enroll {
        user_id: String,
        /// Referral code of the member who invited this user
        #[arg(long)]
        referral_code: Option<String>,
    },

    /// Award points for an external event
    Award {
        member_id: String,
        /// Points before the tier multiplier
        points: i64,
        /// Idempotency key, e.g. the order id
        #[arg(long)]
        dedup_key: String,
        #[arg(long, default_value = "purchase")]
        source: String,
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Redeem points for a reward
    Redeem {
        member_id: String,
        reward_id: String,
        #[arg(long)]
        dedup_key: Option<String>,
    },

    /// Show a member's balance and tier
    Balance { member_id: String },

    /// Print a member's transaction log as JSON
    History { member_id: String },

    /// Credit a referral pair
    Referral {
        referral_code: String,
        new_member_id: String,
    },

    /// Manually adjust a member's balance
    Adjust {
        member_id: String,
        #[arg(allow_hyphen_values = true)]
        points: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        dedup_key: String,
    },

    /// Set a member's status (active, inactive, suspended)
    Status { member_id: String, status: String },

    /// Challenge participation and leaderboards
    Challenge {
        #[command(subcommand)]
        command: ChallengeCommands,
    },

    /// Expire due points and reconcile running totals
    Sweep {
        /// Keep running on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum ChallengeCommands {
    /// Join a challenge
    Join {
        member_id: String,
        challenge_id: String,
    },
    /// Report progress toward a challenge
    Progress {
        member_id: String,
        challenge_id: String,
        delta: i64,
    },
    /// Show the leaderboard of a challenge
    Leaderboard { challenge_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let paths = cli::Paths::new(cli.config, cli.db);

    match cli.command {
        Commands::Init { force } => {
            cli::init::init_command(&paths, force)?;
        }
        Commands::CheckConfig => {
            cli::init::check_config_command(&paths)?;
        }
        Commands::Enroll {
            user_id,
            referral_code,
        } => {
            cli::member::enroll_command(&paths, &user_id, referral_code.as_deref())?;
        }
        Commands::Award {
            member_id,
            points,
            dedup_key,
            source,
            source_id,
        } => {
            cli::points::award_command(&paths, &member_id, points, &source, source_id, &dedup_key)?;
        }
        Commands::Redeem {
            member_id,
            reward_id,
            dedup_key,
        } => {
            cli::points::redeem_command(&paths, &member_id, &reward_id, dedup_key.as_deref())?;
        }
        Commands::Balance { member_id } => {
            cli::member::balance_command(&paths, &member_id)?;
        }
        Commands::History { member_id } => {
            cli::member::history_command(&paths, &member_id)?;
        }
        Commands::Referral {
            referral_code,
            new_member_id,
        } => {
            cli::member::referral_command(&paths, &referral_code, &new_member_id)?;
        }
        Commands::Adjust {
            member_id,
            points,
            reason,
            dedup_key,
        } => {
            cli::points::adjust_command(&paths, &member_id, points, &reason, &dedup_key)?;
        }
        Commands::Status { member_id, status } => {
            cli::member::status_command(&paths, &member_id, &status)?;
        }
        Commands::Challenge { command } => match command {
            ChallengeCommands::Join {
                member_id,
                challenge_id,
            } => {
                cli::challenge::join_command(&paths, &member_id, &challenge_id)?;
            }
            ChallengeCommands::Progress {
                member_id,
                challenge_id,
                delta,
            } => {
                cli::challenge::progress_command(&paths, &member_id, &challenge_id, delta)?;
            }
            ChallengeCommands::Leaderboard { challenge_id } => {
                cli::challenge::leaderboard_command(&paths, &challenge_id)?;
            }
        },
        Commands::Sweep { watch } => {
            cli::sweep::sweep_command(&paths, watch).await?;
        }
    }

    Ok(())
}

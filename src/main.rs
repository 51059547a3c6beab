use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use leadforge::api::{start_server, Env};
use leadforge::config::Config;
use leadforge::domain::PhaseConfig;

#[derive(Parser)]
#[command(name = "leadforge")]
#[command(version, about = "Campaign orchestrator for domain generation, DNS validation and keyword scoring")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server (campaign CRUD, score-breakdown, SSE).
    Serve,
    /// Manage campaigns from the command line.
    Campaign {
        #[command(subcommand)]
        command: CampaignCommands,
    },
}

#[derive(Subcommand)]
pub enum CampaignCommands {
    /// Create a new campaign in the `draft` state.
    Create {
        name: String,
        owner: String,
        #[arg(long, default_value = "lead_gen")]
        campaign_type: String,
    },
    /// Configure one phase from a JSON file (a `PhaseConfig` document).
    Configure {
        campaign_id: String,
        #[arg(long)]
        config_file: PathBuf,
    },
    /// Show a campaign's current state.
    Show { campaign_id: String },
    /// Transitions the campaign to `running`. Phase workers only execute
    /// inside a running `serve` process against the same database — this
    /// command does not itself run generation/DNS/HTTP.
    Start { campaign_id: String },
    Pause { campaign_id: String },
    Resume { campaign_id: String },
    Cancel { campaign_id: String },
    /// Return a `failed` campaign to `draft` so it can be reconfigured.
    Reset { campaign_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let config = Config::load(&project_dir, cli.verbose)?;
    let _log_guard = leadforge::logging::init(&config)?;

    let env = Arc::new(Env::new(config)?);

    match &cli.command {
        Commands::Serve => start_server(env).await?,
        Commands::Campaign { command } => run_campaign_command(&env, command)?,
    }

    Ok(())
}

fn run_campaign_command(env: &Env, command: &CampaignCommands) -> Result<()> {
    match command {
        CampaignCommands::Create {
            name,
            owner,
            campaign_type,
        } => {
            let campaign = env.orchestrator.create_campaign(name, owner, campaign_type)?;
            print_json(&campaign)
        }
        CampaignCommands::Configure { campaign_id, config_file } => {
            let raw = std::fs::read_to_string(config_file)
                .with_context(|| format!("failed to read {}", config_file.display()))?;
            let phase_config: PhaseConfig =
                serde_json::from_str(&raw).context("config file is not a valid phase config")?;
            env.orchestrator.configure_phase(campaign_id, phase_config)?;
            let campaign = env.orchestrator.get_campaign(campaign_id)?;
            print_json(&campaign)
        }
        CampaignCommands::Show { campaign_id } => print_json(&env.orchestrator.get_campaign(campaign_id)?),
        CampaignCommands::Start { campaign_id } => print_json(&env.orchestrator.start(campaign_id)?),
        CampaignCommands::Pause { campaign_id } => print_json(&env.orchestrator.pause(campaign_id)?),
        CampaignCommands::Resume { campaign_id } => print_json(&env.orchestrator.resume(campaign_id)?),
        CampaignCommands::Cancel { campaign_id } => print_json(&env.orchestrator.cancel(campaign_id)?),
        CampaignCommands::Reset { campaign_id } => print_json(&env.orchestrator.reset(campaign_id)?),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

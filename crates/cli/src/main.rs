//! EcoOptimizer CLI
//!
//! A command-line tool for inspecting the server catalog, allocating load,
//! and training and querying the load forecast model.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{cluster, forecast, model};

/// EcoOptimizer CLI
#[derive(Parser)]
#[command(name = "ecoopt")]
#[command(author, version, about = "CLI for the EcoOptimizer load allocation service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via ECOOPT_API_URL env var)
    #[arg(long, env = "ECOOPT_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the configured servers
    Servers,

    /// Sample current usage on every server
    Usage,

    /// Allocate the currently observed load across servers
    Optimize,

    /// Allocate an explicit total load across servers
    Allocate {
        /// Total load to allocate
        #[arg(allow_negative_numbers = true)]
        load: f64,
    },

    /// Predict load at a timestamp
    Predict {
        /// Timestamp to predict for, e.g. 2024-06-01T12:00:00 (defaults to one hour from now)
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },

    /// Show the hourly load forecast
    Forecast {
        /// Number of hours to forecast
        #[arg(long, default_value_t = 24)]
        hours: u32,

        /// Substitute a value for hours the model cannot predict
        #[arg(long)]
        fallback: Option<Fallback>,
    },

    /// Train the forecast model on collected usage history
    Train,

    /// Forecast model management
    #[command(subcommand)]
    Model(ModelCommands),
}

#[derive(Subcommand)]
pub enum ModelCommands {
    /// Show the served model and stored versions
    Show,

    /// Switch back to the previous model version
    Rollback,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Fallback {
    /// Report 0 for points that cannot be predicted
    Zero,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let api_url = config::Config::load()?.resolve_api_url(cli.api_url.as_deref());
    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Servers => cluster::show_servers(&client, cli.format).await?,
        Commands::Usage => cluster::show_usage(&client, cli.format).await?,
        Commands::Optimize => cluster::optimize(&client, cli.format).await?,
        Commands::Allocate { load } => cluster::allocate(&client, load, cli.format).await?,
        Commands::Predict { at } => forecast::predict(&client, at, cli.format).await?,
        Commands::Forecast { hours, fallback } => {
            let zero_fallback = matches!(fallback, Some(Fallback::Zero));
            forecast::forecast(&client, hours, zero_fallback, cli.format).await?;
        }
        Commands::Train => forecast::train(&client, cli.format).await?,
        Commands::Model(model_cmd) => match model_cmd {
            ModelCommands::Show => model::show(&client, cli.format).await?,
            ModelCommands::Rollback => model::rollback(&client, cli.format).await?,
        },
    }

    Ok(())
}

// Toolforge CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: The CLI hosts a built-in demo catalog; embedders register their own tools.

mod catalog;
mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use toolforge_runtime::{init_telemetry, TelemetryConfig, ToolforgeConfig};

#[derive(Parser)]
#[command(name = "toolforge")]
#[command(about = "Toolforge CLI - List, call and host tools")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to .toolforge.yaml or toolforge.yaml in the current directory)
    #[arg(long, short, env = "TOOLFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered tools
    Tools {
        /// Only list tools tagged with this profile
        #[arg(long, short)]
        profile: Option<String>,
    },

    /// Call a tool and print its result
    Call {
        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(long, short, default_value = "{}")]
        args: String,

        /// Injection context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Host the tools on a durable worker and serve JSON-line calls from stdin
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_telemetry(TelemetryConfig::from_env());

    let cli = Cli::parse();
    let output_format = output::OutputFormat::parse(&cli.output);

    let config = ToolforgeConfig::load(cli.config.as_deref())
        .and_then(ToolforgeConfig::merge_env)
        .context("failed to load configuration")?;
    let registry = catalog::demo_registry(&config.tools).context("failed to build tool catalog")?;

    match cli.command {
        Commands::Tools { profile } => {
            commands::tools::run(&config, registry, output_format, profile.as_deref()).await
        }
        Commands::Call {
            tool,
            args,
            context,
        } => {
            commands::call::run(
                &config,
                registry,
                output_format,
                &tool,
                &args,
                context.as_deref(),
            )
            .await
        }
        Commands::Worker => commands::worker::run(&config, registry).await,
    }
}

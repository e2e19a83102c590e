//! agentpack CLI library: argument parsing and command dispatch.

mod cli;
pub mod commands;

use agentpack_core::UiVariant;
use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::io::Read;

/// Parse args, dispatch, print the command's output to stdout.
pub fn run_cli() -> Result<()> {
    agentpack_core::observability::init_tracing();
    let cli = Cli::parse();

    let output = match cli.command {
        Commands::Create {
            manifest,
            code,
            memory,
            styles,
            ui,
            output,
        } => {
            let ui = ui.parse::<UiVariant>().map_err(anyhow::Error::msg)?;
            commands::create::create_package(
                &manifest,
                &code,
                memory.as_deref(),
                styles.as_deref(),
                ui,
                output.as_deref(),
            )?
        }
        Commands::Extract { artifact, out_dir } => {
            commands::extract::extract_package(&artifact, &out_dir)?
        }
        Commands::Verify { artifact, json } => commands::verify::verify_package(&artifact, json)?,
        Commands::Run {
            artifact,
            input_json,
            runtime,
            timeout,
        } => {
            let input_json = if input_json == "-" {
                let mut s = String::new();
                std::io::stdin().read_to_string(&mut s)?;
                s
            } else {
                input_json
            };
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(commands::run::run_package(
                &artifact,
                &input_json,
                runtime,
                timeout,
            ))?
        }
        Commands::Tools { artifact } => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(commands::tools::list_tools(&artifact))?
        }
        Commands::Publish { artifact, registry } => {
            commands::publish::publish_package(&artifact, registry.as_deref())?
        }
    };
    println!("{}", output);
    Ok(())
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentpack - package, verify and run self-contained agents
#[derive(Parser, Debug)]
#[command(name = "agentpack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an artifact from a manifest and agent code
    Create {
        /// Manifest JSON file
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,

        /// Agent source file
        #[arg(long, value_name = "FILE")]
        code: PathBuf,

        /// Initial memory (JSON file)
        #[arg(long, value_name = "FILE")]
        memory: Option<PathBuf>,

        /// Extra CSS appended to the scaffold styles
        #[arg(long, value_name = "FILE")]
        styles: Option<PathBuf>,

        /// UI scaffold: full, minimal or none
        #[arg(long, default_value = "full")]
        ui: String,

        /// Output path (default: <agent id>.html)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Unpack an artifact into manifest.json, agent.js and memory.json
    Extract {
        /// Artifact file
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        /// Destination directory
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        out_dir: PathBuf,
    },

    /// Check an artifact's integrity fingerprints
    Verify {
        /// Artifact file
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        /// Print a JSON report instead of failing on mismatch
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Run an artifact once in an isolated execution context
    Run {
        /// Artifact file
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        /// Input JSON. Use "-" to read from stdin
        #[arg(value_name = "INPUT_JSON", default_value = "null")]
        input_json: String,

        /// Runtime executable (default: from env or node)
        #[arg(long)]
        runtime: Option<String>,

        /// Run timeout in seconds (default: from env or 30)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List the MCP tools reachable from an artifact's declared servers
    Tools {
        /// Artifact file
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,
    },

    /// Publish an artifact to a registry (not implemented)
    Publish {
        /// Artifact file
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        /// Registry URL
        #[arg(long, env = "AGENTPACK_REGISTRY")]
        registry: Option<String>,
    },
}

//! One module per subcommand. Each returns the text printed to stdout.
//!
//!   create / extract / verify — package codec only, no runtime
//!   run                       — sandbox session over a child-process context
//!   tools                     — MCP discovery against the manifest's servers
//!   publish                   — stub

pub mod create;
pub mod extract;
pub mod publish;
pub mod run;
pub mod tools;
pub mod verify;

use anyhow::{Context, Result};
use std::path::Path;

pub(crate) fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

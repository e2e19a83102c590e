//! Runs packaged agents in an isolated execution context.
//!
//! [`SandboxSession`] verifies an artifact, launches a context through a
//! [`ContextLauncher`], and exchanges JSON messages with it. Capabilities the
//! agent may use (network via [`NetworkGateway`], storage, MCP tools) are
//! host-side services gated by the package's permission grant.

pub mod context;
mod error;
pub mod gateway;
mod session;

pub use context::{AgentEndpoint, ChannelLauncher, ContextLauncher, ExecutionContext, LaunchSpec, ProcessLauncher};
pub use error::SandboxError;
pub use gateway::{FetchRequest, FetchResponse, NetworkGateway};
pub use session::{McpState, SandboxSession, SessionOptions, SessionState};

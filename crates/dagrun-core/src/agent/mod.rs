//! Agent contract, invocation errors, and the versioned registry.

mod error;
mod registry;
mod types;

pub use error::{AgentError, RegistryError};
pub use registry::{versioned_id, Registry, DEFAULT_VERSION};
pub use types::{AgentHandler, AgentInput, AgentOutput};

pub(crate) use types::invoke_guarded;

pub mod command;
pub mod config;
pub mod error;
pub mod manifest;
pub mod parser;
pub mod server;
pub mod service;
pub mod store;
pub mod tls;

pub use command::{IpaTool, Redactor, ToolOutput};
pub use config::Config;
pub use error::{ApiError, IpatoolWebError, Result};
pub use parser::{parse_search_output, strip_ansi, ApplicationRecord};
pub use server::{redirect_router, router};
pub use service::{LoginOutcome, Orchestrator};
pub use store::{ArtifactStore, StagedArtifact};

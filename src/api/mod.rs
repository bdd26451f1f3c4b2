//! Runner server API: HTTP client, wire types and request helpers

pub mod client;
pub mod debounce;
pub mod dedupe;
pub mod types;

pub use client::RunnerClient;
pub use debounce::{Debouncer, FileTreeLoader, FileTreeUpdate};
pub use dedupe::InflightRequests;
pub use types::{ActionResponse, FileTree, ProjectMeta};

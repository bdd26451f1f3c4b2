//! Run history: persisted records, badges, the sidebar list and its poller

pub mod badge;
pub mod poller;
pub mod record;
pub mod sidebar;

pub use badge::{derive_badge, RunBadge};
pub use poller::{spawn_runs_poller, RunsPollerHandle, RunsPollerUpdate, RunsSource};
pub use record::{RunRecord, RunsQuery, RunsResponse};
pub use sidebar::{LoadRunsOptions, RunsSidebar};

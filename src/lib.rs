pub mod api;
pub mod config;
pub mod error;
pub mod git;
pub mod history;
pub mod output;
pub mod runner;
pub mod stream;
pub mod util;

pub use api::{ActionResponse, RunnerClient};
pub use config::Config;
pub use error::{ErrorKind, Result, RunnerError};
pub use git::{MergePhase, MergeStateMachine};
pub use history::{RunBadge, RunRecord, RunsSidebar};
pub use output::{OutputMultiplexer, OutputTab};
pub use runner::{LocationParams, RunContext, Runner, RunnerEffect, RunnerState};
pub use stream::{RunPhase, StreamEvent, StreamRequest};

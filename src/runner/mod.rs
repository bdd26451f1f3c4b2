//! Runner page state and its async driver

pub mod context;
pub mod driver;
pub mod effect;
pub mod followup;
pub mod state;

pub use context::{LocationParams, RunContext};
pub use driver::Runner;
pub use effect::RunnerEffect;
pub use followup::{FollowupSession, FollowupSessions};
pub use state::{RunSettings, RunnerState};

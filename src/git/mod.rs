//! Git signals and the merge/branch state machine

mod merge;
mod status;

pub use merge::{
    extract_diff_target, DiffRequest, DiffTarget, DiffViewLoader, MergePhase, MergeRequest,
    MergeStateMachine, UpdateBranchRequest,
};
pub use status::{detect_change_signal, parse_push_exit_code, ChangeSignal, GitDiffStats};

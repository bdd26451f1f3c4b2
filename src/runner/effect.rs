use crate::git::{DiffRequest, MergeRequest, UpdateBranchRequest};
use crate::history::LoadRunsOptions;
use crate::stream::StreamRequest;

/// Side effects that should be executed outside the state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEffect {
    /// Drop the transport of a superseded or cancelled stream
    CloseStream { generation: u64 },
    OpenStream {
        generation: u64,
        request: StreamRequest,
    },
    LoadRunsSidebar(LoadRunsOptions),
    /// Warm the diff, then expose its href on the merge state machine
    PrefetchDiff {
        run_id: Option<String>,
        request: DiffRequest,
    },
    Merge(MergeRequest),
    UpdateBranch(UpdateBranchRequest),
    LoadProjectMeta { project_dir: String },
    /// Pop the usage-limit notice with the server's text
    ShowUsageLimit(String),
}

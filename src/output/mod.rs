//! Output multiplexer: line classification, final-output extraction and tabs

pub mod classifier;
pub mod final_output;
pub mod multiplexer;
pub mod prompt_filter;
pub mod qwen;

pub use classifier::{
    default_classifiers, ChunkKind, GitPullNoise, LineAction, LineClassifier, LiteralNoise,
    TraceNoise, TreeDrawingNoise,
};
pub use final_output::{extract_final_output, FinalOutputTracker, FINAL_OUTPUT_SENTINEL};
pub use multiplexer::{OutputLine, OutputMultiplexer, OutputTab};
pub use prompt_filter::HiddenPromptFilter;
pub use qwen::QwenTranscript;

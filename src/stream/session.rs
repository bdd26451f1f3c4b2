//! Run session lifecycle
//!
//! Tracks the phase of the current agent invocation and which stream
//! generation is allowed to drive it. The transport lives in
//! [`crate::stream::pump`]; this type only decides state.

use crate::error::{Result, RunnerError};
use crate::stream::events::StreamEvent;
use crate::stream::request::StreamRequest;

/// Phase of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Complete | RunPhase::Error | RunPhase::Cancelled
        )
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, RunPhase::Starting | RunPhase::Running)
    }
}

/// Status line shown next to the form controls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub is_error: bool,
}

impl StatusLine {
    fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Outcome of feeding an event into the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Event belongs to a superseded stream and was dropped
    Stale,
    /// Event accepted; the run continues
    Continue,
    /// Event accepted and finished the run
    Finished(RunPhase),
}

/// Lifecycle controller for "the current agent invocation"
#[derive(Debug, Default)]
pub struct RunSessionController {
    phase: RunPhase,
    /// Incremented every time a stream is opened; events carry the generation
    /// they were read from so late events from a closed stream are dropped.
    generation: u64,
    /// Generation of the stream currently allowed to drive the phase
    live_generation: Option<u64>,
    controls_enabled: bool,
    status: StatusLine,
    request: Option<StreamRequest>,
}

impl RunSessionController {
    pub fn new() -> Self {
        Self {
            controls_enabled: true,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled
    }

    pub fn live_generation(&self) -> Option<u64> {
        self.live_generation
    }

    pub fn has_live_stream(&self) -> bool {
        self.live_generation.is_some()
    }

    pub fn request(&self) -> Option<&StreamRequest> {
        self.request.as_ref()
    }

    /// Validate `request` and claim a new stream generation.
    ///
    /// Any previous generation stops being live; the caller must close its
    /// transport before opening the new one.
    pub fn begin(&mut self, request: StreamRequest) -> Result<u64> {
        if let Err(err) = request.validate() {
            self.status = StatusLine::error(err.to_string());
            return Err(err);
        }

        self.generation += 1;
        self.live_generation = Some(self.generation);
        self.phase = RunPhase::Starting;
        self.controls_enabled = false;
        self.status = StatusLine::info("Starting run...");
        self.request = Some(request);

        tracing::debug!(generation = self.generation, "Run stream starting");
        Ok(self.generation)
    }

    /// Feed a stream event read from `generation`
    pub fn apply(&mut self, generation: u64, event: &StreamEvent) -> Applied {
        if self.live_generation != Some(generation) {
            tracing::trace!(
                generation,
                live = ?self.live_generation,
                event = event.event_name(),
                "Dropping event from superseded stream"
            );
            return Applied::Stale;
        }

        if self.phase == RunPhase::Starting {
            self.phase = RunPhase::Running;
        }

        match event {
            StreamEvent::Status(text) => {
                self.status = StatusLine::info(text.trim());
                Applied::Continue
            }
            StreamEvent::RunInfo(_) | StreamEvent::Output(_) | StreamEvent::Stderr(_) => {
                Applied::Continue
            }
            StreamEvent::End(text) => {
                let text = text.trim();
                let status = if text.is_empty() { "Run complete" } else { text };
                self.finish(RunPhase::Complete, StatusLine::info(status))
            }
            StreamEvent::StreamError(text) => {
                let text = text.trim();
                let status = if text.is_empty() { "Stream error" } else { text };
                self.finish(RunPhase::Error, StatusLine::error(status))
            }
        }
    }

    /// The transport failed before a terminal event arrived
    pub fn connection_lost(&mut self, generation: u64, usage_limit_reached: bool) -> Applied {
        if self.live_generation != Some(generation) {
            return Applied::Stale;
        }
        let status = if usage_limit_reached {
            "Usage limit reached"
        } else {
            "Connection interrupted"
        };
        self.finish(RunPhase::Error, StatusLine::error(status))
    }

    /// Client-side cancel. Fire-and-forget: the server is not consulted.
    ///
    /// Returns the generation that was live, so the caller can close it.
    pub fn cancel(&mut self) -> Option<u64> {
        let generation = self.live_generation?;
        self.finish(RunPhase::Cancelled, StatusLine::info("Run cancelled"));
        Some(generation)
    }

    /// Surface a validation or transport problem without touching the phase
    pub fn report_error(&mut self, err: &RunnerError) {
        self.status = StatusLine::error(err.to_string());
    }

    fn finish(&mut self, phase: RunPhase, status: StatusLine) -> Applied {
        tracing::debug!(?phase, status = %status.text, "Run finished");
        self.phase = phase;
        self.status = status;
        self.live_generation = None;
        self.controls_enabled = true;
        Applied::Finished(phase)
    }
}

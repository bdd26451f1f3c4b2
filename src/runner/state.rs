//! Client state for one runner page: the live run, its follow-ups, merge
//! tracking and the history sidebar.
//!
//! Every method here is synchronous and side-effect free apart from mutating
//! `self`; work that touches the network is returned as [`RunnerEffect`]s for
//! the driver to execute.

use std::time::Instant;

use uuid::Uuid;

use crate::api::{ActionResponse, ProjectMeta};
use crate::config::Config;
use crate::error::{is_usage_limit_text, Result, RunnerError};
use crate::git::MergeStateMachine;
use crate::history::record::normalize_dir;
use crate::history::{LoadRunsOptions, RunRecord, RunsQuery, RunsSidebar};
use crate::output::{ChunkKind, HiddenPromptFilter, OutputMultiplexer};
use crate::runner::context::{LocationParams, RunContext};
use crate::runner::effect::RunnerEffect;
use crate::runner::followup::FollowupSessions;
use crate::stream::{
    Applied, PumpMessage, RunInfo, RunPhase, RunSessionController, StatusLine, StreamEnvelope,
    StreamEvent, StreamRequest,
};

/// Per-run options copied into every stream request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSettings {
    pub model: Option<String>,
    pub engine: Option<String>,
    pub git_fpush: bool,
    pub agent_instructions: Option<String>,
    pub session_id: Option<String>,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.default_model.clone(),
            engine: config.engine.clone(),
            git_fpush: config.git_fpush,
            agent_instructions: None,
            session_id: None,
        }
    }

    fn is_qwen(&self) -> bool {
        self.engine
            .as_deref()
            .is_some_and(|engine| engine.eq_ignore_ascii_case("qwen"))
    }
}

#[derive(Debug)]
pub struct RunnerState {
    settings: RunSettings,
    controller: RunSessionController,
    output: OutputMultiplexer,
    context: RunContext,
    merge: MergeStateMachine,
    sidebar: RunsSidebar,
    followups: FollowupSessions,
    /// Follow-up bound to the live stream
    streaming_followup: Option<Uuid>,
    /// Unfiltered status, output, stderr and end text of the live stream
    signal_text: String,
    usage_limit_reached: bool,
    usage_limit_message: Option<String>,
    prompt_filter: Option<HiddenPromptFilter>,
}

impl RunnerState {
    pub fn new(config: &Config) -> Self {
        let prompt_filter = config
            .hide_injected_prompt
            .then(|| HiddenPromptFilter::new(&config.hidden_prompt_phrases))
            .filter(|filter| !filter.is_empty());

        let mut output = OutputMultiplexer::new();
        output.set_prompt_filter(prompt_filter.clone());

        Self {
            settings: RunSettings::from_config(config),
            controller: RunSessionController::new(),
            output,
            context: RunContext::default(),
            merge: MergeStateMachine::new(),
            sidebar: RunsSidebar::new(&config.sidebar),
            followups: FollowupSessions::new(),
            streaming_followup: None,
            signal_text: String::new(),
            usage_limit_reached: false,
            usage_limit_message: None,
            prompt_filter,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RunSettings {
        &mut self.settings
    }

    pub fn phase(&self) -> RunPhase {
        self.controller.phase()
    }

    pub fn status(&self) -> &StatusLine {
        self.controller.status()
    }

    pub fn controls_enabled(&self) -> bool {
        self.controller.controls_enabled()
    }

    pub fn has_live_stream(&self) -> bool {
        self.controller.has_live_stream()
    }

    pub fn output(&self) -> &OutputMultiplexer {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputMultiplexer {
        &mut self.output
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn merge(&self) -> &MergeStateMachine {
        &self.merge
    }

    pub fn sidebar(&self) -> &RunsSidebar {
        &self.sidebar
    }

    pub fn sidebar_mut(&mut self) -> &mut RunsSidebar {
        &mut self.sidebar
    }

    pub fn followups(&self) -> &FollowupSessions {
        &self.followups
    }

    pub fn streaming_followup(&self) -> Option<Uuid> {
        self.streaming_followup
    }

    pub fn usage_limit_reached(&self) -> bool {
        self.usage_limit_reached
    }

    pub fn usage_limit_message(&self) -> Option<&str> {
        self.usage_limit_message.as_deref()
    }

    pub fn dismiss_usage_limit(&mut self) {
        self.usage_limit_message = None;
    }

    /// Adopt repository, session and run from a page location
    pub fn apply_location(&mut self, params: &LocationParams) {
        self.context = RunContext::from_location(params);
        self.settings.session_id = params.session_id.clone();
        self.sidebar.set_show_archived(params.archived);
        self.sidebar.set_repo_dir(params.repo_directory.clone());
        if let Some(run_id) = &params.run_id {
            self.sidebar.select_run(run_id);
        }
    }

    fn build_request(&self, project_dir: &str, prompt: &str) -> StreamRequest {
        StreamRequest {
            project_dir: project_dir.trim().to_string(),
            prompt: prompt.to_string(),
            model: self.settings.model.clone(),
            git_fpush: self.settings.git_fpush,
            agent_instructions: self.settings.agent_instructions.clone(),
            engine: self.settings.engine.clone(),
            followup_parent_id: None,
            session_id: self.settings.session_id.clone(),
        }
    }

    /// Claim a new stream generation, closing whatever was live
    fn open_stream(&mut self, request: StreamRequest) -> Result<Vec<RunnerEffect>> {
        let previous = self.controller.live_generation();
        let generation = self.controller.begin(request.clone())?;

        let mut effects = Vec::new();
        if let Some(previous) = previous {
            tracing::debug!(previous, generation, "Superseding live stream");
            self.abandon_followup(RunPhase::Cancelled);
            effects.push(RunnerEffect::CloseStream {
                generation: previous,
            });
        }
        self.signal_text.clear();
        self.usage_limit_reached = false;
        effects.push(RunnerEffect::OpenStream {
            generation,
            request,
        });
        Ok(effects)
    }

    /// Start a brand-new task; discards follow-ups and the previous output
    pub fn start_run(&mut self, project_dir: &str, prompt: &str) -> Result<Vec<RunnerEffect>> {
        let request = self.build_request(project_dir, prompt);
        let project_dir = request.project_dir.clone();
        let mut effects = self.open_stream(request)?;

        self.followups.clear();
        self.output.reset();
        self.output.set_qwen_cli(self.settings.is_qwen());
        self.output.set_in_flight(true);
        self.context = RunContext::new(project_dir.clone());
        self.merge.reset_for_run(None, project_dir.clone());
        self.sidebar.clear_selection();

        tracing::debug!(project_dir = %project_dir, "Run started");
        effects.push(RunnerEffect::LoadProjectMeta { project_dir });
        Ok(effects)
    }

    /// Continue the visible run with another prompt
    pub fn start_followup(&mut self, prompt: &str) -> Result<Vec<RunnerEffect>> {
        let parent = self
            .context
            .run_id
            .clone()
            .ok_or_else(|| RunnerError::Validation("No run to follow up.".to_string()))?;
        let request = self
            .build_request(&self.context.project_dir, prompt)
            .with_followup_parent(parent.clone());
        let effects = self.open_stream(request)?;

        let id = self
            .followups
            .start(parent.clone(), prompt, self.prompt_filter.clone());
        if let Some(session) = self.followups.get_mut(id) {
            session
                .output
                .set_qwen_cli(self.output.is_qwen_cli() || self.settings.is_qwen());
        }
        self.streaming_followup = Some(id);
        self.sidebar.set_followup_running(&parent, true);

        let branch = self.merge.branch_name().map(str::to_string);
        self.merge
            .reset_for_run(Some(parent), self.context.project_dir.clone());
        self.merge.set_branch_name(branch);
        Ok(effects)
    }

    /// Whether a finished run's output is on screen
    pub fn output_visible(&self) -> bool {
        self.context.run_id.is_some()
            && !self.controller.phase().is_in_flight()
            && (!self.output.combined().is_empty() || !self.output.final_output().is_empty())
    }

    /// Prompt submission: a follow-up while a run for the same project is
    /// visible, otherwise a new task
    pub fn submit_prompt(&mut self, project_dir: &str, prompt: &str) -> Result<Vec<RunnerEffect>> {
        let same_project = normalize_dir(project_dir) == normalize_dir(&self.context.project_dir);
        if self.output_visible() && same_project {
            self.start_followup(prompt)
        } else {
            self.start_run(project_dir, prompt)
        }
    }

    /// Clear the page for a new task
    pub fn new_task(&mut self) -> Vec<RunnerEffect> {
        let effects = self.cancel();
        self.followups.clear();
        self.output.reset();
        let project_dir = self.context.project_dir.clone();
        self.context = RunContext::new(project_dir.clone());
        self.merge.reset_for_run(None, project_dir);
        self.sidebar.clear_selection();
        effects
    }

    fn live_output(&mut self) -> &mut OutputMultiplexer {
        match self
            .streaming_followup
            .and_then(|id| self.followups.get_mut(id))
        {
            Some(session) => &mut session.output,
            None => &mut self.output,
        }
    }

    fn append_signal(&mut self, text: &str, whole_line: bool) {
        if whole_line && !self.signal_text.is_empty() && !self.signal_text.ends_with('\n') {
            self.signal_text.push('\n');
        }
        self.signal_text.push_str(text);
        if whole_line {
            self.signal_text.push('\n');
        }
    }

    fn note_usage_limit(&mut self, text: &str) {
        if is_usage_limit_text(text) {
            tracing::warn!(text = %text.trim(), "Usage limit reported");
            self.usage_limit_reached = true;
            self.usage_limit_message = Some(text.trim().to_string());
        }
    }

    pub fn handle_envelope(&mut self, envelope: StreamEnvelope) -> Vec<RunnerEffect> {
        match envelope.message {
            PumpMessage::Event(event) => self.handle_event(envelope.generation, event),
            PumpMessage::Disconnected {
                detail,
                usage_limit,
            } => self.handle_disconnect(envelope.generation, &detail, usage_limit),
        }
    }

    pub fn handle_event(&mut self, generation: u64, event: StreamEvent) -> Vec<RunnerEffect> {
        let applied = self.controller.apply(generation, &event);
        if applied == Applied::Stale {
            return Vec::new();
        }

        let mut effects = Vec::new();
        match &event {
            StreamEvent::Status(text) => {
                self.append_signal(text, true);
                self.note_usage_limit(text);
                self.live_output().push(ChunkKind::Status, text);
            }
            StreamEvent::RunInfo(info) => effects.extend(self.apply_run_info(info)),
            StreamEvent::Output(text) => {
                self.append_signal(text, false);
                self.live_output().push(ChunkKind::Output, text);
            }
            StreamEvent::Stderr(text) => {
                self.append_signal(text, false);
                self.note_usage_limit(text);
                self.live_output().push(ChunkKind::Stderr, text);
            }
            StreamEvent::StreamError(text) => {
                self.append_signal(text, true);
                self.note_usage_limit(text);
                self.live_output().push(ChunkKind::Stderr, text);
            }
            StreamEvent::End(text) => {
                self.append_signal(text, true);
                if !text.trim().is_empty() {
                    self.live_output().push(ChunkKind::Meta, text);
                }
            }
        }

        if let Applied::Finished(phase) = applied {
            effects.extend(self.finish_stream(phase));
        }
        effects
    }

    fn apply_run_info(&mut self, info: &RunInfo) -> Vec<RunnerEffect> {
        if let Some(session) = self
            .streaming_followup
            .and_then(|id| self.followups.get_mut(id))
        {
            session.run_id = info.run_id.clone();
            session.phase = RunPhase::Running;
            if info.qwen_cli {
                session.output.set_qwen_cli(true);
            }
            return Vec::new();
        }

        self.context.apply_run_info(info);
        if let Some(run_id) = &self.context.run_id {
            tracing::debug!(run_id = %run_id, "Run identity received");
            self.merge.set_run_id(run_id.clone());
            self.sidebar.select_run(run_id);
        }
        if info.branch_name.is_some() {
            self.merge.set_branch_name(self.context.branch_name.clone());
        }
        if info.qwen_cli {
            self.output.set_qwen_cli(true);
        }
        vec![RunnerEffect::LoadRunsSidebar(
            LoadRunsOptions::new(self.context.project_dir.clone()).forced(),
        )]
    }

    fn abandon_followup(&mut self, phase: RunPhase) {
        let Some(id) = self.streaming_followup.take() else {
            return;
        };
        if let Some(session) = self.followups.get_mut(id) {
            session.output.finish();
            session.phase = phase;
            let parent = session.parent_run_id.clone();
            self.sidebar.set_followup_running(&parent, false);
        }
    }

    fn finish_stream(&mut self, phase: RunPhase) -> Vec<RunnerEffect> {
        if self.streaming_followup.is_some() {
            self.abandon_followup(phase);
        } else {
            self.output.finish();
        }

        let mut effects = Vec::new();
        if phase == RunPhase::Complete {
            if let Some(request) = self.merge.evaluate(&self.signal_text) {
                effects.push(RunnerEffect::PrefetchDiff {
                    run_id: self.merge.run_id().map(str::to_string),
                    request,
                });
            }
        }
        if phase == RunPhase::Error && self.usage_limit_reached {
            let message = self
                .usage_limit_message
                .clone()
                .unwrap_or_else(|| "Usage limit reached".to_string());
            effects.push(RunnerEffect::ShowUsageLimit(message));
        }
        effects.push(RunnerEffect::LoadRunsSidebar(
            LoadRunsOptions::new(self.context.project_dir.clone()).forced(),
        ));
        effects
    }

    pub fn handle_disconnect(
        &mut self,
        generation: u64,
        detail: &str,
        usage_limit: bool,
    ) -> Vec<RunnerEffect> {
        if self.controller.live_generation() != Some(generation) {
            return Vec::new();
        }
        if usage_limit {
            self.usage_limit_reached = true;
            self.usage_limit_message = Some(detail.trim().to_string());
        }
        self.controller
            .connection_lost(generation, self.usage_limit_reached);
        if !detail.trim().is_empty() {
            self.live_output().push(ChunkKind::Stderr, detail);
        }
        self.finish_stream(RunPhase::Error)
    }

    /// The stream could not be opened at all
    pub fn stream_failed(&mut self, generation: u64, err: &RunnerError) -> Vec<RunnerEffect> {
        tracing::error!(generation, error = %err, "Failed to open run stream");
        self.handle_disconnect(generation, &err.to_string(), err.is_usage_limit())
    }

    /// Client-side cancel; the server is not told
    pub fn cancel(&mut self) -> Vec<RunnerEffect> {
        let Some(generation) = self.controller.cancel() else {
            return Vec::new();
        };
        let mut effects = vec![RunnerEffect::CloseStream { generation }];
        effects.extend(self.finish_stream(RunPhase::Cancelled));
        effects
    }

    pub fn report_error(&mut self, err: &RunnerError) {
        self.controller.report_error(err);
    }

    pub fn request_merge(&mut self) -> Result<Vec<RunnerEffect>> {
        let request = self.merge.begin_merge()?;
        tracing::debug!(run_id = ?request.run_id, "Merge requested");
        Ok(vec![RunnerEffect::Merge(request)])
    }

    pub fn merge_finished(&mut self, result: Result<ActionResponse>) -> Vec<RunnerEffect> {
        match result {
            Ok(response) if !response.is_error() => self.merge.merge_succeeded(),
            Ok(response) => self.merge.merge_failed(response.summary()),
            Err(e) => self.merge.merge_failed(e.to_string()),
        }
        vec![RunnerEffect::LoadRunsSidebar(
            LoadRunsOptions::new(self.context.project_dir.clone()).forced(),
        )]
    }

    pub fn request_update_branch(&self) -> Result<Vec<RunnerEffect>> {
        let request = self.merge.update_branch_request()?;
        Ok(vec![RunnerEffect::UpdateBranch(request)])
    }

    /// Expose the diff link if it still belongs to the current run
    pub fn diff_prefetched(&mut self, run_id: Option<&str>, href: String) {
        if self.merge.run_id() == run_id {
            self.merge.expose_diff(href);
        } else {
            tracing::debug!(?run_id, "Dropping diff link for a run that is no longer shown");
        }
    }

    pub fn apply_project_meta(&mut self, project_dir: &str, meta: &ProjectMeta) {
        if normalize_dir(project_dir) == normalize_dir(&self.context.project_dir) {
            self.context.apply_project_meta(meta);
        }
    }

    pub fn runs_options(&self, force: bool, reset_page: bool) -> LoadRunsOptions {
        LoadRunsOptions {
            project_dir: self.context.project_dir.clone(),
            force,
            reset_page,
        }
    }

    pub fn runs_query(&self, options: &LoadRunsOptions) -> RunsQuery {
        RunsQuery {
            run_id: self.context.run_id.clone(),
            repo_directory: Some(options.project_dir.clone()).filter(|d| !d.is_empty()),
            session_id: self.settings.session_id.clone(),
        }
    }

    pub fn runs_loaded(&mut self, options: &LoadRunsOptions, runs: Vec<RunRecord>, now: Instant) {
        self.sidebar.replace(options, runs, now);
    }

    /// Show a persisted run in place of the live view
    pub fn load_run(&mut self, record: &RunRecord) -> Vec<RunnerEffect> {
        let mut effects = self.cancel();

        self.followups.clear();
        self.output.rehydrate(record);
        self.context = RunContext::from_record(record);
        self.signal_text.clear();
        self.sidebar.select_run(&record.id);

        let followups: Vec<RunRecord> = self.sidebar.followups_for(&record.id).to_vec();
        for followup in &followups {
            self.followups.restore(followup, self.prompt_filter.clone());
        }

        if let Some(request) = self.merge.evaluate_record(record) {
            effects.push(RunnerEffect::PrefetchDiff {
                run_id: Some(record.id.clone()),
                request,
            });
        }
        effects.push(RunnerEffect::LoadProjectMeta {
            project_dir: record.project_dir.clone(),
        });
        effects
    }
}

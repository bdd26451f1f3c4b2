//! Async driver: owns the HTTP client and the live stream, feeds stream
//! events into [`RunnerState`] and executes the effects it returns.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::api::{ActionResponse, InflightRequests, ProjectMeta, RunnerClient};
use crate::config::Config;
use crate::error::Result;
use crate::history::{
    spawn_runs_poller, LoadRunsOptions, RunRecord, RunsPollerHandle, RunsPollerUpdate,
};
use crate::runner::effect::RunnerEffect;
use crate::runner::state::RunnerState;
use crate::stream::{RunPhase, StreamEnvelope, StreamHandle};

pub struct Runner {
    config: Config,
    state: RunnerState,
    client: RunnerClient,
    stream: Option<StreamHandle>,
    events_tx: mpsc::UnboundedSender<StreamEnvelope>,
    events_rx: mpsc::UnboundedReceiver<StreamEnvelope>,
    project_meta: InflightRequests<String, ProjectMeta>,
}

impl Runner {
    pub fn new(config: Config) -> Result<Self> {
        let client = RunnerClient::new(config.server_url.clone())?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: Config, client: RunnerClient) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: RunnerState::new(&config),
            config,
            client,
            stream: None,
            events_tx,
            events_rx,
            project_meta: InflightRequests::new(),
        }
    }

    pub fn state(&self) -> &RunnerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunnerState {
        &mut self.state
    }

    pub fn client(&self) -> &RunnerClient {
        &self.client
    }

    /// Execute effects until none are left; follow-on effects run in order
    pub async fn execute(&mut self, effects: Vec<RunnerEffect>) {
        let mut queue: VecDeque<RunnerEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            queue.extend(self.execute_one(effect).await);
        }
    }

    async fn execute_one(&mut self, effect: RunnerEffect) -> Vec<RunnerEffect> {
        match effect {
            RunnerEffect::CloseStream { generation } => {
                if let Some(mut stream) = self.stream.take() {
                    if stream.generation() == generation {
                        stream.close();
                    } else {
                        self.stream = Some(stream);
                    }
                }
                Vec::new()
            }
            RunnerEffect::OpenStream {
                generation,
                request,
            } => match self.client.open_stream(&request) {
                Ok(source) => {
                    self.stream = Some(StreamHandle::spawn(
                        generation,
                        source,
                        self.events_tx.clone(),
                    ));
                    Vec::new()
                }
                Err(e) => self.state.stream_failed(generation, &e),
            },
            RunnerEffect::LoadRunsSidebar(options) => {
                if let Err(e) = self.load_runs_sidebar(options).await {
                    tracing::warn!(error = %e, "Failed to load run history");
                }
                Vec::new()
            }
            RunnerEffect::PrefetchDiff { run_id, request } => {
                if let Err(e) = self.client.prefetch_diff(&request).await {
                    tracing::warn!(error = %e, "Diff prefetch failed");
                }
                match request.href() {
                    Ok(href) => self.state.diff_prefetched(run_id.as_deref(), href),
                    Err(e) => tracing::warn!(error = %e, "Could not build diff link"),
                }
                Vec::new()
            }
            RunnerEffect::Merge(request) => {
                let result = self.client.merge(&request).await;
                self.state.merge_finished(result)
            }
            RunnerEffect::UpdateBranch(request) => {
                match self.client.update_branch(&request).await {
                    Ok(response) if response.is_error() => {
                        tracing::error!(
                            branch = %request.branch_name,
                            error = %response.summary(),
                            "Branch update failed"
                        );
                    }
                    Ok(_) => {
                        tracing::debug!(branch = %request.branch_name, "Branch updated");
                    }
                    Err(e) => {
                        tracing::error!(
                            branch = %request.branch_name,
                            error = %e,
                            "Branch update failed"
                        );
                        self.state.report_error(&e);
                    }
                }
                vec![RunnerEffect::LoadRunsSidebar(self.state.runs_options(true, false))]
            }
            RunnerEffect::LoadProjectMeta { project_dir } => {
                match self.project_meta(&project_dir).await {
                    Ok(meta) => self.state.apply_project_meta(&project_dir, &meta),
                    Err(e) => tracing::warn!(
                        project_dir = %project_dir,
                        error = %e,
                        "Failed to load project meta"
                    ),
                }
                Vec::new()
            }
            RunnerEffect::ShowUsageLimit(message) => {
                tracing::warn!(message = %message, "Usage limit reached");
                Vec::new()
            }
        }
    }

    /// Project metadata; concurrent callers for one directory share a request
    pub async fn project_meta(&self, project_dir: &str) -> Result<ProjectMeta> {
        let client = self.client.clone();
        let dir = project_dir.to_string();
        self.project_meta
            .get_or_fetch(project_dir.to_string(), move || async move {
                client.project_meta(&dir).await
            })
            .await
    }

    /// Refresh the sidebar unless a fresh enough list is cached
    pub async fn load_runs_sidebar(&mut self, options: LoadRunsOptions) -> Result<()> {
        if !self.state.sidebar().needs_fetch(&options, Instant::now()) {
            tracing::trace!(project_dir = %options.project_dir, "Run history served from cache");
            return Ok(());
        }
        let query = self.state.runs_query(&options);
        let runs = self.client.fetch_runs(&query).await?;
        self.state.runs_loaded(&options, runs, Instant::now());
        Ok(())
    }

    pub async fn submit_prompt(&mut self, project_dir: &str, prompt: &str) -> Result<()> {
        let effects = self.state.submit_prompt(project_dir, prompt)?;
        self.execute(effects).await;
        Ok(())
    }

    pub async fn start_run(&mut self, project_dir: &str, prompt: &str) -> Result<()> {
        let effects = self.state.start_run(project_dir, prompt)?;
        self.execute(effects).await;
        Ok(())
    }

    pub async fn start_followup(&mut self, prompt: &str) -> Result<()> {
        let effects = self.state.start_followup(prompt)?;
        self.execute(effects).await;
        Ok(())
    }

    pub async fn cancel(&mut self) {
        let effects = self.state.cancel();
        self.execute(effects).await;
    }

    pub async fn new_task(&mut self) {
        let effects = self.state.new_task();
        self.execute(effects).await;
    }

    pub async fn load_run(&mut self, record: &RunRecord) {
        let effects = self.state.load_run(record);
        self.execute(effects).await;
    }

    pub async fn merge(&mut self) -> Result<()> {
        let effects = self.state.request_merge()?;
        self.execute(effects).await;
        Ok(())
    }

    pub async fn update_branch(&mut self) -> Result<()> {
        let effects = self.state.request_update_branch()?;
        self.execute(effects).await;
        Ok(())
    }

    async fn after_sidebar_action(
        &mut self,
        what: &str,
        result: Result<ActionResponse>,
    ) -> Result<ActionResponse> {
        match &result {
            Ok(response) if response.is_error() => {
                tracing::error!(action = what, error = %response.summary(), "Run action failed")
            }
            Ok(_) => tracing::debug!(action = what, "Run action done"),
            Err(e) => tracing::error!(action = what, error = %e, "Run action failed"),
        }
        let options = self.state.runs_options(true, false);
        if let Err(e) = self.load_runs_sidebar(options).await {
            tracing::warn!(error = %e, "Failed to reload run history");
        }
        result
    }

    pub async fn archive_run(&mut self, run_id: &str) -> Result<ActionResponse> {
        let result = self.client.archive_run(run_id).await;
        self.after_sidebar_action("archive", result).await
    }

    pub async fn unarchive_run(&mut self, run_id: &str) -> Result<ActionResponse> {
        let result = self.client.unarchive_run(run_id).await;
        self.after_sidebar_action("unarchive", result).await
    }

    pub async fn archive_all(&mut self) -> Result<ActionResponse> {
        let project_dir = self.state.context().project_dir.clone();
        let result = self.client.archive_all(&project_dir).await;
        self.after_sidebar_action("archive-all", result).await
    }

    pub async fn delete_local(&mut self, run_id: &str) -> Result<ActionResponse> {
        let result = self.client.delete_local(run_id).await;
        self.after_sidebar_action("delete-local", result).await
    }

    /// Apply one envelope from the live stream.
    ///
    /// Returns false once no stream is live or the channel is gone.
    pub async fn step(&mut self) -> bool {
        if !self.state.has_live_stream() {
            return false;
        }
        let Some(envelope) = self.events_rx.recv().await else {
            return false;
        };
        let effects = self.state.handle_envelope(envelope);
        self.execute(effects).await;
        self.state.has_live_stream()
    }

    /// Drive the live stream until it reaches a terminal phase
    pub async fn run_to_completion(&mut self) -> RunPhase {
        while self.step().await {}
        self.state.phase()
    }

    /// Background sidebar refresh on the configured interval
    pub fn spawn_runs_poller(
        &self,
        update_tx: mpsc::UnboundedSender<RunsPollerUpdate>,
    ) -> RunsPollerHandle {
        let options = self.state.runs_options(true, false);
        spawn_runs_poller(
            Arc::new(self.client.clone()),
            self.config.sidebar.poll_interval,
            self.state.runs_query(&options),
            update_tx,
        )
    }

    pub fn apply_poller_update(&mut self, update: RunsPollerUpdate) {
        match update {
            RunsPollerUpdate::RunsLoaded { query, runs } => {
                let options = LoadRunsOptions::new(query.repo_directory.unwrap_or_default());
                self.state.runs_loaded(&options, runs, Instant::now());
            }
            RunsPollerUpdate::LoadFailed { error, .. } => {
                tracing::debug!(error = %error, "Poller refresh failed, keeping cached runs");
            }
        }
    }
}

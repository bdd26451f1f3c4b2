//! HTTP client for the runner server

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{EventSource, RequestBuilderExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::types::{
    parse_model_list, string_field, ActionResponse, AgentInstructionsBody, ArchiveAllBody,
    DefaultModelBody, FileTree, ModelsBody, ProjectMeta,
};
use crate::error::{Result, RunnerError};
use crate::git::{DiffRequest, MergeRequest, UpdateBranchRequest};
use crate::history::{RunRecord, RunsQuery, RunsResponse, RunsSource};
use crate::stream::StreamRequest;

#[derive(Debug, Clone)]
pub struct RunnerClient {
    base_url: String,
    client: Client,
}

impl RunnerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| RunnerError::Url(format!("{base_url}: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute form of a server-relative href
    pub fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            self.url(href)
        }
    }

    async fn send_text(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RunnerError::from_status(status.as_u16(), body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send_text(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_action<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ActionResponse> {
        tracing::debug!(path, "Posting action");
        self.send_json(self.client.post(self.url(path)).json(body))
            .await
    }

    /// Open the SSE stream for a run; reconnection is disabled
    pub fn open_stream(&self, request: &StreamRequest) -> Result<EventSource> {
        request.validate()?;
        let mut source = self
            .client
            .get(self.url("/agent/stream"))
            .query(&request.query_pairs())
            .eventsource()
            .map_err(|e| RunnerError::Stream(e.to_string()))?;
        source.set_retry_policy(Box::new(Never));
        Ok(source)
    }

    /// Fetch the run list; an unparseable body is logged and yields no runs
    pub async fn fetch_runs(&self, query: &RunsQuery) -> Result<Vec<RunRecord>> {
        let body = self
            .send_text(
                self.client
                    .get(self.url("/agent/runs/data"))
                    .query(&query.query_pairs()),
            )
            .await?;
        match serde_json::from_str::<RunsResponse>(&body) {
            Ok(response) => Ok(response.into_records()),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed run history response");
                Ok(Vec::new())
            }
        }
    }

    pub async fn merge(&self, request: &MergeRequest) -> Result<ActionResponse> {
        self.post_action("/agent/merge", request).await
    }

    pub async fn update_branch(&self, request: &UpdateBranchRequest) -> Result<ActionResponse> {
        self.post_action("/agent/update-branch", request).await
    }

    pub async fn delete_local(&self, run_id: &str) -> Result<ActionResponse> {
        self.post_action(&format!("/agent/run/{run_id}/delete-local"), &Value::Null)
            .await
    }

    pub async fn archive_run(&self, run_id: &str) -> Result<ActionResponse> {
        self.post_action(&format!("/agent/run/{run_id}/archive"), &Value::Null)
            .await
    }

    pub async fn unarchive_run(&self, run_id: &str) -> Result<ActionResponse> {
        self.post_action(&format!("/agent/run/{run_id}/unarchive"), &Value::Null)
            .await
    }

    pub async fn archive_all(&self, project_dir: &str) -> Result<ActionResponse> {
        self.post_action("/agent/runs/archive-all", &ArchiveAllBody { project_dir })
            .await
    }

    pub async fn file_tree(&self, project_dir: &str) -> Result<FileTree> {
        self.send_json(
            self.client
                .get(self.url("/agent/file-tree"))
                .query(&[("projectDir", project_dir)]),
        )
        .await
    }

    pub async fn project_meta(&self, project_dir: &str) -> Result<ProjectMeta> {
        self.send_json(
            self.client
                .get(self.url("/agent/project-meta"))
                .query(&[("projectDir", project_dir)]),
        )
        .await
    }

    /// Model names; a malformed body is logged and yields an empty list
    pub async fn models(&self) -> Result<Vec<String>> {
        let body = self
            .send_text(self.client.get(self.url("/agent/model-only/models")))
            .await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(parse_model_list(&value)),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed models response");
                Ok(Vec::new())
            }
        }
    }

    pub async fn save_models(&self, models: &[String]) -> Result<()> {
        self.send_text(
            self.client
                .post(self.url("/agent/model-only/models"))
                .json(&ModelsBody { models }),
        )
        .await
        .map(|_| ())
    }

    pub async fn default_model(&self) -> Result<Option<String>> {
        let value: Value = self
            .send_json(self.client.get(self.url("/agent/default-model")))
            .await
            .or_else(|e| match e {
                RunnerError::Parse(e) => {
                    tracing::warn!(error = %e, "Malformed default model response");
                    Ok(Value::Null)
                }
                other => Err(other),
            })?;
        Ok(string_field(&value, &["defaultModel", "model"]))
    }

    pub async fn set_default_model(&self, model: Option<&str>) -> Result<()> {
        self.send_text(
            self.client
                .post(self.url("/agent/default-model"))
                .json(&DefaultModelBody {
                    default_model: model,
                }),
        )
        .await
        .map(|_| ())
    }

    pub async fn agent_instructions(&self) -> Result<String> {
        let value: Value = self
            .send_json(self.client.get(self.url("/agent/agent-instructions")))
            .await?;
        Ok(string_field(&value, &["agentInstructions", "instructions"]).unwrap_or_default())
    }

    pub async fn set_agent_instructions(&self, instructions: &str) -> Result<()> {
        self.send_text(
            self.client
                .post(self.url("/agent/agent-instructions"))
                .json(&AgentInstructionsBody {
                    agent_instructions: instructions,
                }),
        )
        .await
        .map(|_| ())
    }

    pub async fn resolve_editor_target(&self, project_dir: &str, path: &str) -> Result<Value> {
        self.send_json(
            self.client
                .get(self.url("/agent/resolve-editor-target"))
                .query(&[("projectDir", project_dir), ("path", path)]),
        )
        .await
    }

    pub async fn git_log(&self, project_dir: &str) -> Result<String> {
        self.send_text(
            self.client
                .get(self.url("/agent/git-log"))
                .query(&[("projectDir", project_dir)]),
        )
        .await
    }

    /// Rendered diff for `request`
    pub async fn git_diff(&self, request: &DiffRequest) -> Result<String> {
        self.send_text(
            self.client
                .get(self.url(request.path))
                .query(&request.params),
        )
        .await
    }

    /// Warm the server-side diff cache
    pub async fn prefetch_diff(&self, request: &DiffRequest) -> Result<()> {
        self.git_diff(&request.prefetch()).await.map(|_| ())
    }
}

#[async_trait]
impl RunsSource for RunnerClient {
    async fn fetch_runs(&self, query: &RunsQuery) -> Result<Vec<RunRecord>> {
        RunnerClient::fetch_runs(self, query).await
    }
}

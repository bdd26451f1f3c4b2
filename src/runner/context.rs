//! Where the current run lives: project, run id, branch and repository facts

use reqwest::Url;

use crate::api::ProjectMeta;
use crate::error::{Result, RunnerError};
use crate::history::RunRecord;
use crate::stream::RunInfo;

/// Parameters carried by a page location or deep link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationParams {
    pub repo_directory: Option<String>,
    pub session_id: Option<String>,
    pub archived: bool,
    /// From the `#run=<id>` fragment
    pub run_id: Option<String>,
}

impl LocationParams {
    /// Parse an absolute location such as
    /// `http://host/agent?repo_directory=/r&sessionId=s&archived=1#run=41`
    pub fn parse(location: &str) -> Result<Self> {
        let url = Url::parse(location).map_err(|e| RunnerError::Url(format!("{location}: {e}")))?;
        let mut params = LocationParams::default();

        for (key, value) in url.query_pairs() {
            let value = value.trim();
            match key.as_ref() {
                "repo_directory" if !value.is_empty() => {
                    params.repo_directory = Some(value.to_string())
                }
                "sessionId" if !value.is_empty() => params.session_id = Some(value.to_string()),
                "archived" => params.archived = matches!(value, "1" | "true"),
                _ => {}
            }
        }

        params.run_id = url.fragment().and_then(|fragment| {
            fragment
                .split('&')
                .find_map(|part| part.strip_prefix("run="))
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        });
        Ok(params)
    }

    /// Rebuild a location on top of `base`
    pub fn to_location(&self, base: &str) -> Result<String> {
        let mut url = Url::parse(base).map_err(|e| RunnerError::Url(format!("{base}: {e}")))?;
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            if let Some(dir) = &self.repo_directory {
                query.append_pair("repo_directory", dir);
            }
            if let Some(session_id) = &self.session_id {
                query.append_pair("sessionId", session_id);
            }
            if self.archived {
                query.append_pair("archived", "1");
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url.set_fragment(self.run_id.as_ref().map(|id| format!("run={id}")).as_deref());
        Ok(url.to_string())
    }
}

/// Never persisted; rebuilt from the location or from server events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    pub project_dir: String,
    pub run_id: Option<String>,
    pub effective_project_dir: Option<String>,
    pub branch_name: Option<String>,
    pub repo_branch_name: Option<String>,
    pub repo_branch_dir: Option<String>,
    pub repo_primary_branch: Option<String>,
    pub repo_local_path: Option<String>,
    pub repo_name: Option<String>,
    pub repo_is_demo: bool,
}

impl RunContext {
    pub fn new(project_dir: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_location(params: &LocationParams) -> Self {
        Self {
            project_dir: params.repo_directory.clone().unwrap_or_default(),
            run_id: params.run_id.clone(),
            ..Self::default()
        }
    }

    pub fn from_record(record: &RunRecord) -> Self {
        Self {
            project_dir: record.project_dir.clone(),
            run_id: Some(record.id.clone()).filter(|id| !id.is_empty()),
            effective_project_dir: record.effective_project_dir.clone(),
            branch_name: record.branch_name.clone(),
            ..Self::default()
        }
    }

    /// Directory the agent actually works in
    pub fn working_dir(&self) -> &str {
        self.effective_project_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.project_dir)
    }

    /// Rebind identity mid-flight; only fields the server sent are touched
    pub fn apply_run_info(&mut self, info: &RunInfo) {
        if let Some(run_id) = info.run_id.as_ref().filter(|id| !id.is_empty()) {
            self.run_id = Some(run_id.clone());
        }
        if let Some(dir) = info.project_dir.as_ref().filter(|d| !d.is_empty()) {
            self.project_dir = dir.clone();
        }
        if let Some(dir) = info.effective_project_dir.as_ref().filter(|d| !d.is_empty()) {
            self.effective_project_dir = Some(dir.clone());
        }
        if let Some(branch) = info.branch_name.as_ref().filter(|b| !b.is_empty()) {
            self.branch_name = Some(branch.clone());
        }
    }

    pub fn apply_project_meta(&mut self, meta: &ProjectMeta) {
        self.repo_branch_name = meta.branch_name.clone();
        self.repo_primary_branch = meta.repo_config_branch.clone();
        self.repo_local_path = meta.git_repo_local_path.clone();
        self.repo_branch_dir = meta
            .git_repo_local_path
            .clone()
            .or_else(|| Some(self.working_dir().to_string()).filter(|d| !d.is_empty()));
        self.repo_name = meta.repo_name.clone();
        self.repo_is_demo = meta.is_demo;
    }

    /// Location parameters that reopen this run
    pub fn location_params(&self, session_id: Option<&str>, archived: bool) -> LocationParams {
        LocationParams {
            repo_directory: Some(self.project_dir.clone()).filter(|d| !d.is_empty()),
            session_id: session_id.map(str::to_string),
            archived,
            run_id: self.run_id.clone(),
        }
    }
}

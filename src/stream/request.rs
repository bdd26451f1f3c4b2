use crate::error::{Result, RunnerError};

/// Parameters for `GET /agent/stream`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRequest {
    pub project_dir: String,
    pub prompt: String,
    pub model: Option<String>,
    /// Run git_fpush.sh after the agent finishes
    pub git_fpush: bool,
    /// Extra instructions prepended by the server to the agent prompt
    pub agent_instructions: Option<String>,
    /// Preferred agent engine
    pub engine: Option<String>,
    /// Parent run when this prompt continues an earlier run
    pub followup_parent_id: Option<String>,
    pub session_id: Option<String>,
}

impl StreamRequest {
    pub fn new(project_dir: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            prompt: prompt.into(),
            git_fpush: true,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_git_fpush(mut self, enabled: bool) -> Self {
        self.git_fpush = enabled;
        self
    }

    pub fn with_agent_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.agent_instructions = Some(instructions.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with_followup_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.followup_parent_id = Some(parent_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Reject requests the server would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(RunnerError::Validation("Please enter a prompt.".to_string()));
        }
        if self.project_dir.trim().is_empty() {
            return Err(RunnerError::Validation(
                "Please enter a project directory.".to_string(),
            ));
        }
        Ok(())
    }

    /// Query pairs in the order the server documents them; empty optionals
    /// are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("prompt", self.prompt.clone()),
            ("projectDir", self.project_dir.trim().to_string()),
        ];

        let optional = [
            ("model", &self.model),
            ("agentInstructions", &self.agent_instructions),
            ("engine", &self.engine),
            ("followupParentId", &self.followup_parent_id),
            ("sessionId", &self.session_id),
        ];

        pairs.push(("gitFpush", if self.git_fpush { "1" } else { "0" }.to_string()));
        for (key, value) in optional {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                pairs.push((key, value.to_string()));
            }
        }
        pairs
    }
}

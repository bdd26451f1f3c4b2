//! Follow-up exchanges layered under a parent run

use uuid::Uuid;

use crate::history::RunRecord;
use crate::output::{HiddenPromptFilter, OutputMultiplexer};
use crate::stream::RunPhase;

/// One continuation prompt and its own output
#[derive(Debug)]
pub struct FollowupSession {
    pub id: Uuid,
    pub parent_run_id: String,
    pub prompt: String,
    /// Server run id, once `run-info` arrives
    pub run_id: Option<String>,
    pub phase: RunPhase,
    pub output: OutputMultiplexer,
}

impl FollowupSession {
    fn new(parent_run_id: String, prompt: String, filter: Option<HiddenPromptFilter>) -> Self {
        let mut output = OutputMultiplexer::new();
        output.set_prompt_filter(filter);
        output.set_in_flight(true);
        Self {
            id: Uuid::new_v4(),
            parent_run_id,
            prompt,
            run_id: None,
            phase: RunPhase::Starting,
            output,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_in_flight()
    }
}

/// All follow-ups of the visible run, oldest first
#[derive(Debug, Default)]
pub struct FollowupSessions {
    sessions: Vec<FollowupSession>,
}

impl FollowupSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        parent_run_id: impl Into<String>,
        prompt: impl Into<String>,
        filter: Option<HiddenPromptFilter>,
    ) -> Uuid {
        let session = FollowupSession::new(parent_run_id.into(), prompt.into(), filter);
        let id = session.id;
        tracing::debug!(followup_id = %id, parent = %session.parent_run_id, "Follow-up started");
        self.sessions.push(session);
        id
    }

    /// Rebuild a finished follow-up from its persisted run
    pub fn restore(&mut self, record: &RunRecord, filter: Option<HiddenPromptFilter>) -> Uuid {
        let parent = record.followup_parent_id.clone().unwrap_or_default();
        let mut session = FollowupSession::new(parent, record.user_prompt.clone(), filter);
        session.run_id = Some(record.id.clone());
        session.phase = if record.is_finished() {
            RunPhase::Complete
        } else {
            RunPhase::Running
        };
        session.output.rehydrate(record);
        let id = session.id;
        self.sessions.push(session);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&FollowupSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut FollowupSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FollowupSession> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn any_running(&self) -> bool {
        self.sessions.iter().any(FollowupSession::is_running)
    }

    /// Drop every follow-up; used when a new task starts
    pub fn clear(&mut self) {
        if !self.sessions.is_empty() {
            tracing::debug!(count = self.sessions.len(), "Discarding follow-ups");
        }
        self.sessions.clear();
    }
}

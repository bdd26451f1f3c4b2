//! Request and response bodies for the runner server's JSON endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Common reply of the action endpoints (merge, archive, delete-local, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionResponse {
    pub output: Option<String>,
    pub error_output: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Best single line to show the user
    pub fn summary(&self) -> String {
        [&self.error, &self.message, &self.error_output, &self.output]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
            .to_string()
    }
}

/// Repository metadata for a project directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectMeta {
    pub branch_name: Option<String>,
    pub repo_config_branch: Option<String>,
    pub git_repo_local_path: Option<String>,
    pub repo_name: Option<String>,
    pub is_demo: bool,
}

/// `GET /agent/file-tree` reply; the tree is passed through untouched
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileTree {
    pub file_tree: Value,
    pub truncated: bool,
}

/// Pull model names out of any of the shapes the models endpoint has used:
/// a bare list, `{ "models": [...] }`, and entries that are strings or
/// objects with `id`, `name` or `model`.
pub fn parse_model_list(value: &Value) -> Vec<String> {
    let entries = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("models") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => ["id", "name", "model"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .filter(|name| !name.trim().is_empty())
        .collect()
}

/// Read the first non-empty string under any of `keys`
pub fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ModelsBody<'a> {
    pub models: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DefaultModelBody<'a> {
    pub default_model: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentInstructionsBody<'a> {
    pub agent_instructions: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ArchiveAllBody<'a> {
    pub project_dir: &'a str,
}

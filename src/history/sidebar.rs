//! Run history list: caching, filtering, pagination and selection

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::config::SidebarConfig;
use crate::history::badge::{derive_badge, RunBadge};
use crate::history::record::normalize_dir;
use crate::history::RunRecord;

/// Options for a sidebar load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadRunsOptions {
    pub project_dir: String,
    /// Bypass the cache
    pub force: bool,
    /// Jump back to the first page after loading
    pub reset_page: bool,
}

impl LoadRunsOptions {
    pub fn new(project_dir: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Self::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn resetting_page(mut self) -> Self {
        self.reset_page = true;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheStamp {
    project_dir: String,
    fetched_at: Instant,
}

/// In-memory model of the run history sidebar
#[derive(Debug, Clone)]
pub struct RunsSidebar {
    /// Top-level runs in server order
    runs: Vec<RunRecord>,
    /// Follow-up runs keyed by parent id
    followups: HashMap<String, Vec<RunRecord>>,
    /// Parent ids with a follow-up currently streaming
    running_followups: HashSet<String>,
    cache: Option<CacheStamp>,
    cache_ttl: Duration,
    page_size: usize,
    /// Zero-based
    page: usize,
    filter: String,
    show_archived: bool,
    repo_dir: Option<String>,
    active_run_id: Option<String>,
    /// The highlighted run was not listed yet; jump to its page once it is
    reveal_pending: bool,
}

impl Default for RunsSidebar {
    fn default() -> Self {
        Self::new(&SidebarConfig::default())
    }
}

impl RunsSidebar {
    pub fn new(config: &SidebarConfig) -> Self {
        Self {
            runs: Vec::new(),
            followups: HashMap::new(),
            running_followups: HashSet::new(),
            cache: None,
            cache_ttl: config.cache_ttl,
            page_size: config.page_size.max(1),
            page: 0,
            filter: String::new(),
            show_archived: false,
            repo_dir: None,
            active_run_id: None,
            reveal_pending: false,
        }
    }

    /// Whether a load with `options` has to hit the server
    pub fn needs_fetch(&self, options: &LoadRunsOptions, now: Instant) -> bool {
        if options.force {
            return true;
        }
        match &self.cache {
            Some(stamp) => {
                normalize_dir(&stamp.project_dir) != normalize_dir(&options.project_dir)
                    || now.saturating_duration_since(stamp.fetched_at) >= self.cache_ttl
            }
            None => true,
        }
    }

    /// Replace the list with a fresh server response
    pub fn replace(&mut self, options: &LoadRunsOptions, records: Vec<RunRecord>, now: Instant) {
        let mut runs = Vec::with_capacity(records.len());
        let mut followups: HashMap<String, Vec<RunRecord>> = HashMap::new();
        for record in records {
            if record.is_followup() {
                let parent = record.followup_parent_id.clone().unwrap_or_default();
                followups.entry(parent).or_default().push(record);
            } else {
                runs.push(record);
            }
        }

        tracing::debug!(
            project_dir = %options.project_dir,
            runs = runs.len(),
            followups = followups.values().map(Vec::len).sum::<usize>(),
            "Sidebar runs replaced"
        );

        self.runs = runs;
        self.followups = followups;
        self.cache = Some(CacheStamp {
            project_dir: options.project_dir.clone(),
            fetched_at: now,
        });
        if options.reset_page {
            self.page = 0;
        }
        self.clamp_page();
        if self.reveal_pending {
            self.reveal_active();
        }
    }

    /// Drop the cache so the next load refetches
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn find(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs
            .iter()
            .chain(self.followups.values().flatten())
            .find(|r| r.id == run_id)
    }

    pub fn followups_for(&self, parent_id: &str) -> &[RunRecord] {
        self.followups
            .get(parent_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn set_followup_running(&mut self, parent_id: &str, running: bool) {
        if running {
            self.running_followups.insert(parent_id.to_string());
        } else {
            self.running_followups.remove(parent_id);
        }
    }

    pub fn badge_for(&self, record: &RunRecord) -> Option<RunBadge> {
        derive_badge(record, self.running_followups.contains(&record.id))
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.page = 0;
    }

    pub fn show_archived(&self) -> bool {
        self.show_archived
    }

    pub fn set_show_archived(&mut self, show_archived: bool) {
        if self.show_archived != show_archived {
            self.show_archived = show_archived;
            self.page = 0;
        }
    }

    pub fn set_repo_dir(&mut self, repo_dir: Option<String>) {
        self.repo_dir = repo_dir.filter(|d| !d.trim().is_empty());
        self.clamp_page();
    }

    /// Runs after follow-up exclusion, text filter, archive partition and
    /// repository match, in server order
    pub fn visible(&self) -> Vec<&RunRecord> {
        let repo = self.repo_dir.as_deref().unwrap_or("");
        self.runs
            .iter()
            .filter(|r| r.matches_text(&self.filter))
            .filter(|r| r.archived == self.show_archived)
            .filter(|r| r.in_repo(repo))
            .collect()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Always at least one
    pub fn total_pages(&self) -> usize {
        self.visible().len().div_ceil(self.page_size).max(1)
    }

    /// Zero-based current page
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
        self.clamp_page();
    }

    pub fn next_page(&mut self) -> bool {
        if self.page + 1 < self.total_pages() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.page > 0 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    fn clamp_page(&mut self) {
        let last = self.total_pages() - 1;
        if self.page > last {
            self.page = last;
        }
    }

    pub fn page_runs(&self) -> Vec<&RunRecord> {
        self.visible()
            .into_iter()
            .skip(self.page * self.page_size)
            .take(self.page_size)
            .collect()
    }

    pub fn active_run_id(&self) -> Option<&str> {
        self.active_run_id.as_deref()
    }

    /// Highlight `run_id` and move to the page that shows it.
    ///
    /// Returns false when the run is not in the visible list; the highlight
    /// is still recorded and the page follows it on the first list that
    /// contains it. Later refreshes leave the page alone.
    pub fn select_run(&mut self, run_id: &str) -> bool {
        self.active_run_id = Some(run_id.to_string());
        self.reveal_active()
    }

    fn reveal_active(&mut self) -> bool {
        let Some(run_id) = self.active_run_id.as_deref() else {
            self.reveal_pending = false;
            return false;
        };
        let position = self.visible().iter().position(|r| r.id == run_id);
        match position {
            Some(index) => {
                self.page = index / self.page_size;
                self.reveal_pending = false;
                true
            }
            None => {
                self.reveal_pending = true;
                false
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.active_run_id = None;
        self.reveal_pending = false;
    }

    /// One text line per run on the current page
    pub fn render_lines(&self) -> Vec<String> {
        self.page_runs()
            .into_iter()
            .map(|record| {
                let marker = if self.active_run_id.as_deref() == Some(record.id.as_str()) {
                    '>'
                } else {
                    ' '
                };
                let badge = self
                    .badge_for(record)
                    .map(|b| format!(" [{b}]"))
                    .unwrap_or_default();
                let followups = match self.followups_for(&record.id).len() {
                    0 => String::new(),
                    n => format!(" (+{n})"),
                };
                format!(
                    "{marker} #{}{badge} {}{followups}",
                    record.id,
                    record.prompt_summary(40)
                )
            })
            .collect()
    }
}

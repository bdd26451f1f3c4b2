//! Background run history poller
//!
//! Refreshes the run list on an interval without blocking the caller and
//! pushes changes over a channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::history::{RunRecord, RunsQuery};

/// Anything that can list runs; the HTTP client in production, fakes in tests
#[async_trait]
pub trait RunsSource: Send + Sync + 'static {
    async fn fetch_runs(&self, query: &RunsQuery) -> Result<Vec<RunRecord>>;
}

/// Updates sent from the poller
#[derive(Debug, Clone)]
pub enum RunsPollerUpdate {
    RunsLoaded {
        query: RunsQuery,
        runs: Vec<RunRecord>,
    },
    LoadFailed {
        query: RunsQuery,
        error: String,
    },
}

#[derive(Debug)]
enum RunsPollerCommand {
    RefreshNow,
    SetProjectDir(Option<String>),
    SetQuery(RunsQuery),
    Shutdown,
}

/// Handle to control the background poller
#[derive(Clone)]
pub struct RunsPollerHandle {
    cmd_tx: mpsc::UnboundedSender<RunsPollerCommand>,
}

impl RunsPollerHandle {
    /// Fetch immediately and always report the result
    pub fn refresh_now(&self) {
        let _ = self.cmd_tx.send(RunsPollerCommand::RefreshNow);
    }

    /// Switch the repository filter and refresh
    pub fn set_project_dir(&self, project_dir: Option<String>) {
        let _ = self
            .cmd_tx
            .send(RunsPollerCommand::SetProjectDir(project_dir));
    }

    pub fn set_query(&self, query: RunsQuery) {
        let _ = self.cmd_tx.send(RunsPollerCommand::SetQuery(query));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(RunsPollerCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

struct RunsPoller {
    source: Arc<dyn RunsSource>,
    interval: Duration,
    query: RunsQuery,
    last_runs: Option<Vec<RunRecord>>,
    cmd_rx: mpsc::UnboundedReceiver<RunsPollerCommand>,
    update_tx: mpsc::UnboundedSender<RunsPollerUpdate>,
}

impl RunsPoller {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(RunsPollerCommand::Shutdown) => break,
                        Some(RunsPollerCommand::RefreshNow) => self.poll(true).await,
                        Some(RunsPollerCommand::SetProjectDir(dir)) => {
                            self.query.repo_directory = dir;
                            self.poll(true).await;
                        }
                        Some(RunsPollerCommand::SetQuery(query)) => {
                            self.query = query;
                            self.poll(true).await;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.poll(false).await;
                }
            }

            if self.update_tx.is_closed() {
                break;
            }
        }
        tracing::debug!("Runs poller stopped");
    }

    /// Fetch once; unforced polls only report when the list changed
    async fn poll(&mut self, force: bool) {
        match self.source.fetch_runs(&self.query).await {
            Ok(runs) => {
                if !force && self.last_runs.as_ref() == Some(&runs) {
                    return;
                }
                self.last_runs = Some(runs.clone());
                let _ = self.update_tx.send(RunsPollerUpdate::RunsLoaded {
                    query: self.query.clone(),
                    runs,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll run history");
                let _ = self.update_tx.send(RunsPollerUpdate::LoadFailed {
                    query: self.query.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Spawn the poller on the current runtime and return its handle
pub fn spawn_runs_poller(
    source: Arc<dyn RunsSource>,
    interval: Duration,
    query: RunsQuery,
    update_tx: mpsc::UnboundedSender<RunsPollerUpdate>,
) -> RunsPollerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let poller = RunsPoller {
        source,
        interval,
        query,
        last_runs: None,
        cmd_rx,
        update_tx,
    };
    tokio::spawn(poller.run());
    RunsPollerHandle { cmd_tx }
}

//! Debounced background fetches

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::client::RunnerClient;
use crate::api::dedupe::InflightRequests;
use crate::api::types::FileTree;

/// Runs only the most recent job once `delay` has passed without a newer one
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Schedule `job`, aborting whatever was still waiting
    pub fn trigger<F>(&mut self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone)]
pub enum FileTreeUpdate {
    Loaded {
        project_dir: String,
        tree: FileTree,
    },
    Failed {
        project_dir: String,
        error: String,
    },
}

/// Fetches the file tree as the project directory input settles
pub struct FileTreeLoader {
    client: RunnerClient,
    debouncer: Debouncer,
    inflight: InflightRequests<String, FileTree>,
    update_tx: mpsc::UnboundedSender<FileTreeUpdate>,
}

impl FileTreeLoader {
    pub fn new(
        client: RunnerClient,
        debounce: Duration,
        update_tx: mpsc::UnboundedSender<FileTreeUpdate>,
    ) -> Self {
        Self {
            client,
            debouncer: Debouncer::new(debounce),
            inflight: InflightRequests::new(),
            update_tx,
        }
    }

    /// Called on every edit of the directory input
    pub fn project_dir_changed(&mut self, project_dir: &str) {
        let project_dir = project_dir.trim().to_string();
        if project_dir.is_empty() {
            self.debouncer.cancel();
            return;
        }

        let client = self.client.clone();
        let inflight = self.inflight.clone();
        let update_tx = self.update_tx.clone();
        self.debouncer.trigger(async move {
            let fetch_dir = project_dir.clone();
            let result = inflight
                .get_or_fetch(project_dir.clone(), move || async move {
                    client.file_tree(&fetch_dir).await
                })
                .await;
            let update = match result {
                Ok(tree) => FileTreeUpdate::Loaded { project_dir, tree },
                Err(e) => {
                    tracing::warn!(
                        project_dir = %project_dir,
                        error = %e,
                        "File tree fetch failed"
                    );
                    FileTreeUpdate::Failed {
                        project_dir,
                        error: e.to_string(),
                    }
                }
            };
            let _ = update_tx.send(update);
        });
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }
}

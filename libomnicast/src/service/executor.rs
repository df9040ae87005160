//! Publish executor
//!
//! Every publish run is a task on the tokio runtime with its own completion
//! handle. Callers that need the outcome `wait()` on it; callers that do not
//! `detach()` it and the outcome only ends up in the log.

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{OmnicastError, Result};
use crate::publisher::{PublishOrchestrator, PublishRun, PublishTrigger};

#[derive(Clone)]
pub struct PublishExecutor {
    orchestrator: PublishOrchestrator,
}

impl PublishExecutor {
    pub fn new(orchestrator: PublishOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Start a run in the background
    pub fn submit(&self, post_id: &str, trigger: PublishTrigger) -> PublishTask {
        let orchestrator = self.orchestrator.clone();
        let id = post_id.to_string();
        let handle = tokio::spawn(async move { orchestrator.publish(&id, trigger).await });

        PublishTask {
            post_id: post_id.to_string(),
            handle,
        }
    }

    /// Run to completion on the caller's task
    pub async fn run(&self, post_id: &str, trigger: PublishTrigger) -> Result<PublishRun> {
        self.submit(post_id, trigger).wait().await
    }
}

/// Handle to a submitted run
pub struct PublishTask {
    post_id: String,
    handle: JoinHandle<Result<PublishRun>>,
}

impl PublishTask {
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run; a panicked or cancelled task surfaces as `Task`
    pub async fn wait(self) -> Result<PublishRun> {
        self.handle
            .await
            .map_err(|e| OmnicastError::Task(format!("publish of {}: {}", self.post_id, e)))?
    }

    /// Let the run finish on its own, logging the outcome
    pub fn detach(self) {
        tokio::spawn(async move {
            let post_id = self.post_id.clone();
            match self.wait().await {
                Ok(PublishRun::Completed(report)) => {
                    info!(post_id = %post_id, status = %report.status, "Background publish finished")
                }
                Ok(PublishRun::Skipped { status, .. }) => {
                    info!(post_id = %post_id, status = %status, "Background publish skipped")
                }
                Err(e) => error!(post_id = %post_id, error = %e, "Background publish failed"),
            }
        });
    }
}

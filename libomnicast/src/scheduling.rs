//! Scheduler bridge
//!
//! Deferred publishing is handed to an external at-least-once queue (QStash
//! protocol) that calls the scheduler webhook at or after the scheduled
//! time. Each scheduled post also has exactly one [`ScheduledJob`] row, which
//! the periodic sweep uses as a fallback delivery path. Both paths run the
//! orchestrator with [`PublishTrigger::Scheduled`], whose status
//! compare-and-swap turns every redelivery after the first into a no-op.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::error::{ConfigError, OmnicastError, Result, SignatureError};
use crate::platforms::truncate_raw;
use crate::publisher::{PublishRun, PublishTrigger};
use crate::service::executor::PublishExecutor;
use crate::types::{JobStatus, PostStatus, ScheduledJob};

pub const SIGNATURE_HEADER: &str = "Upstash-Signature";
pub const SIGNATURE_ISSUER: &str = "Upstash";

/// Jobs handled per sweep tick
pub const SWEEP_BATCH: i64 = 100;

/// How early a delivery may arrive and still publish
///
/// Anything earlier is left over from a schedule the owner has since moved.
pub const EARLY_DELIVERY_TOLERANCE_SECS: i64 = 300;

/// A `processing` job untouched for this long is claimed again by the sweep
pub const CLAIM_LEASE_SECS: i64 = 900;

fn run_status(run: &PublishRun) -> PostStatus {
    match run {
        PublishRun::Completed(report) => report.status,
        PublishRun::Skipped { status, .. } => *status,
    }
}

/// Job status once a run returned; `None` keeps the job open
///
/// A post that is still `scheduled` lost no publish, and one that is
/// `publishing` belongs to a run that has not ended yet.
fn settled_status(run: &PublishRun) -> Option<JobStatus> {
    match run {
        PublishRun::Completed(_) => Some(JobStatus::Completed),
        PublishRun::Skipped {
            status: PostStatus::Scheduled | PostStatus::Publishing,
            ..
        } => None,
        PublishRun::Skipped { .. } => Some(JobStatus::Completed),
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue a webhook delivery for `post_id` at or after `not_before`
    /// (unix seconds); returns the queue's message id
    async fn schedule(&self, post_id: &str, not_before: i64) -> Result<String>;

    async fn cancel(&self, message_id: &str) -> Result<()>;
}

/// Webhook body, also the queued message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub post_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

pub struct HttpQueueClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    webhook_url: String,
}

impl std::fmt::Debug for HttpQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQueueClient")
            .field("base_url", &self.base_url)
            .field("webhook_url", &self.webhook_url)
            .finish_non_exhaustive()
    }
}

impl HttpQueueClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: SecretString, webhook_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            webhook_url: webhook_url.to_string(),
        }
    }

    /// `None` when the queue token or webhook URL is not configured
    pub fn from_config(http: reqwest::Client, config: &SchedulerConfig) -> Option<Self> {
        let token = config.queue_token.as_ref()?;
        let webhook_url = config.webhook_url.as_deref()?;
        Some(Self::new(
            http,
            &config.queue_url,
            SecretString::from(token.expose_secret().to_string()),
            webhook_url,
        ))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OmnicastError::Queue(format!(
            "queue answered {}: {}",
            status,
            truncate_raw(&body)
        )))
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn schedule(&self, post_id: &str, not_before: i64) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/v2/publish/{}", self.base_url, self.webhook_url))
            .bearer_auth(self.token.expose_secret())
            .header("Upstash-Not-Before", not_before.to_string())
            .json(&WebhookPayload {
                post_id: post_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| OmnicastError::Queue(e.to_string()))?;

        let published: PublishResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| OmnicastError::Queue(format!("unreadable queue response: {}", e)))?;

        debug!(post_id, message_id = %published.message_id, "Queued scheduled publish");
        Ok(published.message_id)
    }

    async fn cancel(&self, message_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/v2/messages/{}", self.base_url, message_id))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| OmnicastError::Queue(e.to_string()))?;

        // Already delivered or expired
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: String,
    pub post_id: String,
    pub not_before: i64,
}

/// In-process queue that only records what it was asked to do
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<QueuedMessage>>,
    cancelled: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    unavailable: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue whose every call fails
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<QueuedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn schedule(&self, post_id: &str, not_before: i64) -> Result<String> {
        if self.unavailable {
            return Err(OmnicastError::Queue("queue unavailable".to_string()));
        }
        let message_id = format!("msg_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(QueuedMessage {
                message_id: message_id.clone(),
                post_id: post_id.to_string(),
                not_before,
            });
        Ok(message_id)
    }

    async fn cancel(&self, message_id: &str) -> Result<()> {
        if self.unavailable {
            return Err(OmnicastError::Queue("queue unavailable".to_string()));
        }
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Claims of the queue's signature JWT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    /// base64url SHA-256 of the raw request body
    pub body: String,
}

fn body_hash(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

/// Sign a webhook body the way the queue does
///
/// Used by tests and by tooling that replays deliveries.
pub fn sign(key: &str, subject: &str, body: &[u8], now: i64) -> Result<String> {
    let claims = SignatureClaims {
        iss: SIGNATURE_ISSUER.to_string(),
        sub: subject.to_string(),
        exp: now + 300,
        nbf: now,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        body: URL_SAFE.encode(Sha256::digest(body)),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )
    .map_err(|e| OmnicastError::InvalidInput(format!("Cannot sign payload: {}", e)))
}

/// Verifies webhook signatures against the current and the next signing key
pub struct SignatureVerifier {
    keys: Vec<SecretString>,
    subject: Option<String>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("keys", &self.keys.len())
            .field("subject", &self.subject)
            .finish()
    }
}

impl SignatureVerifier {
    /// `subject`, when set, must equal the token's `sub` (the webhook URL)
    pub fn new(current: SecretString, next: Option<SecretString>, subject: Option<String>) -> Self {
        let mut keys = vec![current];
        keys.extend(next);
        Self { keys, subject }
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let current = config.current_signing_key.as_ref().ok_or_else(|| {
            ConfigError::MissingField("scheduler.current_signing_key".to_string())
        })?;
        Ok(Self::new(
            SecretString::from(current.expose_secret().to_string()),
            config
                .next_signing_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret().to_string())),
            config.webhook_url.clone(),
        ))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[SIGNATURE_ISSUER]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_nbf = true;
        validation.sub = self.subject.clone();
        validation
    }

    /// Accept the request when any trusted key validates the token and the
    /// token's body hash matches `body`
    pub fn verify(
        &self,
        header: Option<&str>,
        body: &[u8],
    ) -> std::result::Result<SignatureClaims, SignatureError> {
        let token = header
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(SignatureError::Missing)?;

        let validation = self.validation();
        let expected_hash = body_hash(body);
        let mut body_mismatch = false;
        let mut last_error = String::from("no signing keys");

        for key in &self.keys {
            let decoding_key = DecodingKey::from_secret(key.expose_secret().as_bytes());
            match decode::<SignatureClaims>(token, &decoding_key, &validation) {
                Ok(data) => {
                    if data.claims.body.trim_end_matches('=') == expected_hash {
                        return Ok(data.claims);
                    }
                    body_mismatch = true;
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        if body_mismatch {
            Err(SignatureError::BodyMismatch)
        } else {
            Err(SignatureError::Invalid(last_error))
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Counters of one sweep tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Jobs this sweep claimed
    pub claimed: usize,
    pub completed: usize,
    /// Claimed, but the post had already moved on
    pub skipped: usize,
    /// Failed this time, back to pending for another attempt
    pub requeued: usize,
    pub failed: usize,
}

pub struct SchedulerBridge {
    db: Arc<Database>,
    executor: PublishExecutor,
    queue: Option<Arc<dyn QueueClient>>,
    verifier: Option<SignatureVerifier>,
    max_attempts: u32,
}

impl SchedulerBridge {
    pub fn new(
        db: Arc<Database>,
        executor: PublishExecutor,
        queue: Option<Arc<dyn QueueClient>>,
        verifier: Option<SignatureVerifier>,
        max_attempts: u32,
    ) -> Self {
        if queue.is_none() {
            info!("No external queue configured; scheduled posts are delivered by the sweep only");
        }
        Self {
            db,
            executor,
            queue,
            verifier,
            max_attempts,
        }
    }

    /// Schedule (or reschedule) an owner's post for `when`
    pub async fn schedule(&self, owner_id: &str, post_id: &str, when: i64) -> Result<ScheduledJob> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .filter(|p| p.owner_id == owner_id)
            .ok_or_else(|| OmnicastError::NotFound(format!("post {}", post_id)))?;

        if !post.status.is_editable() {
            return Err(OmnicastError::Conflict(format!(
                "post {} is {} and cannot be scheduled",
                post_id, post.status
            )));
        }
        let now = chrono::Utc::now().timestamp();
        if when <= now {
            return Err(OmnicastError::InvalidInput(
                "scheduledAt must be in the future".to_string(),
            ));
        }

        if let Some(existing) = self.db.get_job_for_post(post_id).await? {
            self.cancel_message(&existing).await;
        }

        let queue_message_id = match &self.queue {
            Some(queue) => Some(queue.schedule(post_id, when).await?),
            None => None,
        };

        let job = self
            .db
            .upsert_scheduled_job(&ScheduledJob {
                id: Uuid::new_v4().to_string(),
                post_id: post_id.to_string(),
                owner_id: owner_id.to_string(),
                scheduled_at: when,
                status: JobStatus::Pending,
                queue_message_id,
                attempts: 0,
                max_attempts: self.max_attempts,
                last_attempt_at: None,
                error: None,
                created_at: now,
            })
            .await?;

        let updated = self
            .db
            .set_post_schedule(
                post_id,
                &[PostStatus::Draft, PostStatus::Scheduled],
                PostStatus::Scheduled,
                Some(when),
            )
            .await?;
        if !updated {
            self.cancel_message(&job).await;
            self.db.delete_job_for_post(post_id).await?;
            return Err(OmnicastError::Conflict(format!(
                "post {} changed status while being scheduled",
                post_id
            )));
        }

        info!(post_id, scheduled_at = when, "Scheduled post");
        Ok(job)
    }

    /// Cancel a scheduled post and return it to `draft`
    pub async fn unschedule(&self, owner_id: &str, post_id: &str) -> Result<()> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .filter(|p| p.owner_id == owner_id)
            .ok_or_else(|| OmnicastError::NotFound(format!("post {}", post_id)))?;

        if post.status != PostStatus::Scheduled {
            return Err(OmnicastError::Conflict(format!(
                "post {} is {}, not scheduled",
                post_id, post.status
            )));
        }

        let reverted = self
            .db
            .set_post_schedule(post_id, &[PostStatus::Scheduled], PostStatus::Draft, None)
            .await?;
        if !reverted {
            return Err(OmnicastError::Conflict(format!(
                "post {} started publishing",
                post_id
            )));
        }

        self.drop_job(post_id).await?;
        info!(post_id, "Unscheduled post");
        Ok(())
    }

    /// Remove a post's job and its queued message, if any
    pub async fn drop_job(&self, post_id: &str) -> Result<()> {
        if let Some(job) = self.db.get_job_for_post(post_id).await? {
            self.cancel_message(&job).await;
            self.db.delete_job_for_post(post_id).await?;
        }
        Ok(())
    }

    async fn cancel_message(&self, job: &ScheduledJob) {
        let (Some(queue), Some(message_id)) = (&self.queue, job.queue_message_id.as_deref()) else {
            return;
        };
        if let Err(e) = queue.cancel(message_id).await {
            warn!(post_id = %job.post_id, message_id, error = %e, "Could not cancel queued message");
        }
    }

    /// Handle one webhook delivery
    ///
    /// A delivery arriving well before the post's current `scheduled_at`
    /// belongs to a superseded schedule and is skipped. A run that fails puts
    /// the job back to `pending` so the sweep can retry it.
    ///
    /// # Errors
    ///
    /// `Signature` before anything is parsed, `InvalidInput` for a body
    /// without a `postId`, `NotFound` for a missing post.
    pub async fn handle_delivery(&self, signature: Option<&str>, body: &[u8]) -> Result<PublishRun> {
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            SignatureError::Invalid("no signing keys configured".to_string())
        })?;
        verifier.verify(signature, body)?;

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| OmnicastError::InvalidInput(format!("Invalid webhook body: {}", e)))?;
        if payload.post_id.trim().is_empty() {
            return Err(OmnicastError::InvalidInput("postId is required".to_string()));
        }

        debug!(post_id = %payload.post_id, "Scheduler webhook delivery");
        let now = chrono::Utc::now().timestamp();
        if let Some(post) = self.db.get_post(&payload.post_id).await? {
            let due_at = post
                .scheduled_at
                .filter(|_| post.status == PostStatus::Scheduled);
            if let Some(due_at) = due_at.filter(|at| *at > now + EARLY_DELIVERY_TOLERANCE_SECS) {
                info!(
                    post_id = %payload.post_id,
                    scheduled_at = due_at,
                    "Delivery arrived ahead of the current schedule, skipping"
                );
                return Ok(PublishRun::Skipped {
                    post_id: payload.post_id,
                    status: PostStatus::Scheduled,
                });
            }
        }

        let outcome = self
            .executor
            .run(&payload.post_id, PublishTrigger::Scheduled)
            .await;

        match &outcome {
            Ok(run) => {
                if let Some(status) = settled_status(run) {
                    self.settle_job(&payload.post_id, status, None).await;
                }
            }
            Err(e) if e.is_not_found() => {
                self.settle_job(&payload.post_id, JobStatus::Failed, Some("post not found"))
                    .await
            }
            Err(e) => {
                warn!(post_id = %payload.post_id, error = %e, "Delivered publish failed, leaving the job to the sweep");
                self.settle_job(&payload.post_id, JobStatus::Pending, Some(&e.to_string()))
                    .await
            }
        }

        outcome
    }

    /// A job out of attempts takes its still-scheduled post to `failed`
    async fn give_up_on_post(&self, post_id: &str) {
        match self
            .db
            .transition_post_status(post_id, &[PostStatus::Scheduled], PostStatus::Failed)
            .await
        {
            Ok(true) => info!(post_id, "Scheduled post failed after its last attempt"),
            Ok(false) => {}
            Err(e) => warn!(post_id, error = %e, "Could not mark scheduled post as failed"),
        }
    }

    async fn settle_job(&self, post_id: &str, status: JobStatus, error: Option<&str>) {
        let job = match self.db.get_job_for_post(post_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(post_id, error = %e, "Could not load scheduled job");
                return;
            }
        };
        if let Err(e) = self.db.set_job_status(&job.id, status, error).await {
            warn!(post_id, job_id = %job.id, error = %e, "Could not update scheduled job");
        }
    }

    /// Publish every due job
    ///
    /// Due means `pending`, or `processing` past its claim lease. One job's
    /// failure is recorded on that job and never stops the batch.
    pub async fn sweep(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let lease_expired_before = now - CLAIM_LEASE_SECS;

        for job in self
            .db
            .due_jobs(now, lease_expired_before, SWEEP_BATCH)
            .await?
        {
            if !self.db.claim_job(&job.id, now, lease_expired_before).await? {
                debug!(job_id = %job.id, "Job claimed elsewhere");
                continue;
            }
            report.claimed += 1;
            let attempts = job.attempts + 1;

            let (status, error) = match self.executor.run(&job.post_id, PublishTrigger::Scheduled).await {
                Ok(run) => match (settled_status(&run), run) {
                    (Some(status), PublishRun::Completed(_)) => {
                        report.completed += 1;
                        (status, None)
                    }
                    (Some(status), PublishRun::Skipped { .. }) => {
                        report.skipped += 1;
                        (status, None)
                    }
                    (None, run) if attempts < job.max_attempts => {
                        debug!(job_id = %job.id, post_id = %job.post_id, "Post not ready, job stays pending");
                        report.requeued += 1;
                        (JobStatus::Pending, Some(format!("post still {}", run_status(&run))))
                    }
                    (None, run) => {
                        report.failed += 1;
                        (JobStatus::Failed, Some(format!("post still {}", run_status(&run))))
                    }
                },
                Err(e) if e.is_not_found() => {
                    report.failed += 1;
                    (JobStatus::Failed, Some("post not found".to_string()))
                }
                Err(e) if attempts < job.max_attempts => {
                    warn!(job_id = %job.id, post_id = %job.post_id, attempts, error = %e, "Scheduled publish failed, will retry");
                    report.requeued += 1;
                    (JobStatus::Pending, Some(e.to_string()))
                }
                Err(e) => {
                    warn!(job_id = %job.id, post_id = %job.post_id, attempts, error = %e, "Scheduled publish failed for good");
                    report.failed += 1;
                    self.give_up_on_post(&job.post_id).await;
                    (JobStatus::Failed, Some(e.to_string()))
                }
            };

            if let Err(e) = self.db.set_job_status(&job.id, status, error.as_deref()).await {
                warn!(job_id = %job.id, error = %e, "Could not record job outcome");
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                skipped = report.skipped,
                requeued = report.requeued,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }
}

//! Seven-stage discussion processor.
//!
//! Drives one discussion from `pending` to a created task set while
//! continuously updating a sync job record:
//!
//! ```text
//! pending → team_resolution → config_loading → thread_building
//!        → [ai_analysis?] → task_creation → [notification?] → completed
//! ```
//!
//! The `ai_analysis` and `notification` stages are skipped when the config
//! disables them, and both degrade gracefully: an LLM failure continues the
//! pipeline without enrichment, a notification failure still completes the
//! job. Everything else fails the job with the error captured on the row.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::crypto;
use crate::error::ProcessorError;
use crate::llm::{LlmClient, TaskDetection, ThreadSummary};
use crate::resilience::backoff_delay;
use crate::source::registry::AdapterRegistry;
use crate::source::{DiscussionStatus, SourceAdapter, Thread};
use crate::storage::discussions::Discussion;
use crate::storage::source_configs::SourceConfig;
use crate::storage::{discussions, source_configs, sync_jobs, DbPool};
use crate::taskdb::{TaskDbClient, TaskRecord};

/// Default retry policy for `process_with_retry`.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE: std::time::Duration = std::time::Duration::from_secs(2);
const RETRY_CAP: std::time::Duration = std::time::Duration::from_secs(30);

/// Pages linked in a confirmation message.
const MAX_LINKED_PAGES: usize = 3;

/// Ordered stages of one processor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Pending,
    TeamResolution,
    ConfigLoading,
    ThreadBuilding,
    AiAnalysis,
    TaskCreation,
    Notification,
    Completed,
}

impl JobStage {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::TeamResolution => "team_resolution",
            Self::ConfigLoading => "config_loading",
            Self::ThreadBuilding => "thread_building",
            Self::AiAnalysis => "ai_analysis",
            Self::TaskCreation => "task_creation",
            Self::Notification => "notification",
            Self::Completed => "completed",
        }
    }

    /// The full stage sequence in pipeline order.
    pub fn sequence() -> &'static [JobStage] {
        &[
            Self::Pending,
            Self::TeamResolution,
            Self::ConfigLoading,
            Self::ThreadBuilding,
            Self::AiAnalysis,
            Self::TaskCreation,
            Self::Notification,
            Self::Completed,
        ]
    }

    /// Position within the sequence, for monotonicity checks.
    pub fn order(self) -> usize {
        Self::sequence()
            .iter()
            .position(|s| *s == self)
            .expect("stage in sequence")
    }
}

/// Output of the `ai_analysis` stage.
///
/// Both sides are optional so a degraded run cannot be mistaken for an
/// enriched one downstream.
#[derive(Debug, Default)]
struct AiOutcome {
    summary: Option<ThreadSummary>,
    detection: Option<TaskDetection>,
}

/// Result of a completed processor run.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// The sync job that tracked the run.
    pub job_id: String,
    /// The processed discussion.
    pub discussion_id: String,
    /// Created task page ids, in creation order.
    pub page_ids: Vec<String>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: i64,
}

/// The discussion processor.
pub struct Processor {
    db: DbPool,
    settings: Settings,
    registry: Arc<AdapterRegistry>,
    taskdb_base: Option<String>,
    llm_base: Option<String>,
    max_attempts: u32,
    retry_base: std::time::Duration,
    retry_cap: std::time::Duration,
}

impl Processor {
    /// Create a processor over the given pool, settings, and registry.
    pub fn new(db: DbPool, settings: Settings, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            db,
            settings,
            registry,
            taskdb_base: None,
            llm_base: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: RETRY_BASE,
            retry_cap: RETRY_CAP,
        }
    }

    /// Point the task-DB client at a custom base URL (for testing).
    #[must_use]
    pub fn with_taskdb_base(mut self, base: String) -> Self {
        self.taskdb_base = Some(base);
        self
    }

    /// Point the LLM client at a custom base URL (for testing).
    #[must_use]
    pub fn with_llm_base(mut self, base: String) -> Self {
        self.llm_base = Some(base);
        self
    }

    /// Override the retry policy (for testing).
    #[must_use]
    pub fn with_retry_policy(
        mut self,
        max_attempts: u32,
        base: std::time::Duration,
        cap: std::time::Duration,
    ) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base = base;
        self.retry_cap = cap;
        self
    }

    /// Process one discussion through the full pipeline.
    ///
    /// Creates a fresh sync job, runs the stages, and records the terminal
    /// state on both the job and the discussion.
    pub async fn process(&self, discussion_id: &str) -> Result<ProcessOutcome, ProcessorError> {
        self.process_attempt(discussion_id, 1, self.max_attempts).await
    }

    /// Process with retries: up to `DEFAULT_MAX_ATTEMPTS` attempts with
    /// exponential backoff (base 2 s, cap 30 s). Terminal errors
    /// (not-found, tenant mismatch, inactive config) are not retried. A new
    /// sync job row is created per attempt; earlier rows remain for audit.
    pub async fn process_with_retry(
        &self,
        discussion_id: &str,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let mut attempt = 1u32;
        loop {
            match self
                .process_attempt(discussion_id, attempt, self.max_attempts)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(ProcessorError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(self.retry_base, self.retry_cap, attempt);
                    tracing::warn!(
                        discussion_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "processing attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn process_attempt(
        &self,
        discussion_id: &str,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let started = Instant::now();

        let discussion = discussions::get_discussion(&self.db, discussion_id)
            .await?
            .ok_or_else(|| ProcessorError::DiscussionNotFound(discussion_id.to_string()))?;

        let job_id = uuid::Uuid::new_v4().to_string();
        sync_jobs::insert_sync_job(
            &self.db,
            &job_id,
            &discussion.tenant_id,
            &discussion.owner,
            &discussion.id,
            &discussion.source_config_id,
            attempt,
            max_attempts,
        )
        .await?;
        discussions::set_job_id(&self.db, &discussion.id, &discussion.tenant_id, &job_id).await?;
        discussions::update_status(
            &self.db,
            &discussion.id,
            &discussion.tenant_id,
            DiscussionStatus::Processing.as_str(),
        )
        .await?;

        tracing::info!(
            discussion_id,
            %job_id,
            attempt,
            source_type = %discussion.source_type,
            "processing discussion"
        );

        match self.run_stages(&discussion, &job_id).await {
            Ok(page_ids) => {
                let elapsed = elapsed_ms(started);
                let task_ids_json =
                    serde_json::to_string(&page_ids).unwrap_or_else(|_| "[]".to_string());

                sync_jobs::complete_job(
                    &self.db,
                    &job_id,
                    &discussion.tenant_id,
                    &task_ids_json,
                    elapsed,
                )
                .await?;
                discussions::update_status(
                    &self.db,
                    &discussion.id,
                    &discussion.tenant_id,
                    DiscussionStatus::Completed.as_str(),
                )
                .await?;
                discussions::mark_processed(&self.db, &discussion.id, &discussion.tenant_id)
                    .await?;

                tracing::info!(discussion_id, %job_id, pages = page_ids.len(), "processing completed");

                Ok(ProcessOutcome {
                    job_id,
                    discussion_id: discussion.id,
                    page_ids,
                    processing_time_ms: elapsed,
                })
            }
            Err(e) => {
                let elapsed = elapsed_ms(started);
                tracing::error!(discussion_id, %job_id, error = %e, "processing failed");

                sync_jobs::fail_job(
                    &self.db,
                    &job_id,
                    &discussion.tenant_id,
                    &e.to_string(),
                    Some(&format!("{e:?}")),
                    elapsed,
                )
                .await?;
                discussions::update_status(
                    &self.db,
                    &discussion.id,
                    &discussion.tenant_id,
                    DiscussionStatus::Failed.as_str(),
                )
                .await?;

                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        discussion: &Discussion,
        job_id: &str,
    ) -> Result<Vec<String>, ProcessorError> {
        // Stage: team resolution. Today every tenant is permitted; the
        // stage exists as the extension point for tenant-level policy.
        self.enter_stage(discussion, job_id, JobStage::TeamResolution).await?;
        self.resolve_team(discussion)?;

        // Stage: config loading.
        self.enter_stage(discussion, job_id, JobStage::ConfigLoading).await?;
        let config = self.load_config(discussion).await?;

        // Stage: thread building.
        self.enter_stage(discussion, job_id, JobStage::ThreadBuilding).await?;
        let adapter = self
            .registry
            .get(&discussion.source_type)
            .map_err(|e| ProcessorError::ThreadBuild(e.to_string()))?;
        let thread = adapter
            .fetch_thread(&discussion.source_thread_id, &config)
            .await
            .map_err(|e| ProcessorError::ThreadBuild(e.to_string()))?;

        if let Ok(thread_json) = serde_json::to_string(&thread) {
            discussions::set_thread_json(
                &self.db,
                &discussion.id,
                &discussion.tenant_id,
                &thread_json,
            )
            .await?;
        }

        // Stage: AI analysis (optional, degrades gracefully).
        let ai = if config.ai_enabled {
            self.enter_stage(discussion, job_id, JobStage::AiAnalysis).await?;
            self.analyze(discussion, &config, &thread).await
        } else {
            AiOutcome::default()
        };

        // Stage: task creation.
        self.enter_stage(discussion, job_id, JobStage::TaskCreation).await?;
        let page_ids = self.create_tasks(discussion, &config, &thread, &ai).await?;

        // Stage: notification (optional, failures are non-fatal).
        if config.post_confirmation {
            self.enter_stage(discussion, job_id, JobStage::Notification).await?;
            self.notify(discussion, &config, adapter.as_ref(), &page_ids).await;
        }

        Ok(page_ids)
    }

    fn resolve_team(&self, _discussion: &Discussion) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn load_config(&self, discussion: &Discussion) -> Result<SourceConfig, ProcessorError> {
        let config = source_configs::get_source_config(&self.db, &discussion.source_config_id)
            .await?
            .ok_or_else(|| {
                ProcessorError::ConfigNotFound(discussion.source_config_id.clone())
            })?;

        if config.tenant_id != discussion.tenant_id {
            return Err(ProcessorError::ConfigTenantMismatch {
                config_id: config.id,
                tenant_id: discussion.tenant_id.clone(),
            });
        }
        if !config.active {
            return Err(ProcessorError::ConfigInactive(config.id));
        }
        Ok(config)
    }

    /// Run summary and task detection, swallowing any failure.
    async fn analyze(
        &self,
        discussion: &Discussion,
        config: &SourceConfig,
        thread: &Thread,
    ) -> AiOutcome {
        let client = match self.llm_client(config) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(discussion_id = %discussion.id, error = %e, "AI analysis skipped");
                return AiOutcome::default();
            }
        };

        let file_name = discussion_file_name(discussion);

        let summary = match client
            .generate_summary(thread, file_name.as_deref(), None)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(discussion_id = %discussion.id, error = %e, "summary generation failed");
                None
            }
        };

        let context = thread
            .replies
            .iter()
            .map(|m| format!("{}: {}", m.author, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let detection = match client
            .detect_tasks(
                &thread.root.content,
                (!context.is_empty()).then_some(context.as_str()),
                file_name.as_deref(),
                None,
            )
            .await
        {
            Ok(detection) => Some(detection),
            Err(e) => {
                tracing::warn!(discussion_id = %discussion.id, error = %e, "task detection failed");
                None
            }
        };

        AiOutcome { summary, detection }
    }

    async fn create_tasks(
        &self,
        discussion: &Discussion,
        config: &SourceConfig,
        thread: &Thread,
        ai: &AiOutcome,
    ) -> Result<Vec<String>, ProcessorError> {
        let database_id = config.taskdb_database_id.as_deref().ok_or_else(|| {
            ProcessorError::TaskCreation("config has no task database id".to_string())
        })?;

        let client = self.taskdb_client(config)?;
        let mapping = config.field_mapping();

        let participants: Vec<String> =
            serde_json::from_str(&discussion.participants).unwrap_or_default();
        let summary_text = ai.summary.as_ref().map(|s| s.summary.clone());

        let base = |title: &str, description: &str| TaskRecord {
            source_url: discussion.source_url.clone(),
            ai_summary: summary_text.clone(),
            author: Some(discussion.author.clone()),
            participants: participants.clone(),
            ..TaskRecord::new(title, description)
        };

        let records: Vec<TaskRecord> = match ai.detection.as_ref() {
            Some(detection) if detection.is_multi_task && detection.tasks.len() >= 2 => detection
                .tasks
                .iter()
                .map(|task| TaskRecord {
                    priority: Some(task.priority),
                    ..base(&task.title, &task.description)
                })
                .collect(),
            Some(detection) => {
                // Single detected task enriches the one row.
                let task = detection.tasks.first();
                vec![TaskRecord {
                    priority: task.map(|t| t.priority),
                    ..base(
                        &discussion.title,
                        task.map_or(thread.root.content.as_str(), |t| t.description.as_str()),
                    )
                }]
            }
            None => vec![base(&discussion.title, &thread.root.content)],
        };

        client
            .create_tasks(database_id, &records, &mapping)
            .await
            .map_err(|e| ProcessorError::TaskCreation(e.to_string()))
    }

    /// Post the confirmation reply and the completed status gesture.
    /// Both are best-effort; failures are logged and the job completes.
    async fn notify(
        &self,
        discussion: &Discussion,
        config: &SourceConfig,
        adapter: &dyn SourceAdapter,
        page_ids: &[String],
    ) {
        let message = confirmation_message(page_ids);

        if let Err(e) = adapter
            .post_reply(&discussion.source_thread_id, &message, config)
            .await
        {
            tracing::warn!(discussion_id = %discussion.id, error = %e, "confirmation reply failed");
        }

        if let Err(e) = adapter
            .update_status(
                &discussion.source_thread_id,
                DiscussionStatus::Completed,
                config,
            )
            .await
        {
            tracing::warn!(discussion_id = %discussion.id, error = %e, "status update failed");
        }
    }

    async fn enter_stage(
        &self,
        discussion: &Discussion,
        job_id: &str,
        stage: JobStage,
    ) -> Result<(), ProcessorError> {
        sync_jobs::update_stage(&self.db, job_id, &discussion.tenant_id, stage.as_str()).await?;
        tracing::debug!(job_id, stage = stage.as_str(), "stage entered");
        Ok(())
    }

    /// Build an LLM client; failures here only ever degrade `ai_analysis`.
    fn llm_client(&self, config: &SourceConfig) -> Result<LlmClient, String> {
        let key = self
            .credential(config.llm_key.as_deref(), self.settings.llm_api_key.as_deref())
            .ok_or_else(|| "no LLM key available".to_string())?;

        let client = match &self.llm_base {
            Some(base) => LlmClient::with_base_url(&key, base.clone()),
            None => LlmClient::new(&key),
        };
        client.map_err(|e| e.to_string())
    }

    fn taskdb_client(&self, config: &SourceConfig) -> Result<TaskDbClient, ProcessorError> {
        let token = self
            .credential(
                config.taskdb_token.as_deref(),
                self.settings.taskdb_api_key.as_deref(),
            )
            .ok_or_else(|| {
                ProcessorError::TaskCreation("no task DB token available".to_string())
            })?;

        let client = match &self.taskdb_base {
            Some(base) => TaskDbClient::with_base_url(&token, base.clone()),
            None => TaskDbClient::new(&token),
        };
        client.map_err(|e| ProcessorError::TaskCreation(e.to_string()))
    }

    /// Resolve a credential: the config's encrypted value when present
    /// (decrypted with the master key), else the process-wide fallback.
    fn credential(&self, stored: Option<&str>, fallback: Option<&str>) -> Option<String> {
        match stored.filter(|s| !s.is_empty()) {
            Some(stored) if crypto::is_encrypted(stored) => {
                let master_key = self.settings.master_key().ok()?;
                crypto::decrypt_secret(stored, master_key).ok()
            }
            Some(stored) => Some(stored.to_string()),
            None => fallback.map(String::from),
        }
    }
}

fn discussion_file_name(discussion: &Discussion) -> Option<String> {
    let metadata: std::collections::BTreeMap<String, String> =
        serde_json::from_str(&discussion.metadata).unwrap_or_default();
    metadata.get("file_name").cloned()
}

/// Short confirmation text linking up to three created pages.
fn confirmation_message(page_ids: &[String]) -> String {
    let count = page_ids.len();
    let noun = if count == 1 { "task" } else { "tasks" };
    let shown: Vec<&str> = page_ids.iter().take(MAX_LINKED_PAGES).map(String::as_str).collect();

    let mut message = format!("Created {count} {noun}: {}", shown.join(", "));
    if count > MAX_LINKED_PAGES {
        message.push_str(&format!(" (+{} more)", count - MAX_LINKED_PAGES));
    }
    message
}

fn is_retryable(error: &ProcessorError) -> bool {
    !matches!(
        error,
        ProcessorError::DiscussionNotFound(_)
            | ProcessorError::ConfigNotFound(_)
            | ProcessorError::ConfigTenantMismatch { .. }
            | ProcessorError::ConfigInactive(_)
    )
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests;

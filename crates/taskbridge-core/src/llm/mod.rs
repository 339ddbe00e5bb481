//! LLM enrichment client: thread summaries and task detection.
//!
//! Both operations are cached (summaries by the ordered message ids of the
//! thread, detections by the comment text) and run through the shared
//! resilience stack. Task detection never surfaces a parse error to the
//! pipeline; a malformed model response degrades to a single task built
//! from the original comment.

pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::LlmError;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError, RateLimiter, TtlCache};
use crate::source::Thread;

use provider::MessagesProvider;

/// Maximum detected-task title length.
const MAX_TITLE_LEN: usize = 50;

const CACHE_CAPACITY: usize = 200;
const CACHE_TTL: Duration = Duration::from_secs(3600);

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(10);

const SUMMARY_MAX_TOKENS: u32 = 1024;
const DETECTION_MAX_TOKENS: u32 = 1024;

/// Priority of a detected task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    /// Parse a model-supplied priority, coercing anything outside the enum
    /// to medium.
    pub fn coerce(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A task extracted from a discussion by the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectedTask {
    /// Stable id, generated when the model omits one.
    pub id: String,
    /// Short title, at most 50 characters.
    pub title: String,
    /// Full description.
    pub description: String,
    /// Coerced priority.
    pub priority: TaskPriority,
}

/// Result of `detect_tasks`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskDetection {
    /// Whether the comment asks for more than one distinct task.
    pub is_multi_task: bool,
    /// Detected tasks; never empty.
    pub tasks: Vec<DetectedTask>,
    /// The model's reading of the overall request.
    pub overall_context: String,
}

/// Result of `generate_summary`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThreadSummary {
    /// Short prose summary of the thread.
    pub summary: String,
    /// Key discussion points.
    pub key_points: Vec<String>,
    /// Suggested follow-up actions, when the model offers them.
    pub suggested_actions: Option<Vec<String>>,
    /// Whether this value came from the cache.
    pub cached: bool,
}

/// LLM client wrapping the Messages provider with caching and resilience.
pub struct LlmClient {
    provider: MessagesProvider,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    summary_cache: Arc<TtlCache<String, ThreadSummary>>,
    detection_cache: Arc<TtlCache<String, TaskDetection>>,
}

impl LlmClient {
    /// Create a client from a decrypted API key.
    ///
    /// Fails when the key is empty or an obvious placeholder.
    pub fn new(api_key: &str) -> Result<Self, LlmError> {
        if is_placeholder(api_key) {
            return Err(LlmError::InvalidCredential);
        }
        Ok(Self::build(MessagesProvider::new(api_key.to_string())))
    }

    /// Create a client against a custom base URL (for testing).
    pub fn with_base_url(api_key: &str, base_url: String) -> Result<Self, LlmError> {
        if is_placeholder(api_key) {
            return Err(LlmError::InvalidCredential);
        }
        Ok(Self::build(MessagesProvider::with_base_url(
            api_key.to_string(),
            base_url,
        )))
    }

    fn build(provider: MessagesProvider) -> Self {
        let summary_cache = Arc::new(TtlCache::new(CACHE_CAPACITY, CACHE_TTL));
        let detection_cache = Arc::new(TtlCache::new(CACHE_CAPACITY, CACHE_TTL));
        TtlCache::start_sweeper(&summary_cache);
        TtlCache::start_sweeper(&detection_cache);

        Self {
            provider,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            limiter: RateLimiter::new(5, 1.0),
            summary_cache,
            detection_cache,
        }
    }

    /// Summarise a thread.
    ///
    /// The cache key is a hash of the thread's ordered message ids; a hit
    /// returns the cached value with `cached = true`.
    pub async fn generate_summary(
        &self,
        thread: &Thread,
        file_name: Option<&str>,
        custom_prompt: Option<&str>,
    ) -> Result<ThreadSummary, LlmError> {
        let key = hash_parts(&thread.message_ids());
        if let Some(mut hit) = self.summary_cache.get(&key) {
            hit.cached = true;
            return Ok(hit);
        }

        let system = custom_prompt.unwrap_or(
            "You summarise team discussions. Respond with JSON: \
             {\"summary\": string, \"keyPoints\": [string], \"suggestedActions\": [string]}",
        );
        let user = render_thread(thread, file_name);

        let text = self.complete_guarded(system, &user, SUMMARY_MAX_TOKENS).await?;
        let summary = parse_summary(&text);

        self.summary_cache.set(key, summary.clone());
        Ok(summary)
    }

    /// Detect actionable tasks in a comment.
    ///
    /// Never fails on model output: malformed JSON or an empty task list
    /// degrade to a single task synthesised from the comment.
    pub async fn detect_tasks(
        &self,
        comment_text: &str,
        thread_context: Option<&str>,
        file_name: Option<&str>,
        custom_prompt: Option<&str>,
    ) -> Result<TaskDetection, LlmError> {
        let key = hash_parts(&[comment_text]);
        if let Some(hit) = self.detection_cache.get(&key) {
            return Ok(hit);
        }

        let system = custom_prompt.unwrap_or(
            "You extract actionable tasks from comments. Respond with JSON: \
             {\"isMultiTask\": bool, \"tasks\": [{\"id\": string, \"title\": string, \
             \"description\": string, \"priority\": \"low\"|\"medium\"|\"high\"}], \
             \"overallContext\": string}",
        );

        let mut user = String::new();
        if let Some(name) = file_name {
            user.push_str(&format!("File: {name}\n"));
        }
        if let Some(context) = thread_context {
            user.push_str(&format!("Thread context:\n{context}\n\n"));
        }
        user.push_str(&format!("Comment:\n{comment_text}"));

        let text = self
            .complete_guarded(system, &user, DETECTION_MAX_TOKENS)
            .await?;
        let detection = parse_detection(&text, comment_text);

        self.detection_cache.set(key, detection.clone());
        Ok(detection)
    }

    async fn complete_guarded(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        crate::resilience::retry_with_backoff(
            || async {
                self.breaker
                    .call(|| async {
                        self.limiter.acquire().await;
                        self.provider.complete(system, user, max_tokens).await
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitError::Open => {
                            LlmError::CircuitOpen("LLM upstream unavailable".to_string())
                        }
                        CircuitError::Inner(inner) => inner,
                    })
            },
            RETRY_ATTEMPTS,
            RETRY_BASE,
            RETRY_CAP,
        )
        .await
    }
}

/// Whether a credential is unusable (empty or an obvious placeholder).
fn is_placeholder(credential: &str) -> bool {
    let trimmed = credential.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("changeme")
        || trimmed.eq_ignore_ascii_case("placeholder")
        || trimmed.starts_with("your-")
}

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn render_thread(thread: &Thread, file_name: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(name) = file_name {
        out.push_str(&format!("File: {name}\n"));
    }
    out.push_str(&format!("{}: {}\n", thread.root.author, thread.root.content));
    for reply in &thread.replies {
        out.push_str(&format!("{}: {}\n", reply.author, reply.content));
    }
    out
}

/// Parse a summary response; on malformed JSON, use the raw text as the
/// summary rather than failing.
fn parse_summary(text: &str) -> ThreadSummary {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Raw {
        #[serde(default)]
        summary: String,
        #[serde(default)]
        key_points: Vec<String>,
        #[serde(default)]
        suggested_actions: Option<Vec<String>>,
    }

    match extract_json(text).and_then(|json| serde_json::from_str::<Raw>(&json).ok()) {
        Some(raw) => ThreadSummary {
            summary: raw.summary,
            key_points: raw.key_points,
            suggested_actions: raw.suggested_actions,
            cached: false,
        },
        None => ThreadSummary {
            summary: text.trim().to_string(),
            key_points: Vec::new(),
            suggested_actions: None,
            cached: false,
        },
    }
}

/// Parse a detection response with full degradation: malformed JSON or an
/// empty task list synthesise a single task from the original comment.
fn parse_detection(text: &str, comment_text: &str) -> TaskDetection {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawTask {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        priority: Option<String>,
    }

    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Raw {
        #[serde(default)]
        is_multi_task: bool,
        #[serde(default)]
        tasks: Vec<RawTask>,
        #[serde(default)]
        overall_context: String,
    }

    let parsed = extract_json(text).and_then(|json| serde_json::from_str::<Raw>(&json).ok());

    let Some(raw) = parsed else {
        return fallback_detection(comment_text);
    };

    let tasks: Vec<DetectedTask> = raw
        .tasks
        .into_iter()
        .map(|t| DetectedTask {
            id: t.id.filter(|id| !id.is_empty()).unwrap_or_else(new_task_id),
            title: truncate_title(if t.title.is_empty() {
                comment_text
            } else {
                &t.title
            }),
            description: if t.description.is_empty() {
                comment_text.to_string()
            } else {
                t.description
            },
            priority: TaskPriority::coerce(t.priority.as_deref().unwrap_or("medium")),
        })
        .collect();

    if tasks.is_empty() {
        return fallback_detection(comment_text);
    }

    TaskDetection {
        is_multi_task: raw.is_multi_task && tasks.len() >= 2,
        tasks,
        overall_context: raw.overall_context,
    }
}

fn fallback_detection(comment_text: &str) -> TaskDetection {
    TaskDetection {
        is_multi_task: false,
        tasks: vec![DetectedTask {
            id: new_task_id(),
            title: truncate_title(comment_text),
            description: comment_text.to_string(),
            priority: TaskPriority::Medium,
        }],
        overall_context: String::new(),
    }
}

fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn truncate_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= MAX_TITLE_LEN {
        line.to_string()
    } else {
        line.chars().take(MAX_TITLE_LEN).collect()
    }
}

/// Pull the JSON object out of a response that may wrap it in prose.
fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| trimmed[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ThreadMessage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn thread() -> Thread {
        Thread {
            id: "t1".to_string(),
            root: ThreadMessage {
                id: "m1".to_string(),
                author: "alice".to_string(),
                content: "the login page 500s".to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                attachments: vec![],
            },
            replies: vec![],
            participants: vec!["alice".to_string()],
            metadata: Default::default(),
        }
    }

    fn completion_body(text: &str) -> serde_json::Value {
        serde_json::json!({"content": [{"type": "text", "text": text}]})
    }

    async fn client(server: &MockServer) -> LlmClient {
        LlmClient::with_base_url("test-key", server.uri()).unwrap()
    }

    #[test]
    fn constructor_rejects_placeholder_credentials() {
        assert!(LlmClient::new("").is_err());
        assert!(LlmClient::new("  ").is_err());
        assert!(LlmClient::new("your-api-key").is_err());
        assert!(LlmClient::new("changeme").is_err());
        assert!(LlmClient::new("sk-ant-real-key").is_ok());
    }

    #[tokio::test]
    async fn summary_is_cached_by_message_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"summary":"login broken","keyPoints":["500 error"],"suggestedActions":["check logs"]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await;
        let first = client.generate_summary(&thread(), None, None).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.summary, "login broken");
        assert_eq!(first.key_points, vec!["500 error"]);

        let second = client.generate_summary(&thread(), None, None).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.summary, "login broken");
    }

    #[tokio::test]
    async fn unparseable_summary_uses_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("The thread is about a login outage.")),
            )
            .mount(&server)
            .await;

        let client = client(&server).await;
        let summary = client.generate_summary(&thread(), None, None).await.unwrap();
        assert_eq!(summary.summary, "The thread is about a login outage.");
        assert!(summary.key_points.is_empty());
    }

    #[tokio::test]
    async fn detect_tasks_parses_multi_task_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"isMultiTask":true,"tasks":[
                    {"title":"fix the header","description":"header overlaps","priority":"high"},
                    {"title":"update the footer","description":"footer is stale","priority":"urgent"}
                ],"overallContext":"two UI fixes"}"#,
            )))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let detection = client
            .detect_tasks("fix the header and update the footer", None, None, None)
            .await
            .unwrap();

        assert!(detection.is_multi_task);
        assert_eq!(detection.tasks.len(), 2);
        assert_eq!(detection.tasks[0].priority, TaskPriority::High);
        // "urgent" is outside the enum and coerces to medium.
        assert_eq!(detection.tasks[1].priority, TaskPriority::Medium);
        assert!(!detection.tasks[0].id.is_empty(), "missing ids are generated");
    }

    #[tokio::test]
    async fn unparseable_detection_falls_back_to_single_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body("no json here")),
            )
            .mount(&server)
            .await;

        let client = client(&server).await;
        let detection = client
            .detect_tasks("please fix the login flow", None, None, None)
            .await
            .unwrap();

        assert!(!detection.is_multi_task);
        assert_eq!(detection.tasks.len(), 1);
        assert_eq!(detection.tasks[0].description, "please fix the login flow");
    }

    #[tokio::test]
    async fn zero_tasks_synthesises_one_from_the_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"isMultiTask":false,"tasks":[],"overallContext":"nothing actionable"}"#,
            )))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let detection = client
            .detect_tasks("fix login", None, None, None)
            .await
            .unwrap();
        assert_eq!(detection.tasks.len(), 1);
        assert_eq!(detection.tasks[0].title, "fix login");
    }

    #[tokio::test]
    async fn detection_is_cached_by_comment_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"isMultiTask":false,"tasks":[{"title":"t","description":"d","priority":"low"}],"overallContext":""}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await;
        client.detect_tasks("same comment", None, None, None).await.unwrap();
        client.detect_tasks("same comment", None, None, None).await.unwrap();
    }

    #[test]
    fn titles_are_truncated_to_fifty_chars() {
        let long = "a".repeat(80);
        assert_eq!(truncate_title(&long).chars().count(), 50);
        assert_eq!(truncate_title("short"), "short");
    }

    #[test]
    fn json_is_extracted_from_surrounding_prose() {
        assert_eq!(
            extract_json("Here you go: {\"a\":1} hope that helps").as_deref(),
            Some("{\"a\":1}")
        );
        assert!(extract_json("no braces at all").is_none());
    }
}

//! Pipeline tests over an in-memory database, a stub adapter, and
//! wiremock upstreams.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::Settings;
use crate::source::registry::AdapterRegistry;
use crate::source::{
    AdapterError, ConfigValidation, DiscussionStatus, ParsedDiscussion, SourceAdapter, Thread,
    ThreadMessage,
};
use crate::storage::discussions::{self, NewDiscussion};
use crate::storage::source_configs::{self, SourceConfig};
use crate::storage::{init_test_db, now_iso, sync_jobs, DbPool};

use super::{confirmation_message, JobStage, Processor, ProcessorError};

/// What the stub adapter records and how it behaves.
#[derive(Default, Debug)]
struct StubState {
    fail_fetch: bool,
    fail_reply: bool,
    replies: Vec<String>,
    status_updates: Vec<&'static str>,
}

#[derive(Clone, Debug)]
struct StubAdapter {
    state: Arc<Mutex<StubState>>,
}

impl StubAdapter {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState::default())),
        }
    }

    fn thread() -> Thread {
        Thread {
            id: "1.1".to_string(),
            root: ThreadMessage {
                id: "1.1".to_string(),
                author: "U1".to_string(),
                content: "fix login".to_string(),
                timestamp: "1.1".to_string(),
                attachments: vec![],
            },
            replies: vec![],
            participants: vec!["U1".to_string()],
            metadata: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn source_type(&self) -> &str {
        "chat_mention"
    }

    fn parse_incoming(&self, _: &serde_json::Value) -> Result<ParsedDiscussion, AdapterError> {
        unimplemented!("the processor never parses")
    }

    async fn fetch_thread(&self, _: &str, _: &SourceConfig) -> Result<Thread, AdapterError> {
        if self.state.lock().unwrap().fail_fetch {
            return Err(AdapterError::Upstream("thread fetch boom".to_string()));
        }
        Ok(Self::thread())
    }

    async fn post_reply(
        &self,
        _: &str,
        message: &str,
        _: &SourceConfig,
    ) -> Result<bool, AdapterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reply {
            return Err(AdapterError::Upstream("reply boom".to_string()));
        }
        state.replies.push(message.to_string());
        Ok(true)
    }

    async fn update_status(
        &self,
        _: &str,
        status: DiscussionStatus,
        _: &SourceConfig,
    ) -> Result<bool, AdapterError> {
        self.state.lock().unwrap().status_updates.push(status.as_str());
        Ok(true)
    }

    fn validate_config(&self, _: &SourceConfig) -> ConfigValidation {
        ConfigValidation::ok()
    }

    async fn test_connection(&self, _: &SourceConfig) -> bool {
        true
    }
}

struct Fixture {
    pool: DbPool,
    processor: Processor,
    stub: StubAdapter,
}

async fn fixture(taskdb: &MockServer, llm: Option<&MockServer>, config: SourceConfig) -> Fixture {
    let pool = init_test_db().await.unwrap();
    source_configs::insert_source_config(&pool, &config).await.unwrap();

    let stub = StubAdapter::new();
    let mut registry = AdapterRegistry::new();
    let stub_for_registry = stub.clone();
    registry.register("chat_mention", move || Box::new(stub_for_registry.clone()));

    let mut processor = Processor::new(pool.clone(), Settings::default(), Arc::new(registry))
        .with_taskdb_base(taskdb.uri())
        .with_retry_policy(3, Duration::from_millis(10), Duration::from_millis(50));
    if let Some(llm) = llm {
        processor = processor.with_llm_base(llm.uri());
    }

    Fixture {
        pool,
        processor,
        stub,
    }
}

fn config(ai_enabled: bool) -> SourceConfig {
    let now = now_iso();
    SourceConfig {
        id: "cfg-1".to_string(),
        tenant_id: "T1".to_string(),
        source_type: "chat_mention".to_string(),
        display_name: "chat config".to_string(),
        api_token: Some("xoxb-token".to_string()),
        taskdb_token: Some("ntn-token".to_string()),
        taskdb_database_id: Some("db-1".to_string()),
        field_mapping: r#"{"source_url":"Source"}"#.to_string(),
        llm_key: Some("sk-llm-key".to_string()),
        ai_enabled,
        auto_sync: true,
        post_confirmation: true,
        active: true,
        metadata: r#"{"workspace_id":"T1","channel_id":"C1"}"#.to_string(),
        created_at: now.clone(),
        updated_at: now,
    }
}

async fn insert_discussion(pool: &DbPool, id: &str) {
    discussions::insert_discussion(
        pool,
        &NewDiscussion {
            id: id.to_string(),
            tenant_id: "T1".to_string(),
            owner: "owner-1".to_string(),
            source_type: "chat_mention".to_string(),
            source_thread_id: "1.1".to_string(),
            source_url: Some("https://chat.example.com/archives/C1/p11".to_string()),
            source_config_id: "cfg-1".to_string(),
            title: "fix login".to_string(),
            content: "fix login".to_string(),
            author: "U1".to_string(),
            participants: r#"["U1"]"#.to_string(),
            raw_payload: "{}".to_string(),
            metadata: "{}".to_string(),
        },
    )
    .await
    .unwrap();
}

fn page_created_mock(page_id: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/pages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"id": page_id})),
        )
}

#[tokio::test]
async fn happy_path_creates_one_task_and_notifies() {
    let taskdb = MockServer::start().await;
    page_created_mock("P1").mount(&taskdb).await;

    let f = fixture(&taskdb, None, config(false)).await;
    insert_discussion(&f.pool, "d1").await;

    let outcome = f.processor.process("d1").await.unwrap();
    assert_eq!(outcome.page_ids, vec!["P1"]);

    let job = sync_jobs::get_sync_job(&f.pool, &outcome.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, "completed");
    assert_eq!(job.stage, "completed");
    assert_eq!(job.task_id_list(), vec!["P1"]);
    assert!(job.processing_time_ms.is_some());

    let discussion = discussions::get_discussion(&f.pool, "d1").await.unwrap().unwrap();
    assert_eq!(discussion.status, "completed");
    assert!(discussion.processed_at.is_some(), "stamped on success");
    assert!(discussion.thread_json.is_some(), "thread snapshot persisted");
    assert_eq!(discussion.job_id.as_deref(), Some(outcome.job_id.as_str()));

    let state = f.stub.state.lock().unwrap();
    assert_eq!(state.replies.len(), 1);
    assert!(state.replies[0].contains("P1"));
    assert_eq!(state.status_updates, vec!["completed"]);
}

#[tokio::test]
async fn ai_failure_degrades_and_the_task_is_still_created() {
    let taskdb = MockServer::start().await;
    page_created_mock("P1").mount(&taskdb).await;

    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&llm)
        .await;

    let f = fixture(&taskdb, Some(&llm), config(true)).await;
    insert_discussion(&f.pool, "d1").await;

    let outcome = f.processor.process("d1").await.unwrap();
    assert_eq!(outcome.page_ids, vec!["P1"]);

    let job = sync_jobs::get_sync_job(&f.pool, &outcome.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, "completed", "AI failure never fails the job");
}

#[tokio::test]
async fn multi_task_detection_creates_pages_in_order() {
    let taskdb = MockServer::start().await;
    page_created_mock("P1").up_to_n_times(1).mount(&taskdb).await;
    page_created_mock("P2").mount(&taskdb).await;

    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text":
                "{\"isMultiTask\":true,\"tasks\":[\
                 {\"title\":\"fix the header\",\"description\":\"header\",\"priority\":\"high\"},\
                 {\"title\":\"update the footer\",\"description\":\"footer\",\"priority\":\"low\"}],\
                 \"overallContext\":\"two fixes\"}"}]
        })))
        .mount(&llm)
        .await;

    let f = fixture(&taskdb, Some(&llm), config(true)).await;
    insert_discussion(&f.pool, "d1").await;

    let outcome = f.processor.process("d1").await.unwrap();
    assert_eq!(outcome.page_ids, vec!["P1", "P2"]);

    let state = f.stub.state.lock().unwrap();
    assert!(state.replies[0].contains("P1") && state.replies[0].contains("P2"));
}

#[tokio::test]
async fn inactive_config_is_a_distinct_terminal_error() {
    let taskdb = MockServer::start().await;
    let mut cfg = config(false);
    cfg.active = false;

    let f = fixture(&taskdb, None, cfg).await;
    insert_discussion(&f.pool, "d1").await;

    let err = f.processor.process("d1").await.unwrap_err();
    assert!(matches!(err, ProcessorError::ConfigInactive(_)));

    let jobs = sync_jobs::list_jobs_for_discussion(&f.pool, "d1").await.unwrap();
    assert_eq!(jobs[0].status, "failed");
    assert_eq!(jobs[0].stage, "config_loading");

    let discussion = discussions::get_discussion(&f.pool, "d1").await.unwrap().unwrap();
    assert_eq!(discussion.status, "failed");
    assert!(discussion.processed_at.is_none());
}

#[tokio::test]
async fn tenant_mismatch_is_a_distinct_terminal_error() {
    let taskdb = MockServer::start().await;
    let mut cfg = config(false);
    cfg.tenant_id = "OTHER".to_string();
    // The config row exists under another tenant; scope the discussion's
    // tenant to T1 as usual.
    let pool = init_test_db().await.unwrap();
    source_configs::insert_source_config(&pool, &cfg).await.unwrap();
    insert_discussion(&pool, "d1").await;

    let stub = StubAdapter::new();
    let mut registry = AdapterRegistry::new();
    let stub_for_registry = stub.clone();
    registry.register("chat_mention", move || Box::new(stub_for_registry.clone()));

    let processor = Processor::new(pool.clone(), Settings::default(), Arc::new(registry))
        .with_taskdb_base(taskdb.uri());

    let err = processor.process("d1").await.unwrap_err();
    assert!(matches!(err, ProcessorError::ConfigTenantMismatch { .. }));
}

#[tokio::test]
async fn missing_config_is_a_distinct_terminal_error() {
    let taskdb = MockServer::start().await;
    let f = fixture(&taskdb, None, config(false)).await;

    // Discussion points at a config id that does not exist.
    discussions::insert_discussion(
        &f.pool,
        &NewDiscussion {
            source_config_id: "cfg-ghost".to_string(),
            ..sample_discussion("d2")
        },
    )
    .await
    .unwrap();

    let err = f.processor.process("d2").await.unwrap_err();
    assert!(matches!(err, ProcessorError::ConfigNotFound(_)));
}

#[tokio::test]
async fn thread_build_failure_fails_the_job() {
    let taskdb = MockServer::start().await;
    let f = fixture(&taskdb, None, config(false)).await;
    insert_discussion(&f.pool, "d1").await;
    f.stub.state.lock().unwrap().fail_fetch = true;

    let err = f.processor.process("d1").await.unwrap_err();
    assert!(matches!(err, ProcessorError::ThreadBuild(_)));

    let jobs = sync_jobs::list_jobs_for_discussion(&f.pool, "d1").await.unwrap();
    assert_eq!(jobs[0].status, "failed");
    assert_eq!(jobs[0].stage, "thread_building");
    assert!(jobs[0].error_message.as_deref().unwrap().contains("thread fetch boom"));
}

#[tokio::test]
async fn notification_failure_still_completes_the_job() {
    let taskdb = MockServer::start().await;
    page_created_mock("P1").mount(&taskdb).await;

    let f = fixture(&taskdb, None, config(false)).await;
    insert_discussion(&f.pool, "d1").await;
    f.stub.state.lock().unwrap().fail_reply = true;

    let outcome = f.processor.process("d1").await.unwrap();
    let job = sync_jobs::get_sync_job(&f.pool, &outcome.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, "completed");
}

#[tokio::test]
async fn notification_is_skipped_when_confirmation_is_off() {
    let taskdb = MockServer::start().await;
    page_created_mock("P1").mount(&taskdb).await;

    let mut cfg = config(false);
    cfg.post_confirmation = false;
    let f = fixture(&taskdb, None, cfg).await;
    insert_discussion(&f.pool, "d1").await;

    f.processor.process("d1").await.unwrap();
    let state = f.stub.state.lock().unwrap();
    assert!(state.replies.is_empty());
    assert!(state.status_updates.is_empty());
}

#[tokio::test]
async fn retry_creates_a_job_per_attempt_and_reports_exhaustion() {
    let taskdb = MockServer::start().await;
    let f = fixture(&taskdb, None, config(false)).await;
    insert_discussion(&f.pool, "d1").await;
    f.stub.state.lock().unwrap().fail_fetch = true;

    let err = f.processor.process_with_retry("d1").await.unwrap_err();
    match err {
        ProcessorError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected RetriesExhausted, got: {other}"),
    }

    let jobs = sync_jobs::list_jobs_for_discussion(&f.pool, "d1").await.unwrap();
    assert_eq!(jobs.len(), 3, "one job row per attempt");
    assert!(jobs.iter().all(|j| j.status == "failed"));
}

#[tokio::test]
async fn terminal_errors_are_not_retried() {
    let taskdb = MockServer::start().await;
    let mut cfg = config(false);
    cfg.active = false;

    let f = fixture(&taskdb, None, cfg).await;
    insert_discussion(&f.pool, "d1").await;

    let err = f.processor.process_with_retry("d1").await.unwrap_err();
    assert!(matches!(err, ProcessorError::ConfigInactive(_)));

    let jobs = sync_jobs::list_jobs_for_discussion(&f.pool, "d1").await.unwrap();
    assert_eq!(jobs.len(), 1, "no retry for terminal errors");
}

#[test]
fn stage_sequence_is_strictly_ordered() {
    let sequence = JobStage::sequence();
    for window in sequence.windows(2) {
        assert!(window[0].order() < window[1].order());
    }
    assert_eq!(sequence[0], JobStage::Pending);
    assert_eq!(sequence[sequence.len() - 1], JobStage::Completed);
}

#[test]
fn confirmation_links_at_most_three_pages() {
    assert_eq!(confirmation_message(&[p("P1")]), "Created 1 task: P1");
    assert_eq!(
        confirmation_message(&[p("P1"), p("P2")]),
        "Created 2 tasks: P1, P2"
    );
    assert_eq!(
        confirmation_message(&[p("P1"), p("P2"), p("P3"), p("P4")]),
        "Created 4 tasks: P1, P2, P3 (+1 more)"
    );
}

fn p(id: &str) -> String {
    id.to_string()
}

fn sample_discussion(id: &str) -> NewDiscussion {
    NewDiscussion {
        id: id.to_string(),
        tenant_id: "T1".to_string(),
        owner: "owner-1".to_string(),
        source_type: "chat_mention".to_string(),
        source_thread_id: "1.1".to_string(),
        source_url: None,
        source_config_id: "cfg-1".to_string(),
        title: "fix login".to_string(),
        content: "fix login".to_string(),
        author: "U1".to_string(),
        participants: r#"["U1"]"#.to_string(),
        raw_payload: "{}".to_string(),
        metadata: "{}".to_string(),
    }
}

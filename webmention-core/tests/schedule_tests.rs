// Tests for due-work scheduling

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use webmention_core::host::Host;
use webmention_core::model::{MentionStatus, PostStatus, SENT_MARKER_KEY, TaskKind};
use webmention_core::{Config, Database, DeliveryOutcome, IntakeRequest, MentionService};
use webmention_scanner::HttpConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    Config {
        site_url: "https://blog.example".to_string(),
        process_interval_secs: 3600,
        http: HttpConfig {
            allow_private_hosts: true,
            ..HttpConfig::default()
        },
        ..Config::default()
    }
}

fn create_service() -> (TempDir, Arc<Database>, MentionService<Database>) {
    let config = test_config();
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(Database::new(&temp_dir.path().join("test.db"), &config).unwrap());
    let service = MentionService::new(db.clone(), config).unwrap();
    (temp_dir, db, service)
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_activate_is_idempotent() {
    let (_temp_dir, db, service) = create_service();

    service.activate(start_time()).unwrap();
    service.activate(start_time() + Duration::minutes(5)).unwrap();

    let tasks = db.tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::ProcessMentions);
    assert_eq!(tasks[0].interval_secs, Some(3600));
    assert_eq!(tasks[0].due_at, start_time());
}

#[test]
fn test_deactivate_removes_only_the_processor() {
    let (_temp_dir, db, service) = create_service();
    service.activate(start_time()).unwrap();
    db.schedule_task(
        TaskKind::SendWebmentions,
        Some(1),
        start_time() + Duration::minutes(3),
        None,
    )
    .unwrap();

    assert!(service.deactivate().unwrap());
    assert!(!service.deactivate().unwrap());

    let tasks = db.tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::SendWebmentions);

    service.activate(start_time()).unwrap();
    assert_eq!(db.tasks().unwrap().len(), 2);
}

#[tokio::test]
async fn test_nothing_due() {
    let (_temp_dir, db, service) = create_service();
    db.schedule_task(
        TaskKind::SendWebmentions,
        Some(1),
        start_time() + Duration::minutes(10),
        None,
    )
    .unwrap();

    let report = service.run_due_work(start_time()).await.unwrap();
    assert_eq!(report.tasks_run, 0);
    assert_eq!(db.tasks().unwrap().len(), 1);
}

#[tokio::test]
async fn test_recurring_processor_runs_and_reschedules() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reply"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<p><a href="https://blog.example/hello/">hi</a></p>"#),
        )
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service();
    let post_id = db.insert_post("post", "hello", "Hello", "").unwrap();
    db.set_post_status(post_id, PostStatus::Published).unwrap();
    let id = service
        .receive(&IntakeRequest::new(
            format!("{}/reply", mock_server.uri()),
            "https://blog.example/hello/",
        ))
        .unwrap();

    service.activate(start_time()).unwrap();
    let report = service.run_due_work(start_time()).await.unwrap();

    assert_eq!(report.tasks_run, 1);
    assert_eq!(report.processed.complete, 1);
    assert_eq!(db.mention(id).unwrap().unwrap().status, MentionStatus::Complete);

    let tasks = db.tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].due_at, start_time() + Duration::hours(1));
}

#[tokio::test]
async fn test_send_task_runs_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/target"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("link", r#"</wm>; rel="webmention""#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wm"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service();
    let content = format!(r#"<a href="{}/target">x</a>"#, mock_server.uri());
    let post_id = db.insert_post("post", "hello", "Hello", &content).unwrap();
    db.set_post_status(post_id, PostStatus::Published).unwrap();

    let post = db.post(post_id).unwrap().unwrap();
    let due = service.schedule_on_publish(&post, start_time()).unwrap().unwrap();

    let report = service.run_due_work(due).await.unwrap();
    assert_eq!(report.tasks_run, 1);
    assert!(matches!(
        &report.deliveries[..],
        [DeliveryOutcome::Sent { status: 202, .. }]
    ));
    assert!(db.tasks().unwrap().is_empty());

    let report = service.run_due_work(due + Duration::hours(1)).await.unwrap();
    assert_eq!(report.tasks_run, 0);
}

#[tokio::test]
async fn test_every_failed_target_is_retried() {
    let mock_server = MockServer::start().await;
    for target in ["/a", "/b"] {
        Mock::given(method("HEAD"))
            .and(path(target))
            .respond_with(
                ResponseTemplate::new(200).insert_header("link", r#"</wm>; rel="webmention""#),
            )
            .mount(&mock_server)
            .await;
    }
    // first delivery to each target fails, later ones succeed
    Mock::given(method("POST"))
        .and(path("/wm"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wm"))
        .respond_with(ResponseTemplate::new(202))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service();
    let content = format!(
        r#"<a href="{0}/a">a</a> <a href="{0}/b">b</a>"#,
        mock_server.uri()
    );
    let post_id = db.insert_post("post", "hello", "Hello", &content).unwrap();
    db.set_post_status(post_id, PostStatus::Published).unwrap();

    let outcomes = service.send_webmentions(post_id, start_time()).await.unwrap();
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, DeliveryOutcome::Failed { retries: 1, .. }))
    );

    let send_task = || {
        db.tasks()
            .unwrap()
            .into_iter()
            .find(|t| t.kind == TaskKind::SendWebmentions)
    };

    // each run leaves a task for whatever is still pending
    let mut runs = 0;
    while let Some(task) = send_task() {
        runs += 1;
        assert!(runs <= 2, "retries kept rescheduling");

        let report = service.run_due_work(task.due_at).await.unwrap();
        for outcome in &report.deliveries {
            if let DeliveryOutcome::NotDue {
                next_attempt_at, ..
            } = outcome
            {
                assert_eq!(send_task().map(|t| t.due_at), Some(*next_attempt_at));
            }
        }
    }

    let log = service.outbound_log(post_id).unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.values().all(|a| a.is_sent() && a.retries == 1));
    assert!(db.get_meta(post_id, SENT_MARKER_KEY).unwrap().is_some());
}

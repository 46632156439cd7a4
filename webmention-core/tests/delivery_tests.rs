// Tests for outbound delivery and publish scheduling

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use webmention_core::delivery::MAX_RETRIES;
use webmention_core::host::Host;
use webmention_core::model::{PostStatus, SENT_MARKER_KEY, TaskKind};
use webmention_core::{Config, Database, DeliveryOutcome, MentionService};
use webmention_scanner::HttpConfig;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    Config {
        site_url: "https://blog.example".to_string(),
        http: HttpConfig {
            allow_private_hosts: true,
            ..HttpConfig::default()
        },
        ..Config::default()
    }
}

fn create_service(config: Config) -> (TempDir, Arc<Database>, MentionService<Database>) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(Database::new(&temp_dir.path().join("test.db"), &config).unwrap());
    let service = MentionService::new(db.clone(), config).unwrap();
    (temp_dir, db, service)
}

fn publish(db: &Database, slug: &str, content: &str) -> i64 {
    let id = db.insert_post("post", slug, "Title", content).unwrap();
    db.set_post_status(id, PostStatus::Published).unwrap();
    id
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

async fn advertise_endpoint(server: &MockServer, target_path: &str, head_calls: u64) {
    Mock::given(method("HEAD"))
        .and(path(target_path))
        .respond_with(
            ResponseTemplate::new(200).insert_header("link", r#"</wm>; rel="webmention""#),
        )
        .expect(head_calls)
        .mount(server)
        .await;
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_sent_endpoint_is_not_notified_again() {
    let mock_server = MockServer::start().await;
    advertise_endpoint(&mock_server, "/target", 1).await;
    Mock::given(method("POST"))
        .and(path("/wm"))
        .and(body_string_contains("source=https%3A%2F%2Fblog.example%2Fhello%2F"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service(test_config());
    let target = format!("{}/target", mock_server.uri());
    let post_id = publish(&db, "hello", &format!(r#"<p><a href="{}">x</a></p>"#, target));

    let outcomes = service.send_webmentions(post_id, start_time()).await.unwrap();
    assert_eq!(
        outcomes,
        vec![DeliveryOutcome::Sent {
            target: target.clone(),
            endpoint: format!("{}/wm", mock_server.uri()),
            status: 202,
        }]
    );

    let log = service.outbound_log(post_id).unwrap();
    assert_eq!(log[&target].sent_at, Some(start_time()));

    // second trigger makes no requests
    let later = start_time() + Duration::hours(1);
    let outcomes = service.send_webmentions(post_id, later).await.unwrap();
    assert_eq!(outcomes, vec![DeliveryOutcome::AlreadySent { target }]);

    assert!(db.get_meta(post_id, SENT_MARKER_KEY).unwrap().is_some());
}

#[tokio::test]
async fn test_abandoned_after_three_failures() {
    let mock_server = MockServer::start().await;
    advertise_endpoint(&mock_server, "/target", 3).await;
    Mock::given(method("POST"))
        .and(path("/wm"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service(test_config());
    let target = format!("{}/target", mock_server.uri());
    let post_id = publish(&db, "hello", &format!(r#"<a href="{}">x</a>"#, target));

    // retries are due at most 15 minutes out
    for run in 0..3 {
        let now = start_time() + Duration::minutes(20 * run);
        let outcomes = service.send_webmentions(post_id, now).await.unwrap();
        assert!(
            matches!(
                &outcomes[..],
                [DeliveryOutcome::Failed { retries, .. }] if *retries == run as u32 + 1
            ),
            "{:?}",
            outcomes
        );
    }

    let now = start_time() + Duration::minutes(60);
    let outcomes = service.send_webmentions(post_id, now).await.unwrap();
    assert_eq!(
        outcomes,
        vec![DeliveryOutcome::Abandoned {
            target: target.clone(),
            retries: MAX_RETRIES,
        }]
    );

    let log = service.outbound_log(post_id).unwrap();
    assert_eq!(log[&target].retries, 3);
    assert!(log[&target].sent_at.is_none());
    assert!(log[&target].is_abandoned());
}

#[tokio::test]
async fn test_failed_send_schedules_retry() {
    let mock_server = MockServer::start().await;
    advertise_endpoint(&mock_server, "/target", 1).await;
    Mock::given(method("POST"))
        .and(path("/wm"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service(test_config());
    let target = format!("{}/target", mock_server.uri());
    let post_id = publish(&db, "hello", &format!(r#"<a href="{}">x</a>"#, target));

    let now = start_time();
    service.send_webmentions(post_id, now).await.unwrap();

    let log = service.outbound_log(post_id).unwrap();
    let next = log[&target].next_attempt_at.unwrap();
    assert!(next >= now + Duration::minutes(5) && next <= now + Duration::minutes(15));

    let tasks = db.tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::SendWebmentions);
    assert_eq!(tasks[0].post_id, Some(post_id));
    assert_eq!(tasks[0].due_at, next);

    // an early trigger leaves the attempt alone
    let outcomes = service
        .send_webmentions(post_id, now + Duration::minutes(1))
        .await
        .unwrap();
    assert!(matches!(&outcomes[..], [DeliveryOutcome::NotDue { .. }]));
    assert!(db.get_meta(post_id, SENT_MARKER_KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_target_without_endpoint() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>no endpoint</p>"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service(test_config());
    let target = format!("{}/plain", mock_server.uri());
    let post_id = publish(&db, "hello", &format!(r#"<a href="{}">x</a>"#, target));

    let outcomes = service.send_webmentions(post_id, start_time()).await.unwrap();
    assert_eq!(outcomes, vec![DeliveryOutcome::NoEndpoint { target }]);
    assert!(service.outbound_log(post_id).unwrap().is_empty());
    assert!(db.get_meta(post_id, SENT_MARKER_KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_two_targets_sharing_an_endpoint() {
    let mock_server = MockServer::start().await;
    advertise_endpoint(&mock_server, "/a", 1).await;
    advertise_endpoint(&mock_server, "/b", 1).await;
    Mock::given(method("POST"))
        .and(path("/wm"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (_temp_dir, db, service) = create_service(test_config());
    let content = format!(
        r#"<a href="{0}/a">a</a> <a href="{0}/b">b</a> <a href="{0}/a">a again</a> <a href="/local">local</a>"#,
        mock_server.uri()
    );
    let post_id = publish(&db, "hello", &content);

    let outcomes = service.send_webmentions(post_id, start_time()).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, DeliveryOutcome::Sent { status: 201, .. }))
    );
}

#[tokio::test]
async fn test_unpublished_post_sends_nothing() {
    let (_temp_dir, db, service) = create_service(test_config());
    let post_id = db
        .insert_post("post", "draft", "Draft", r#"<a href="https://b.example/">x</a>"#)
        .unwrap();

    assert!(service.send_webmentions(post_id, start_time()).await.unwrap().is_empty());
    assert!(service.send_webmentions(999, start_time()).await.unwrap().is_empty());
}

// ============================================================================
// Publish Scheduling Tests
// ============================================================================

#[test]
fn test_publish_schedules_delivery_with_jitter() {
    let (_temp_dir, db, service) = create_service(test_config());
    let post_id = publish(&db, "hello", r#"<a href="https://b.example/post">b</a>"#);
    let post = db.post(post_id).unwrap().unwrap();

    let now = start_time();
    let due = service.schedule_on_publish(&post, now).unwrap().unwrap();
    assert!(due >= now && due <= now + Duration::seconds(300));

    let tasks = db.tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].post_id, Some(post_id));
    assert_eq!(tasks[0].interval_secs, None);
}

#[test]
fn test_publish_skips_ineligible_posts() {
    let (_temp_dir, db, service) = create_service(test_config());
    let now = start_time();
    let links = r#"<a href="https://b.example/post">b</a>"#;

    let draft = db.insert_post("post", "draft", "Draft", links).unwrap();
    let page = db.insert_post("page", "about", "About", links).unwrap();
    db.set_post_status(page, PostStatus::Published).unwrap();
    let revision = db.insert_post("revision", "rev", "Rev", links).unwrap();
    db.set_post_status(revision, PostStatus::Published).unwrap();
    let autosave = publish(&db, "hello-autosave", links);
    let no_links = publish(&db, "quiet", "<p>no links</p>");
    let marked = publish(&db, "marked", links);
    db.set_meta(marked, SENT_MARKER_KEY, "2024-01-01T00:00:00Z").unwrap();

    for id in [draft, page, revision, autosave, no_links, marked] {
        let post = db.post(id).unwrap().unwrap();
        assert!(
            service.schedule_on_publish(&post, now).unwrap().is_none(),
            "{}",
            post.slug
        );
    }
    assert!(db.tasks().unwrap().is_empty());
}

#[test]
fn test_publish_respects_outgoing_switch() {
    let config = Config {
        outgoing_enabled: false,
        ..test_config()
    };
    let (_temp_dir, db, service) = create_service(config);
    let post_id = publish(&db, "hello", r#"<a href="https://b.example/post">b</a>"#);
    let post = db.post(post_id).unwrap().unwrap();

    assert!(service.schedule_on_publish(&post, start_time()).unwrap().is_none());
}

//! Integration tests for request/response correlation over a fake engine.

use std::time::Duration;

use yate_extmodule::wire::message::MessageResponse;
use yate_extmodule::{
    Client, ClientError, ClientOptions, InstallRequest, InstallResult, Result, Role, TypedMessage,
};

use super::test_helpers::{connect, connect_builder, message_id, round_trip};

// ── Connect and log ───────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_line_is_the_first_traffic() {
    let (_client, mut engine) =
        connect_builder(Client::builder(ClientOptions::default()), false).await;
    engine.expect("%%>connect:global").await;
}

#[tokio::test]
async fn connect_line_carries_channel_id_and_type() {
    let options = ClientOptions {
        role: Role::PlayRec,
        channel_id: Some("sip/12".to_owned()),
        channel_type: Some("audio".to_owned()),
        ..ClientOptions::default()
    };
    let (_client, mut engine) = connect_builder(Client::builder(options), false).await;
    engine.expect("%%>connect:playrec:sip/12:audio").await;
}

#[tokio::test]
async fn log_sends_unescaped_output_lines() {
    let (client, mut engine) = connect().await;

    client.log("Foo").await.unwrap();
    engine.expect("%%>output:Foo").await;

    client.log("a:b=c\nsecond line").await.unwrap();
    engine.expect("%%>output:a:b=c").await;
    engine.expect("%%>output:second line").await;
}

// ── setlocal ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_local_returns_engine_value() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("engine.cfgsuffix").await }
    });
    engine
        .reply(
            "%%>setlocal:engine.cfgsuffix:",
            "%%<setlocal:engine.cfgsuffix:.conf:true",
        )
        .await;

    assert_eq!(request.await.unwrap().unwrap(), ".conf");
}

#[tokio::test]
async fn set_local_reports_value_and_success() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.set_local("id", "test").await }
    });
    engine
        .reply("%%>setlocal:id:test", "%%<setlocal:id:test:true")
        .await;

    let setting = request.await.unwrap().unwrap();
    assert_eq!(setting.value, "test");
    assert!(setting.success);
}

#[tokio::test]
async fn set_local_escapes_name_and_value() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.set_local("a:b", "x=y%").await }
    });
    engine
        .reply("%%>setlocal:a%zb:x%}y%%", "%%<setlocal:a%zb:x%}y%%:false")
        .await;

    let setting = request.await.unwrap().unwrap();
    assert_eq!(setting.value, "x=y%");
    assert!(!setting.success);
}

// ── install / uninstall ───────────────────────────────────────────────────────

#[tokio::test]
async fn install_parses_priority_and_success() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.install(&InstallRequest::new("test")).await }
    });
    engine
        .reply("%%>install::test", "%%<install:100:test:true")
        .await;
    assert_eq!(
        request.await.unwrap().unwrap(),
        InstallResult {
            priority: 100,
            success: true
        }
    );

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.install(&InstallRequest::new("test")).await }
    });
    engine
        .reply("%%>install::test", "%%<install:100:test:false")
        .await;
    assert!(!request.await.unwrap().unwrap().success);
}

#[tokio::test]
async fn install_sends_priority_and_filter() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            let install = InstallRequest::new("call.route")
                .priority(50)
                .filter_value("called", "^99");
            client.install(&install).await
        }
    });
    engine
        .reply(
            "%%>install:50:call.route:called:^99",
            "%%<install:50:call.route:true",
        )
        .await;

    let result = request.await.unwrap().unwrap();
    assert_eq!(result.priority, 50);
    assert!(result.success);
}

#[tokio::test]
async fn uninstall_parses_priority_and_success() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.uninstall("test").await }
    });
    engine
        .reply("%%>uninstall:test", "%%<uninstall:100:test:true")
        .await;
    assert_eq!(
        request.await.unwrap().unwrap(),
        InstallResult {
            priority: 100,
            success: true
        }
    );
}

// ── watch / unwatch ───────────────────────────────────────────────────────────

#[tokio::test]
async fn watch_and_unwatch_report_success() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.watch("test").await }
    });
    engine.reply("%%>watch:test", "%%<watch:test:true").await;
    assert!(request.await.unwrap().unwrap());

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.unwatch("test").await }
    });
    engine.reply("%%>unwatch:test", "%%<unwatch:test:TRUE").await;
    assert!(request.await.unwrap().unwrap());
}

// ── message ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_message_round_trip() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_message("zwerg.on", "ok", &[("caller".to_owned(), "a=b".to_owned())])
                .await
        }
    });

    let line = engine.next_line().await;
    let id = message_id(&line);
    let fields: Vec<&str> = line.split(':').collect();
    assert_eq!(fields.len(), 6, "unexpected request shape: {line}");
    assert!(fields[2].parse::<i64>().is_ok(), "time must be unix seconds: {line}");
    assert_eq!(fields[3], "zwerg.on");
    assert_eq!(fields[4], "ok");
    assert_eq!(fields[5], "caller=a%}b");

    engine
        .send(&format!("%%<message:{id}:true:zwerg.on:ok:reason=done%Jnow"))
        .await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.id, id);
    assert!(response.handled);
    assert_eq!(response.name, "zwerg.on");
    assert_eq!(response.result, "ok");
    assert_eq!(
        response.parameters,
        vec![("reason".to_owned(), "done\nnow".to_owned())]
    );
    assert_eq!(response.parameter("reason"), Some("done\nnow"));
}

struct EngineVersion;

impl TypedMessage for EngineVersion {
    type Output = String;

    fn name(&self) -> &str {
        "engine.version"
    }

    fn parse_response(&self, response: MessageResponse) -> Result<String> {
        response
            .parameter("version")
            .map(str::to_owned)
            .ok_or_else(|| ClientError::Decode("version missing".into()))
    }
}

#[tokio::test]
async fn send_typed_parses_answer() {
    let (client, mut engine) = connect().await;

    let request = tokio::spawn({
        let client = client.clone();
        async move { client.send_typed(&EngineVersion).await }
    });

    let line = engine.next_line().await;
    let id = message_id(&line);
    assert!(line.ends_with(":engine.version:"), "unexpected request: {line}");
    engine
        .send(&format!("%%<message:{id}:true:engine.version::version=6.4.0"))
        .await;

    assert_eq!(request.await.unwrap().unwrap(), "6.4.0");
}

// ── Correlation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn requests_complete_in_answer_order() {
    let (client, mut engine) = connect().await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("first").await }
    });
    engine.expect("%%>setlocal:first:").await;
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("second").await }
    });
    engine.expect("%%>setlocal:second:").await;
    assert_eq!(client.pending_requests(), 2);

    engine.send("%%<setlocal:second:2:true").await;
    assert_eq!(second.await.unwrap().unwrap(), "2");
    engine.send("%%<setlocal:first:1:true").await;
    assert_eq!(first.await.unwrap().unwrap(), "1");
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn duplicate_request_is_rejected_before_sending() {
    let (client, mut engine) = connect().await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("dup").await }
    });
    engine.expect("%%>setlocal:dup:").await;

    let second = client.get_local("dup").await;
    assert!(
        matches!(second, Err(ClientError::DuplicateRequest(_))),
        "expected DuplicateRequest, got {second:?}"
    );
    engine.expect_silence(Duration::from_millis(50)).await;

    engine.send("%%<setlocal:dup:value:true").await;
    assert_eq!(first.await.unwrap().unwrap(), "value");
}

#[tokio::test]
async fn same_name_under_different_directives_does_not_collide() {
    let (client, mut engine) = connect().await;

    let watch = tokio::spawn({
        let client = client.clone();
        async move { client.watch("test").await }
    });
    engine.expect("%%>watch:test").await;
    let install = tokio::spawn({
        let client = client.clone();
        async move { client.install(&InstallRequest::new("test")).await }
    });
    engine.expect("%%>install::test").await;

    engine.send("%%<install:80:test:true").await;
    engine.send("%%<watch:test:false").await;
    assert_eq!(install.await.unwrap().unwrap().priority, 80);
    assert!(!watch.await.unwrap().unwrap());
}

#[tokio::test]
async fn engine_error_fails_every_pending_request() {
    let (client, mut engine) = connect().await;

    let a = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("a").await }
    });
    engine.expect("%%>setlocal:a:").await;
    let b = tokio::spawn({
        let client = client.clone();
        async move { client.watch("b").await }
    });
    engine.expect("%%>watch:b").await;

    engine.send("Error in:%%>bogus:line").await;

    for outcome in [a.await.unwrap().err(), b.await.unwrap().err()] {
        match outcome {
            Some(ClientError::Engine(text)) => assert_eq!(text, "%>bogus:line"),
            other => panic!("expected engine error, got {other:?}"),
        }
    }
    assert_eq!(client.pending_requests(), 0);

    // The connection stays usable.
    let c = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("c").await }
    });
    engine
        .reply("%%>setlocal:c:", "%%<setlocal:c:ok:true")
        .await;
    assert_eq!(c.await.unwrap().unwrap(), "ok");
}

#[tokio::test]
async fn cancelled_request_releases_its_key() {
    let (client, mut engine) = connect().await;

    let timed_out = tokio::time::timeout(Duration::from_millis(20), client.get_local("slow")).await;
    assert!(timed_out.is_err(), "request must still be waiting");
    assert_eq!(client.pending_requests(), 0);
    engine.expect("%%>setlocal:slow:").await;

    // A late answer for the cancelled request is ignored.
    engine.send("%%<setlocal:slow:late:true").await;
    round_trip(&client, &mut engine).await;

    let retry = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("slow").await }
    });
    engine
        .reply("%%>setlocal:slow:", "%%<setlocal:slow:fresh:true")
        .await;
    assert_eq!(retry.await.unwrap().unwrap(), "fresh");
}

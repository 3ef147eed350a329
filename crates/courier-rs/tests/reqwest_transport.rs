//! The default reqwest transport and event-source connector against a mock
//! HTTP server.

use courier_rs::features::progress::UploadProgressFeature;
use courier_rs::{Factory, Payload, RequestBody, RequestBuilder};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn factory_for(server: &MockServer) -> Factory {
    Factory::builder()
        .with_base_url(server.uri())
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_json_with_path_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42"))
        .and(query_param("expand", "teams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    let payload = factory
        .get("/users/{{id}}")
        .path_param("id", "42")
        .query("expand", "teams")
        .execute()
        .await
        .unwrap();

    assert_eq!(payload, Payload::Json(json!({"id": 42})));
}

#[tokio::test]
async fn post_json_sends_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(header("x-request-id", "r-1"))
        .and(body_json(json!({"name": "ada"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    factory.default_header("x-request-id", "r-1");
    let payload = factory
        .post("/users")
        .json(&json!({"name": "ada"}))
        .unwrap()
        .execute()
        .await
        .unwrap();

    assert_eq!(payload, Payload::Json(json!({"id": 1})));
}

#[tokio::test]
async fn non_success_status_becomes_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    let err = factory.get("/missing").execute().await.unwrap_err();
    let err = err.as_request().unwrap();

    assert!(err.is_status());
    assert_eq!(err.code, 404);
    assert_eq!(err.message, "Not Found");
    assert_eq!(err.body(), Some(&Payload::Text("no such thing".into())));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    let err = factory
        .get("/slow")
        .timeout(Duration::from_millis(100))
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.code(), -1);
    assert!(err.as_request().unwrap().is_aborted());
}

#[tokio::test]
async fn upload_progress_over_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    factory.use_feature(UploadProgressFeature).unwrap();
    let percents = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&percents);

    let size = 40 * 1024;
    let payload = factory
        .put("/blob")
        .body(RequestBody::bytes(vec![b'x'; size]))
        .on_upload_progress(Duration::ZERO, move |event, _| {
            sink.lock().unwrap().push(event.percent)
        })
        .execute()
        .await
        .unwrap();
    assert_eq!(payload, Payload::Empty);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body.len(), size);
    assert_eq!(percents.lock().unwrap().last(), Some(&100));
}

#[tokio::test]
async fn event_stream_messages_are_delivered() {
    let server = MockServer::start().await;
    let body = "data: {\"n\":1}\n\n: keep-alive\n\nevent: note\ndata: hello\ndata: world\n\n";
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = factory
        .stream("/events")
        .on_message(move |payload: &Payload| sink.lock().unwrap().push(payload.clone()))
        .execute()
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), subscription.closed())
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Payload::Json(json!({"n": 1})),
            Payload::Text("hello\nworld".into()),
        ]
    );
}

#[tokio::test]
async fn event_stream_status_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let factory = factory_for(&server);
    let err = factory.stream("/events").execute().await.unwrap_err();
    assert_eq!(err.code(), 503);
}

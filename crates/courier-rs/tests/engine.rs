//! End-to-end tests for the request engine over closure transports.

use courier_rs::engine::interceptor::Intercept;
use courier_rs::transport::{Response, ResponseHead, TransportInit, transport_fn};
use courier_rs::{
    ConfigView, Error, Factory, Payload, RequestBody, RequestBuilder, RequestControl,
    RequestError,
};
use http::{HeaderMap, StatusCode};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Sent = Arc<Mutex<Vec<(String, TransportSnapshot)>>>;

#[derive(Debug, Clone)]
struct TransportSnapshot {
    method: String,
    headers: HeaderMap,
    body: Option<String>,
}

fn factory_with<F, Fut>(f: F) -> Factory
where
    F: Fn(String, TransportInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
{
    Factory::builder()
        .with_transport(transport_fn(f))
        .build()
        .unwrap()
}

/// A factory that records every send and answers with `respond()`.
fn recording<R>(base_url: Option<&str>, respond: R) -> (Factory, Sent)
where
    R: Fn() -> Response + Send + Sync + 'static,
{
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sent);
    let respond = Arc::new(respond);
    let transport = transport_fn(move |url: String, init: TransportInit| {
        let sink = Arc::clone(&sink);
        let respond = Arc::clone(&respond);
        async move {
            let TransportInit {
                method,
                headers,
                body,
                ..
            } = init;
            let body = match body {
                Some(body) => match body.collect().await {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) => return Err(e),
                },
                None => None,
            };
            sink.lock().unwrap().push((
                url,
                TransportSnapshot {
                    method: method.to_string(),
                    headers,
                    body,
                },
            ));
            Ok(respond())
        }
    });
    let mut builder = Factory::builder().with_transport(transport);
    if let Some(base_url) = base_url {
        builder = builder.with_base_url(base_url);
    }
    (builder.build().unwrap(), sent)
}

fn ok_json() -> Response {
    Response::from_json(StatusCode::OK, &json!({"ok": true}))
}

// ── Happy path ───────────────────────────────────────────────────────

#[tokio::test]
async fn absolute_url_returns_parsed_json() {
    let body = json!({"id": 7, "tags": ["a", "b"], "nested": {"x": null}});
    let expected = body.clone();
    let (factory, sent) = recording(None, move || Response::from_json(StatusCode::OK, &body));

    let payload = factory.get("https://api.test/items/7").execute().await.unwrap();

    assert_eq!(payload, Payload::Json(expected));
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "https://api.test/items/7");
    assert_eq!(sent[0].1.method, "GET");
}

#[tokio::test]
async fn template_params_and_base_url_compose() {
    let (factory, sent) = recording(Some("/api/v1/"), ok_json);

    factory
        .get("users/{{id}}/posts")
        .path_param("id", "42")
        .query("page", "2")
        .query("tag", vec!["a", "b"])
        .query("skip", None::<String>)
        .execute()
        .await
        .unwrap();
    factory.get("https://x/y").execute().await.unwrap();

    let urls: Vec<String> = sent.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
    assert_eq!(
        urls,
        vec![
            "/api/v1/users/42/posts?page=2&tag=a&tag=b".to_string(),
            "https://x/y".to_string(),
        ]
    );
}

#[tokio::test]
async fn text_binary_and_empty_bodies() {
    let (factory, _) = recording(None, || Response::from_text(StatusCode::OK, "hello"));
    let text = factory.get("https://api.test/t").execute().await.unwrap();
    assert_eq!(text, Payload::Text("hello".into()));

    let (factory, _) = recording(None, || {
        Response::from_bytes(StatusCode::OK, HeaderMap::new(), vec![1u8, 2, 3])
    });
    let binary = factory.get("https://api.test/b").execute().await.unwrap();
    assert_eq!(binary.as_bytes().map(|b| b.to_vec()), Some(vec![1, 2, 3]));

    let (factory, _) = recording(None, || Response::empty(StatusCode::NO_CONTENT));
    let empty = factory
        .delete("https://api.test/x")
        .transform(|_, _| Ok(Payload::Text("transformed".into())))
        .execute()
        .await
        .unwrap();
    assert_eq!(empty, Payload::Empty);

    let (factory, _) = recording(None, ok_json);
    let ignored = factory
        .get("https://api.test/x")
        .ignore_body()
        .execute()
        .await
        .unwrap();
    assert_eq!(ignored, Payload::Empty);
}

#[tokio::test]
async fn json_body_sets_content_type_and_accept() {
    let (factory, sent) = recording(None, ok_json);
    factory
        .post("https://api.test/users")
        .json(&json!({"name": "ada"}))
        .unwrap()
        .accept("application/json")
        .accept("text/plain")
        .execute()
        .await
        .unwrap();
    factory
        .put("https://api.test/users/1")
        .body(RequestBody::text("raw"))
        .header("content-type", "text/x-custom")
        .execute()
        .await
        .unwrap();

    let sent = sent.lock().unwrap();
    let first = &sent[0].1;
    assert_eq!(first.headers["content-type"], "application/json");
    assert_eq!(first.headers["accept"], "application/json, text/plain");
    assert_eq!(first.body.as_deref(), Some(r#"{"name":"ada"}"#));
    assert_eq!(sent[1].1.headers["content-type"], "text/x-custom");
    assert_eq!(sent[1].1.body.as_deref(), Some("raw"));
}

#[tokio::test]
async fn computed_header_reads_other_configuration() {
    let (factory, sent) = recording(None, ok_json);
    factory
        .get("https://api.test/x")
        .meta("tenant", "acme")
        .computed_header("x-tenant", |config: &ConfigView| {
            config.meta_value("tenant").and_then(|v| v.as_str().map(str::to_string))
        })
        .computed_header("x-dropped", |_: &ConfigView| None)
        .execute()
        .await
        .unwrap();

    let sent = sent.lock().unwrap();
    let headers = &sent[0].1.headers;
    assert_eq!(headers["x-tenant"], "acme");
    assert!(!headers.contains_key("x-dropped"));
}

// ── Interceptors ─────────────────────────────────────────────────────

#[tokio::test]
async fn request_interceptor_short_circuits_through_transformers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let factory = factory_with(move |_url: String, _init: TransportInit| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(ok_json()) }
    });

    let payload = factory
        .get("https://api.test/cached")
        .on_request(|_config: ConfigView, _control: RequestControl| async {
            Ok(Intercept::Produce(Payload::Json(json!({"n": 1}))))
        })
        .transform(|payload, _| {
            let n = payload.as_json().and_then(|v| v["n"].as_i64()).unwrap_or(0);
            Ok(Payload::Json(json!({"n": n + 1})))
        })
        .execute()
        .await
        .unwrap();

    assert_eq!(payload, Payload::Json(json!({"n": 2})));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn interceptors_rewrite_before_finalization_only() {
    let (factory, sent) = recording(None, ok_json);
    let late = Arc::new(Mutex::new(Vec::new()));
    let late_sink = Arc::clone(&late);

    factory
        .get("https://api.test/old/{{id}}")
        .path_param("id", "1")
        .on_request(|_config: ConfigView, control: RequestControl| {
            let first = control.provisional_url();
            let second = control.provisional_url();
            let outcome = (|| -> courier_rs::Result<()> {
                assert_eq!(first?, second?);
                control.replace_url("https://api.test/new/{{id}}")?;
                control.set_query_param("v", "2")?;
                control.set_header("x-rewritten", "yes")
            })();
            async move { outcome.map(|()| Intercept::Continue) }
        })
        .on_response(move |_config: ConfigView, _head: ResponseHead, control: RequestControl| {
            late_sink.lock().unwrap().push((
                control.is_finalized(),
                control.replace_url("https://api.test/too-late").is_err(),
                control.set_header("x", "y").is_err(),
                control.provisional_url().ok(),
            ));
            async { Ok(Intercept::Continue) }
        })
        .execute()
        .await
        .unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0].0, "https://api.test/new/1?v=2");
    assert_eq!(sent[0].1.headers["x-rewritten"], "yes");
    assert_eq!(
        *late.lock().unwrap(),
        vec![(true, true, true, Some("https://api.test/new/1?v=2".to_string()))]
    );
}

#[tokio::test]
async fn untransformed_response_interceptor_skips_transformers() {
    let (factory, _) = recording(None, ok_json);

    let produced = factory
        .get("https://api.test/a")
        .on_response_untransformed(
            |_config: ConfigView, head: ResponseHead, _control: RequestControl| async move {
                Ok(Intercept::Produce(Payload::Text(head.status.as_str().to_string())))
            },
        )
        .transform(transformed)
        .execute()
        .await
        .unwrap();
    assert_eq!(produced, Payload::Text("200".into()));

    let through = factory
        .get("https://api.test/b")
        .on_response(|_config: ConfigView, _head: ResponseHead, _control: RequestControl| async {
            Ok(Intercept::Produce(Payload::Empty))
        })
        .transform(transformed)
        .execute()
        .await
        .unwrap();
    assert_eq!(through, Payload::Text("transformed".into()));
}

fn transformed(_: Payload, _: &ConfigView) -> courier_rs::Result<Payload> {
    Ok(Payload::Text("transformed".into()))
}

// ── Errors ───────────────────────────────────────────────────────────

#[tokio::test]
async fn status_errors_carry_code_and_body() {
    let (factory, _) = recording(None, || {
        Response::from_json(StatusCode::NOT_FOUND, &json!({"error": "missing"}))
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&seen);
    let second = Arc::clone(&seen);

    let err = factory
        .get("https://api.test/nope")
        .on_error(move |error: RequestError, _config: ConfigView| {
            first.lock().unwrap().push(("first", error.code));
            async { true }
        })
        .on_error(move |error: RequestError, _config: ConfigView| {
            second.lock().unwrap().push(("second", error.code));
            async { false }
        })
        .execute()
        .await
        .unwrap_err();

    let request_error = err.as_request().unwrap();
    assert_eq!(request_error.code, 404);
    assert_eq!(request_error.message, "Not Found");
    assert_eq!(request_error.body(), Some(&Payload::Json(json!({"error": "missing"}))));
    assert_eq!(*seen.lock().unwrap(), vec![("first", 404)]);
}

#[tokio::test]
async fn transport_failure_is_sentinel() {
    let factory = factory_with(|_url: String, _init: TransportInit| async {
        Err(RequestError::network_message("connection refused"))
    });
    let err = factory.get("https://api.test/").execute().await.unwrap_err();
    assert_eq!(err.code(), -1);
    let request_error = err.as_request().unwrap();
    assert!(!request_error.is_aborted());
    assert_eq!(request_error.message, "connection refused");
}

#[tokio::test]
async fn timeout_aborts_and_reports_once() {
    let factory = factory_with(|_url: String, _init: TransportInit| async {
        std::future::pending::<Result<Response, RequestError>>().await
    });
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&codes);

    let err = factory
        .get("https://api.test/slow")
        .timeout(Duration::from_millis(50))
        .on_error(move |error: RequestError, _config: ConfigView| {
            sink.lock().unwrap().push(error.code);
            async { false }
        })
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.code(), -1);
    assert!(err.as_request().unwrap().is_aborted());
    assert_eq!(err.as_request().unwrap().message, "Request aborted");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*codes.lock().unwrap(), vec![-1]);
}

#[tokio::test]
async fn interceptor_abort_stops_before_transport() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let factory = factory_with(move |_url: String, _init: TransportInit| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(ok_json()) }
    });

    let err = factory
        .get("https://api.test/")
        .on_request(|_config: ConfigView, control: RequestControl| {
            control.abort("not today");
            async { Ok(Intercept::Continue) }
        })
        .execute()
        .await
        .unwrap_err();

    assert!(err.as_request().unwrap().is_aborted());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn external_abort_cancels_in_flight_request() {
    let factory = factory_with(|_url: String, _init: TransportInit| async {
        std::future::pending::<Result<Response, RequestError>>().await
    });
    let request = factory.get("https://api.test/hang");
    let handle = request.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort(courier_rs::AbortReason::Explicit("user".into()));
    });
    let err = request.execute().await.unwrap_err();
    assert_eq!(err.code(), -1);
    assert!(err.as_request().unwrap().is_aborted());
}

#[tokio::test]
async fn requests_run_once() {
    let (factory, sent) = recording(None, ok_json);
    let request = factory.get("https://api.test/once");
    request.execute().await.unwrap();
    assert!(request.is_used());
    assert!(matches!(request.execute().await, Err(Error::AlreadyExecuted)));
    assert_eq!(sent.lock().unwrap().len(), 1);
}

// ── Factory defaults and modes ───────────────────────────────────────

#[tokio::test]
async fn conditional_defaults_follow_metadata() {
    let (factory, sent) = recording(Some("https://api.test"), ok_json);
    factory.default_header("x-client", "courier");
    factory
        .when(|info| info.meta.get("admin").and_then(|v| v.as_bool()) == Some(true))
        .header("x-admin", "1");

    factory.get("/a").meta("admin", true).execute().await.unwrap();
    factory.get("/b").execute().await.unwrap();
    factory
        .get("/c")
        .header("x-client", "override")
        .execute()
        .await
        .unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0].1.headers["x-admin"], "1");
    assert_eq!(sent[0].1.headers["x-client"], "courier");
    assert!(!sent[1].1.headers.contains_key("x-admin"));
    assert_eq!(sent[2].1.headers["x-client"], "override");
}

#[tokio::test]
async fn defaults_registered_after_build_still_apply() {
    let (factory, sent) = recording(None, ok_json);
    let request = factory.get("https://api.test/late");
    factory.default_header("x-late", "yes");
    request.execute().await.unwrap();
    assert_eq!(sent.lock().unwrap()[0].1.headers["x-late"], "yes");
}

#[tokio::test]
async fn wrapped_mode_never_fails() {
    let (factory, _) = recording(None, || Response::empty(StatusCode::INTERNAL_SERVER_ERROR));
    let wrapped = factory.wrapped();

    let failed = wrapped.get("https://api.test/boom").execute().await;
    assert!(failed.response.is_none());
    assert_eq!(failed.error.as_ref().map(Error::code), Some(500));

    let (factory, _) = recording(None, ok_json);
    let ok = factory.wrapped().get("https://api.test/fine").execute().await;
    assert!(ok.is_ok());
    assert_eq!(ok.response, Some(Payload::Json(json!({"ok": true}))));
}

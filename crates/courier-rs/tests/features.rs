//! Retry, adapters, progress and hashing, exercised through a factory.

use bytes::Bytes;
use courier_rs::engine::interceptor::{ErrorInterceptor, Intercept, RequestInterceptor};
use courier_rs::factory::RequestInfo;
use courier_rs::features::adapters::{Adapter, AdapterFeature, PriorityOverride};
use courier_rs::features::hash::RequestHashFeature;
use courier_rs::features::progress::{
    DownloadProgressFeature, FallThrough, ProgressEvent, UPLOAD_CHUNK_SIZE, UploadProgressFeature,
};
use courier_rs::features::retry::{RetryFeature, RetryPolicy};
use courier_rs::transport::{Response, ResponseHead, TransportBody, TransportInit, transport_fn};
use courier_rs::{
    ConfigView, Error, Factory, Payload, RequestBody, RequestBuilder, RequestConfig,
    RequestControl, RequestError,
};
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ok_json() -> Response {
    Response::from_json(StatusCode::OK, &json!({"ok": true}))
}

/// Fails with a network error for the first `failures` sends.
fn flaky(failures: usize) -> (Factory, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let transport = transport_fn(move |_url: String, _init: TransportInit| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call < failures {
                Err(RequestError::network_message("connection reset"))
            } else {
                Ok(ok_json())
            }
        }
    });
    let factory = Factory::builder().with_transport(transport).build().unwrap();
    (factory, calls)
}

// ── Retry ────────────────────────────────────────────────────────────

#[tokio::test]
async fn retries_until_success() {
    let (factory, calls) = flaky(2);
    let succeeded_after = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&succeeded_after);
    let policy = RetryPolicy::new(2)
        .delay(Duration::from_millis(10))
        .condition(|ctx| ctx.error.is_some())
        .on_retry_success(move |retries, _head| *sink.lock().unwrap() = Some(retries));
    factory.use_feature(RetryFeature::new(policy)).unwrap();

    let payload = factory.get("https://api.test/").execute().await.unwrap();

    assert_eq!(payload, Payload::Json(json!({"ok": true})));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*succeeded_after.lock().unwrap(), Some(2));
}

#[tokio::test]
async fn exhausted_retries_report_the_last_error() {
    let (factory, calls) = flaky(usize::MAX);
    let exhausted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&exhausted);
    let retried = Arc::new(AtomicUsize::new(0));
    let retry_counter = Arc::clone(&retried);
    let policy = RetryPolicy::new(1)
        .delay(Duration::from_millis(1))
        .on_retry(move |_, _, _| {
            retry_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_max_attempts_exceeded(move |error, attempts| {
            sink.lock().unwrap().push((error.message.clone(), attempts));
        });
    factory.use_feature(RetryFeature::new(policy)).unwrap();

    let err = factory.get("https://api.test/").execute().await.unwrap_err();

    assert_eq!(err.code(), -1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(retried.load(Ordering::SeqCst), 1);
    assert_eq!(
        *exhausted.lock().unwrap(),
        vec![("connection reset".to_string(), 1)]
    );
}

#[tokio::test]
async fn transient_responses_are_retried_when_asked() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let transport = transport_fn(move |_url: String, _init: TransportInit| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok(if call == 0 {
                Response::empty(StatusCode::SERVICE_UNAVAILABLE)
            } else {
                ok_json()
            })
        }
    });
    let factory = Factory::builder().with_transport(transport).build().unwrap();
    factory.use_feature(RetryFeature::default()).unwrap();

    let policy = RetryPolicy::new(3)
        .delay(Duration::from_millis(1))
        .retry_transient_statuses();
    let payload = factory
        .get("https://api.test/")
        .retry(policy)
        .execute()
        .await
        .unwrap();
    assert_eq!(payload, Payload::Json(json!({"ok": true})));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn metadata_selects_a_retry_policy() {
    let (factory, calls) = flaky(2);
    let feature = RetryFeature::new(RetryPolicy::new(0)).with_meta_policy(
        |meta| meta.get("flaky").and_then(|v| v.as_bool()) == Some(true),
        RetryPolicy::new(1).delay(Duration::from_millis(1)),
    );
    factory.use_feature(feature).unwrap();

    assert!(factory.get("https://api.test/").execute().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let ok = factory
        .get("https://api.test/")
        .meta("flaky", true)
        .execute()
        .await;
    assert!(ok.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn abort_interrupts_the_retry_sleep() {
    let (factory, calls) = flaky(usize::MAX);
    factory
        .use_feature(RetryFeature::new(
            RetryPolicy::new(5).delay(Duration::from_secs(30)),
        ))
        .unwrap();

    let err = factory
        .get("https://api.test/")
        .timeout(Duration::from_millis(50))
        .execute()
        .await
        .unwrap_err();
    assert!(err.as_request().unwrap().is_aborted());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Adapters ─────────────────────────────────────────────────────────

type Trace = Arc<Mutex<Vec<String>>>;

struct Tagging {
    name: &'static str,
    priority: Option<u32>,
    trace: Trace,
}

impl Adapter for Tagging {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> PriorityOverride {
        PriorityOverride {
            request: self.priority,
            ..Default::default()
        }
    }

    fn request_interceptors(&self) -> Vec<Arc<dyn RequestInterceptor>> {
        let (name, trace) = (self.name, Arc::clone(&self.trace));
        let interceptor: Arc<dyn RequestInterceptor> =
            Arc::new(move |_config: ConfigView, _control: RequestControl| {
                trace.lock().unwrap().push(format!("request:{name}"));
                async { Ok::<_, Error>(Intercept::Continue) }
            });
        vec![interceptor]
    }

    fn error_interceptors(&self) -> Vec<Arc<dyn ErrorInterceptor>> {
        let (name, trace) = (self.name, Arc::clone(&self.trace));
        let interceptor: Arc<dyn ErrorInterceptor> =
            Arc::new(move |_error: RequestError, _config: ConfigView| {
                trace.lock().unwrap().push(format!("error:{name}"));
                async { false }
            });
        vec![interceptor]
    }

    fn defaults(&self) -> Vec<Arc<dyn courier_rs::factory::DefaultBuilder>> {
        let name = self.name;
        let default: Arc<dyn courier_rs::factory::DefaultBuilder> =
            Arc::new(move |config: &mut RequestConfig, _: &RequestInfo| {
                config.set_header(format!("x-adapter-{name}"), "1");
            });
        vec![default]
    }
}

fn adapter_factory() -> (Factory, Trace, Arc<Mutex<Vec<HeaderMap>>>) {
    let headers = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&headers);
    let transport = transport_fn(move |_url: String, init: TransportInit| {
        sink.lock().unwrap().push(init.headers.clone());
        async { Ok(Response::empty(StatusCode::BAD_REQUEST)) }
    });
    let factory = Factory::builder()
        .with_transport(transport)
        .build()
        .unwrap()
        .with_feature(AdapterFeature)
        .unwrap();
    (factory, Arc::new(Mutex::new(Vec::new())), headers)
}

#[tokio::test]
async fn adapter_interceptors_run_by_priority_then_attach_order() {
    let (factory, trace, _) = adapter_factory();
    let attached = [
        ("first-100", Some(100)),
        ("fifty", Some(50)),
        ("second-100", Some(100)),
    ];
    for (name, priority) in attached {
        factory
            .attach_adapter(Tagging {
                name,
                priority,
                trace: Arc::clone(&trace),
            })
            .unwrap();
    }

    let _ = factory.get("https://api.test/").execute().await;

    assert_eq!(
        *trace.lock().unwrap(),
        vec![
            "request:fifty",
            "request:first-100",
            "request:second-100",
            "error:first-100",
            "error:fifty",
            "error:second-100",
        ]
    );
}

#[tokio::test]
async fn request_level_interceptors_follow_adapter_ones() {
    let (factory, trace, _) = adapter_factory();
    factory
        .attach_adapter(Tagging {
            name: "auth",
            priority: None,
            trace: Arc::clone(&trace),
        })
        .unwrap();

    let local = Arc::clone(&trace);
    let _ = factory
        .get("https://api.test/")
        .on_request(move |_config: ConfigView, _control: RequestControl| {
            local.lock().unwrap().push("request:local".to_string());
            async { Ok(Intercept::Continue) }
        })
        .execute()
        .await;

    let trace = trace.lock().unwrap();
    assert_eq!(trace[0], "request:auth");
    assert_eq!(trace[1], "request:local");
}

#[tokio::test]
async fn detach_removes_exactly_what_was_contributed() {
    let (factory, trace, headers) = adapter_factory();
    let tagging = |name| Tagging {
        name,
        priority: None,
        trace: Arc::clone(&trace),
    };
    factory.attach_adapter(tagging("a")).unwrap();
    factory
        .attach_adapter_with(tagging("b"), PriorityOverride::all(10))
        .unwrap();
    assert!(matches!(
        factory.attach_adapter(tagging("a")),
        Err(Error::AdapterAlreadyAttached(_))
    ));
    assert_eq!(factory.list_adapters().unwrap(), vec!["a", "b"]);
    assert_eq!(
        factory.adapters().unwrap().priority_of("b").map(|p| p.error),
        Some(10)
    );

    factory.detach_adapter("a").unwrap();
    assert!(!factory.has_adapter("a").unwrap());
    let _ = factory.get("https://api.test/").execute().await;

    assert_eq!(*trace.lock().unwrap(), vec!["request:b", "error:b"]);
    let sent = headers.lock().unwrap();
    assert!(sent[0].contains_key("x-adapter-b"));
    assert!(!sent[0].contains_key("x-adapter-a"));
    assert!(matches!(
        factory.detach_adapter("a"),
        Err(Error::AdapterNotAttached(_))
    ));
}

// ── Progress ─────────────────────────────────────────────────────────

fn record(
    events: &Arc<Mutex<Vec<ProgressEvent>>>,
) -> impl Fn(&ProgressEvent, &FallThrough) + Send + Sync + 'static {
    let sink = Arc::clone(events);
    move |event, _| sink.lock().unwrap().push(event.clone())
}

#[tokio::test]
async fn download_progress_with_unknown_length() {
    let transport = transport_fn(|_url: String, _init: TransportInit| async {
        Ok(Response::from_chunks(
            StatusCode::OK,
            HeaderMap::new(),
            vec![Bytes::from_static(b"first-"), Bytes::from_static(b"second")],
        ))
    });
    let factory = Factory::builder().with_transport(transport).build().unwrap();
    factory.use_feature(DownloadProgressFeature).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let payload = factory
        .get("https://api.test/file")
        .on_download_progress(Duration::ZERO, record(&events))
        .execute()
        .await
        .unwrap();

    assert_eq!(payload, Payload::Binary(Bytes::from_static(b"first-second")));
    let events = events.lock().unwrap();
    assert_eq!(events.first().map(|e| e.percent), Some(0));
    assert_eq!(events.last().map(|e| e.percent), Some(100));
    assert_eq!(events.last().map(|e| e.loaded), Some(12));
    assert!(events.iter().all(|e| e.total.is_none()));
    assert!(events[1..events.len() - 1].iter().all(|e| e.percent == 0));
}

#[tokio::test]
async fn upload_progress_streams_the_body() {
    let received = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&received);
    let transport = transport_fn(move |_url: String, init: TransportInit| {
        let sink = Arc::clone(&sink);
        async move {
            let streamed = matches!(init.body, Some(TransportBody::Stream { .. }));
            let bytes = match init.body {
                Some(body) => body.collect().await,
                None => Ok(Bytes::new()),
            };
            *sink.lock().unwrap() = Some((streamed, bytes.map(|b| b.len())));
            Ok(Response::empty(StatusCode::NO_CONTENT))
        }
    });
    let factory = Factory::builder().with_transport(transport).build().unwrap();
    factory.use_feature(UploadProgressFeature).unwrap();

    let size = UPLOAD_CHUNK_SIZE * 3;
    let events = Arc::new(Mutex::new(Vec::new()));
    factory
        .post("https://api.test/upload")
        .body(RequestBody::bytes(vec![0u8; size]))
        .on_upload_progress(Duration::ZERO, record(&events))
        .execute()
        .await
        .unwrap();

    let chunked = received.lock().unwrap().take().unwrap();
    assert!(chunked.0);
    assert_eq!(chunked.1.unwrap(), size);
    let percents: Vec<u8> = events.lock().unwrap().iter().map(|e| e.percent).collect();
    assert_eq!(percents, vec![33, 66, 100]);

    // Requests without upload handlers keep the plain body.
    factory
        .post("https://api.test/upload")
        .body(RequestBody::text("small"))
        .execute()
        .await
        .unwrap();
    let plain = received.lock().unwrap().take().unwrap();
    assert!(!plain.0);
    assert_eq!(plain.1.unwrap(), 5);
}

#[tokio::test]
async fn empty_upload_still_completes() {
    let transport = transport_fn(|_url: String, init: TransportInit| async move {
        if let Some(body) = init.body {
            let _ = body.collect().await;
        }
        Ok(Response::empty(StatusCode::NO_CONTENT))
    });
    let factory = Factory::builder().with_transport(transport).build().unwrap();
    factory.use_feature(UploadProgressFeature).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    factory
        .post("https://api.test/upload")
        .body(RequestBody::text(""))
        .on_upload_progress(Duration::ZERO, record(&events))
        .execute()
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].percent, 100);
    assert_eq!(events[0].total, Some(0));
}

#[tokio::test]
async fn abort_cancels_a_streamed_download() {
    let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
    let alive = Arc::new(Mutex::new(Some(alive)));
    let transport = transport_fn(move |_url: String, _init: TransportInit| {
        let guard = alive.lock().unwrap().take();
        async move {
            let body = futures::stream::iter(vec![Ok(Bytes::from_static(b"partial"))])
                .chain(futures::stream::pending())
                .map(move |chunk| {
                    let _held = &guard;
                    chunk
                })
                .boxed();
            Ok(Response::new(
                ResponseHead::new(StatusCode::OK, HeaderMap::new()),
                body,
            ))
        }
    });
    let factory = Factory::builder().with_transport(transport).build().unwrap();
    factory.use_feature(DownloadProgressFeature).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let err = factory
        .get("https://api.test/file")
        .timeout(Duration::from_millis(50))
        .on_download_progress(Duration::ZERO, record(&events))
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.code(), -1);
    assert!(err.as_request().unwrap().is_aborted());
    let percents: Vec<u8> = events.lock().unwrap().iter().map(|e| e.percent).collect();
    assert!(!percents.contains(&100));
    assert_eq!(percents.first(), Some(&0));
    tokio::time::timeout(Duration::from_secs(1), dropped)
        .await
        .unwrap()
        .unwrap_err();
}

// ── Hashing ──────────────────────────────────────────────────────────

/// Hash the request in an interceptor and skip the network.
async fn hash_of<F>(factory: &Factory, build: F) -> courier_rs::Result<String>
where
    F: FnOnce(courier_rs::Request) -> courier_rs::Request,
{
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    build(factory.post("https://api.test/items"))
        .on_request(move |_config: ConfigView, control: RequestControl| {
            *sink.lock().unwrap() = Some(control.hash());
            async { Ok(Intercept::Produce(Payload::Empty)) }
        })
        .execute()
        .await
        .unwrap();
    let hash = slot.lock().unwrap().take();
    hash.unwrap_or_else(|| Err(Error::Unsupported("interceptor did not run".into())))
}

#[tokio::test]
async fn hashes_are_stable_across_key_order() {
    let factory = Factory::builder()
        .with_transport(transport_fn(|_url: String, _init: TransportInit| async {
            Ok(ok_json())
        }))
        .build()
        .unwrap()
        .with_feature(RequestHashFeature)
        .unwrap();

    let a = hash_of(&factory, |r| r.body(json!({"name": "a", "id": 1}))).await.unwrap();
    let b = hash_of(&factory, |r| r.body(json!({"id": 1, "name": "a"}))).await.unwrap();
    let changed = hash_of(&factory, |r| r.body(json!({"id": 2, "name": "a"}))).await.unwrap();
    assert_eq!(a, b);
    assert_ne!(a, changed);

    let authorized = hash_of(&factory, |r| {
        r.body(json!({"id": 1, "name": "a"}))
            .header("authorization", "Bearer secret")
    })
    .await
    .unwrap();
    assert_eq!(a, authorized);

    let typed = hash_of(&factory, |r| {
        r.body(json!({"id": 1, "name": "a"}))
            .header("content-type", "application/vnd.api+json")
    })
    .await
    .unwrap();
    assert_ne!(a, typed);

    let binary = hash_of(&factory, |r| r.body(RequestBody::bytes(vec![1u8, 2]))).await;
    assert!(matches!(binary, Err(Error::Unsupported(_))));
}

#[tokio::test]
async fn hashing_requires_the_feature() {
    let factory = Factory::builder()
        .with_transport(transport_fn(|_url: String, _init: TransportInit| async {
            Ok(ok_json())
        }))
        .build()
        .unwrap();
    let err = hash_of(&factory, |r| r).await.unwrap_err();
    assert!(matches!(err, Error::FeatureNotRegistered(name) if name == "request-hash"));
}

struct Stamp;

impl courier_rs::features::Feature for Stamp {
    fn name(&self) -> &str {
        "stamp"
    }

    fn apply(&self, ctx: &courier_rs::factory::FactoryContext) {
        ctx.commands()
            .add_pre_transport(Arc::new(|init: &mut TransportInit, config: &ConfigView| {
                let value = http::HeaderValue::from_str(config.method().as_str())
                    .unwrap_or_else(|_| http::HeaderValue::from_static("?"));
                init.headers.insert("x-stamped", value);
            }));
    }
}

#[tokio::test]
async fn pre_transport_hooks_edit_the_envelope() {
    let (factory, _, headers) = adapter_factory();
    factory.use_feature(Stamp).unwrap();
    assert!(matches!(factory.use_feature(Stamp), Err(Error::FeatureAlreadyRegistered(_))));

    let _ = factory.delete("https://api.test/items/1").execute().await;

    let sent = headers.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get("x-stamped").unwrap(), "DELETE");
}

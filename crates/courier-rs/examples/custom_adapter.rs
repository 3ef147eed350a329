//! Custom adapter example: bundle interceptors and defaults under one name.
//!
//! Demonstrates:
//! - An `Adapter` contributing request, response and error interceptors
//! - Adapter-supplied factory defaults
//! - Priorities deciding where adapter interceptors run
//! - Detaching an adapter by name
//!
//! # Usage
//!
//! ```bash
//! cargo run --example custom_adapter
//! ```

use courier_rs::RequestConfig;
use courier_rs::engine::interceptor::{
    ErrorInterceptor, RequestInterceptor, ResponseInterceptorEntry,
};
use courier_rs::factory::{DefaultBuilder, RequestInfo};
use courier_rs::prelude::*;
use courier_rs::transport::ResponseHead;
use std::sync::Arc;

// ── Adapters ────────────────────────────────────────────────────────

/// Stamps a client id on every request and logs what comes back.
struct Telemetry {
    client_id: String,
}

impl Adapter for Telemetry {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn priority(&self) -> PriorityOverride {
        PriorityOverride::request(10)
    }

    fn on_attach(&self) {
        eprintln!("[telemetry] attached as {}", self.client_id);
    }

    fn on_detach(&self) {
        eprintln!("[telemetry] detached");
    }

    fn request_interceptors(&self) -> Vec<Arc<dyn RequestInterceptor>> {
        let interceptor: Arc<dyn RequestInterceptor> =
            Arc::new(|_config: ConfigView, control: RequestControl| {
                if let Ok(url) = control.provisional_url() {
                    eprintln!("[telemetry] -> {url}");
                }
                async { Ok::<_, Error>(Intercept::Continue) }
            });
        vec![interceptor]
    }

    fn response_interceptors(&self) -> Vec<ResponseInterceptorEntry> {
        let interceptor =
            |_config: ConfigView, head: ResponseHead, _control: RequestControl| async move {
                eprintln!("[telemetry] <- {} {}", head.status.as_u16(), head.status_text);
                Ok::<_, Error>(Intercept::Continue)
            };
        vec![ResponseInterceptorEntry::new(Arc::new(interceptor))]
    }

    fn error_interceptors(&self) -> Vec<Arc<dyn ErrorInterceptor>> {
        let interceptor: Arc<dyn ErrorInterceptor> =
            Arc::new(|error: RequestError, _config: ConfigView| async move {
                eprintln!("[telemetry] !! {} ({})", error.message, error.code);
                false
            });
        vec![interceptor]
    }

    fn defaults(&self) -> Vec<Arc<dyn DefaultBuilder>> {
        let client_id = self.client_id.clone();
        let stamp: Arc<dyn DefaultBuilder> =
            Arc::new(move |config: &mut RequestConfig, _: &RequestInfo| {
                config.set_header("x-client-id", client_id.clone());
            });
        vec![stamp]
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), String> {
    let factory = Factory::builder()
        .with_base_url("https://httpbin.org")
        .build()
        .and_then(|f| f.with_feature(AdapterFeature))
        .map_err(|e| e.to_string())?;

    factory
        .attach_adapter(Telemetry {
            client_id: "example-1".into(),
        })
        .map_err(|e| e.to_string())?;

    // Status endpoints get a longer timeout.
    factory
        .when(|info: &RequestInfo| info.url.starts_with("/status"))
        .timeout(Duration::from_secs(30));

    let headers = factory
        .get("/headers")
        .execute()
        .await
        .map_err(|e| e.to_string())?;
    println!("{headers:?}");

    // Failures still reach the adapter's error interceptor.
    let missing = factory.get("/status/404").execute().await;
    println!("404 -> {:?}", missing.err().map(|e| e.code()));

    factory.detach_adapter("telemetry").map_err(|e| e.to_string())?;
    println!("adapters now: {:?}", factory.list_adapters().map_err(|e| e.to_string())?);

    Ok(())
}

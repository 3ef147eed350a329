//! Minimal request example: one factory, one GET, retries on network errors.
//!
//! Fetches a JSON document through a templated URL and prints it along with
//! how many attempts it took.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example basic_request
//! COURIER_BASE=https://httpbin.org cargo run --example basic_request
//! ```

use courier_rs::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::main]
async fn main() -> Result<(), String> {
    // 1. Create the factory with a base URL.
    let base = std::env::var("COURIER_BASE").unwrap_or_else(|_| "https://httpbin.org".into());
    let factory = Factory::builder()
        .with_base_url(base)
        .build()
        .map_err(|e| e.to_string())?;

    // 2. Retry transport failures up to twice with exponential backoff.
    let retries = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&retries);
    let policy = RetryPolicy::new(2)
        .backoff(exponential_backoff(
            Duration::from_millis(200),
            2.0,
            Duration::from_secs(2),
        ))
        .on_retry(move |retry, _, delay| {
            counter.store(retry, Ordering::SeqCst);
            eprintln!("retry {retry} in {}ms", delay.as_millis());
        });
    factory
        .use_feature(RetryFeature::new(policy))
        .map_err(|e| e.to_string())?;

    // 3. Defaults apply to every request from this factory.
    factory.default_header("x-example", "basic_request");
    factory.default_timeout(Duration::from_secs(10));

    // 4. Build and run the request.
    let payload = factory
        .get("/{{kind}}")
        .path_param("kind", "json")
        .query("source", "courier")
        .execute()
        .await
        .map_err(|e| e.to_string())?;

    // 5. Print results.
    match &payload {
        Payload::Json(value) => println!(
            "{}",
            serde_json::to_string_pretty(value).map_err(|e| e.to_string())?
        ),
        other => println!("{other:?}"),
    }
    println!("\n--- {} retries ---", retries.load(Ordering::SeqCst));

    Ok(())
}

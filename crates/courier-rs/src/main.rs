//! Send an HTTP request (or open an event stream) and print the result.
//!
//! # Examples
//!
//! ```sh
//! # Plain GET, JSON is pretty-printed
//! courier https://api.example.com/users/1
//!
//! # Template URL with path and query parameters
//! courier https://api.example.com/users/{{id}} -p id=7 -q expand=teams
//!
//! # POST a JSON body with a header and a timeout
//! courier -X POST https://api.example.com/users \
//!   --json '{"name": "ada"}' -H 'x-trace: 1' --timeout 5000
//!
//! # Retry transport failures twice, 200ms apart
//! courier https://flaky.example.com/ --retries 2 --retry-delay 200
//!
//! # Follow a server-sent-events stream until Ctrl-C
//! courier --sse https://api.example.com/events
//!
//! # Factory defaults from a file, verbose logging
//! courier --config courier.json /health -vv
//! ```

use clap::{ArgAction, Parser};
use courier_rs::features::progress::{DownloadProgressFeature, ProgressEvent, UploadProgressFeature};
use courier_rs::features::retry::{self, RetryFeature, RetryPolicy};
use courier_rs::{Factory, FactoryConfig, LogLevel, Payload, RequestBody, RequestBuilder};
use http::Method;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Send an HTTP request (or open an event stream) and print the result.
#[derive(Parser)]
#[command(name = "courier", version)]
struct Cli {
    // ── Request ────────────────────────────────────────────────
    /// URL or URL template; relative URLs are joined onto the config's base URL
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Header as `name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Query parameter as `name=value` (repeatable; repeated names become arrays)
    #[arg(short = 'q', long = "query")]
    query: Vec<String>,

    /// Path parameter for a `{{name}}` placeholder, as `name=value` (repeatable)
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,

    // ── Body ───────────────────────────────────────────────────
    /// JSON request body
    #[arg(long, conflicts_with = "data")]
    json: Option<String>,

    /// Raw text request body
    #[arg(long)]
    data: Option<String>,

    // ── Behavior ───────────────────────────────────────────────
    /// Timeout in milliseconds (0 disables)
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries after the first attempt for transport failures
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Fixed delay between retries, in milliseconds
    #[arg(long, default_value_t = 500)]
    retry_delay: u64,

    /// Open a server-sent-events stream and print each message
    #[arg(long)]
    sse: bool,

    /// Report upload and download progress on stderr
    #[arg(long)]
    progress: bool,

    /// JSON file with factory defaults (base URL, headers, timeout, retry)
    #[arg(long)]
    config: Option<PathBuf>,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

// ── Logging ────────────────────────────────────────────────────────

fn log_level(verbose: u8) -> LogLevel {
    match verbose {
        0 => LogLevel::Warn,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

fn init_tracing(level: LogLevel) {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(level.as_level_filter());
    tracing_subscriber::registry().with(layer).init();
}

// ── Argument parsing ───────────────────────────────────────────────

fn split_pair<'a>(raw: &'a str, separator: char, what: &str) -> Result<(&'a str, &'a str), String> {
    raw.split_once(separator)
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("invalid {what} '{raw}': expected name{separator}value"))
}

/// Group repeated query names into arrays, keeping first-seen order.
fn group_query(raw: &[String]) -> Result<Vec<(String, Vec<String>)>, String> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for entry in raw {
        let (name, value) = split_pair(entry, '=', "query parameter")?;
        match grouped.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, values)) => values.push(value.to_string()),
            None => grouped.push((name.to_string(), vec![value.to_string()])),
        }
    }
    Ok(grouped)
}

/// Apply the options shared by plain requests and streams.
fn configure<B: RequestBuilder>(mut builder: B, cli: &Cli) -> Result<B, String> {
    for raw in &cli.headers {
        let (name, value) = split_pair(raw, ':', "header")?;
        builder = builder.header(name, value.to_string());
    }
    for raw in &cli.params {
        let (name, value) = split_pair(raw, '=', "path parameter")?;
        builder = builder.path_param(name, value.to_string());
    }
    for (name, mut values) in group_query(&cli.query)? {
        builder = match values.len() {
            1 => builder.query(name, values.remove(0)),
            _ => builder.query(name, values),
        };
    }
    if let Some(ms) = cli.timeout {
        builder = builder.timeout(Duration::from_millis(ms));
    }
    Ok(builder)
}

fn body(cli: &Cli) -> Result<Option<RequestBody>, String> {
    if let Some(raw) = &cli.json {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("--json is not valid JSON: {e}"))?;
        return Ok(Some(RequestBody::Json(value)));
    }
    Ok(cli.data.clone().map(RequestBody::text))
}

// ── Output ─────────────────────────────────────────────────────────

fn print_payload(payload: &Payload) -> Result<(), String> {
    let mut stdout = io::stdout().lock();
    let written = match payload {
        Payload::Empty => Ok(()),
        Payload::Json(value) => {
            let pretty = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
            writeln!(stdout, "{pretty}")
        }
        Payload::Text(text) => writeln!(stdout, "{text}"),
        Payload::Binary(bytes) => stdout.write_all(bytes),
    };
    written.map_err(|e| format!("failed to write output: {e}"))
}

fn print_progress(event: &ProgressEvent) {
    match event.total {
        Some(total) => eprintln!(
            "  [{:?}] {:>3}% ({}/{} bytes)",
            event.phase, event.percent, event.loaded, total
        ),
        None => eprintln!("  [{:?}] {:>3}% ({} bytes)", event.phase, event.percent, event.loaded),
    }
}

// ── Commands ───────────────────────────────────────────────────────

fn build_factory(cli: &Cli, level: LogLevel) -> Result<Factory, String> {
    let config = match &cli.config {
        Some(path) => FactoryConfig::load(path).map_err(|e| e.to_string())?,
        None => FactoryConfig::default(),
    };
    let factory = Factory::from_config(&config).map_err(|e| e.to_string())?;
    if config.log_level.is_none() {
        factory.default_log_level(level);
    }
    if cli.retries > 0 && !factory.has_feature(retry::FEATURE_NAME) {
        factory
            .use_feature(RetryFeature::default())
            .map_err(|e| e.to_string())?;
    }
    if cli.progress {
        factory
            .use_feature(UploadProgressFeature)
            .map_err(|e| e.to_string())?;
        factory
            .use_feature(DownloadProgressFeature)
            .map_err(|e| e.to_string())?;
    }
    Ok(factory)
}

async fn send_request(cli: &Cli, factory: &Factory) -> Result<Payload, String> {
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid method '{}'", cli.method))?;
    let mut request = configure(factory.request(method, &cli.url), cli)?;
    if let Some(body) = body(cli)? {
        request = request.body(body);
    }
    if cli.retries > 0 {
        let policy = RetryPolicy::new(cli.retries)
            .delay(Duration::from_millis(cli.retry_delay))
            .on_retry(|retry, error, delay| {
                let reason = error.map_or_else(|| "response".to_string(), |e| e.message.clone());
                eprintln!("  [retry {retry}] {reason}; waiting {}ms", delay.as_millis());
            });
        request = request.retry(policy);
    }
    if cli.progress {
        let throttle = Duration::from_millis(100);
        request = request
            .on_upload_progress(throttle, |event, _| print_progress(event))
            .on_download_progress(throttle, |event, _| print_progress(event));
    }
    request.execute().await.map_err(|e| e.to_string())
}

async fn follow_stream(cli: &Cli, factory: &Factory) -> Result<(), String> {
    let request = configure(factory.stream(&cli.url), cli)?.on_message(|payload: &Payload| {
        if let Err(e) = print_payload(payload) {
            eprintln!("  Warning: {e}");
        }
    });
    let subscription = request.execute().await.map_err(|e| e.to_string())?;
    tokio::select! {
        _ = subscription.closed() => {}
        _ = tokio::signal::ctrl_c() => subscription.close(),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = log_level(cli.verbose);
    init_tracing(level);

    let outcome = match build_factory(&cli, level) {
        Ok(factory) if cli.sse => follow_stream(&cli, &factory).await,
        Ok(factory) => send_request(&cli, &factory)
            .await
            .and_then(|payload| print_payload(&payload)),
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_trimmed_and_validated() {
        assert_eq!(split_pair("x-a: 1", ':', "header").unwrap(), ("x-a", "1"));
        assert_eq!(split_pair("k=a=b", '=', "query").unwrap(), ("k", "a=b"));
        assert!(split_pair("novalue", ':', "header").is_err());
        assert!(split_pair(": v", ':', "header").is_err());
    }

    #[test]
    fn repeated_query_names_group() {
        let raw = vec!["tag=a".to_string(), "page=2".to_string(), "tag=b".to_string()];
        assert_eq!(
            group_query(&raw).unwrap(),
            vec![
                ("tag".to_string(), vec!["a".to_string(), "b".to_string()]),
                ("page".to_string(), vec!["2".to_string()]),
            ]
        );
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(log_level(0), LogLevel::Warn);
        assert_eq!(log_level(2), LogLevel::Debug);
        assert_eq!(log_level(9), LogLevel::Trace);
    }

    #[test]
    fn cli_parses_request_options() {
        let cli = Cli::try_parse_from([
            "courier", "-X", "post", "/users/{{id}}", "-p", "id=7", "-H", "x: 1", "--json",
            "{\"a\":1}", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.method, "post");
        assert_eq!(cli.verbose, 2);
        assert!(matches!(body(&cli).unwrap(), Some(RequestBody::Json(_))));
        assert!(Cli::try_parse_from(["courier", "/", "--json", "{}", "--data", "x"]).is_err());
    }
}

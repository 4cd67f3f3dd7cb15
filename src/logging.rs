//! Tracing subscriber bootstrap shared by the server and the CLI.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Environment:
///   RUST_LOG            - standard env filter (default `lawdesk=info,tower_http=info`)
///   LAWDESK_LOG_FORMAT  - "json" or "text" (default "text")
///   LAWDESK_LOG_FILE    - path; when set, a daily-rolling file sink replaces stderr
///
/// The returned guard must stay alive for the life of the process or the
/// file sink loses buffered lines on exit. `try_init` also installs the `log`
/// bridge, so dependencies still on the `log` facade feed the same subscriber.
pub fn init() -> anyhow::Result<Option<WorkerGuard>> {
    let format = std::env::var("LAWDESK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let file = std::env::var("LAWDESK_LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lawdesk=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = file {
        let dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lawdesk.log");
        let appender = tracing_appender::rolling::daily(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        if format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .try_init()
                .context("install tracing subscriber")?;
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .try_init()
                .context("install tracing subscriber")?;
        }
        Some(guard)
    } else {
        if format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .context("install tracing subscriber")?;
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("install tracing subscriber")?;
        }
        None
    };

    tracing::debug!(
        target: "lawdesk",
        event = "logging_initialized",
        format = %format,
        file = file.as_deref().unwrap_or("(stderr)")
    );
    Ok(guard)
}

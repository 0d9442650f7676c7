//! Request logging

use std::time::Duration;

use http::{Request, Response};
use tower_http::trace::{MakeSpan, OnResponse};
use tracing::{Span, field::Empty, info};

/// Span maker and response logger for `TraceLayer`.
///
/// Only the path is recorded, the query string can carry OAuth codes and state.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSpanner;

impl<B> MakeSpan<B> for LoggingSpanner {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = request.uri().path(),
            version = ?request.version(),
            status_code = Empty,
        )
    }
}

impl<B> OnResponse<B> for LoggingSpanner {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status_code = response.status().as_u16();
        span.record("status_code", status_code);
        info!(
            status_code,
            latency_ms = latency.as_millis() as u64,
            "Request complete"
        );
    }
}

/// Default filter when `RUST_LOG` isn't set
pub const DEFAULT_LOG_FILTER: &str = "drivegate=info,tower_http=info";

pub fn setup_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
pub fn setup_test_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_test_writer()
                .with_level(true),
        )
        .with(tracing_subscriber::EnvFilter::new(
            "debug,hyper=info,hyper_util=info,h2=warn,rustls=info,reqwest=info",
        ))
        .try_init();
}

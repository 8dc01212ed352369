use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Covers both workspace crates and the Lambda binary's own spans.
pub const DEFAULT_LOG_FILTER: &str = "logstore_replication=info,replication_lambda=info";

/// One JSON object per line.
///
/// Every event lists the fields of all enclosing spans, so a retry warning
/// raised inside a `page` span still names the project, job and task of the
/// surrounding `replication` span.
pub fn json_layer<S, W>(make_writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(make_writer)
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(json_layer(std::io::stdout))
        .init();
}

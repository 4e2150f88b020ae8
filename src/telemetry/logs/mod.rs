use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, Layer};

/// A compact formatting layer on stderr, filtered by `filter`.
pub fn new<S>(filter: EnvFilter) -> Box<dyn Layer<S> + Send + Sync>
where
	S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
	tracing_subscriber::fmt::layer()
		.compact()
		.with_ansi(true)
		.with_file(cfg!(debug_assertions))
		.with_target(true)
		.with_line_number(cfg!(debug_assertions))
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_span_events(FmtSpan::NONE)
		.with_writer(std::io::stderr)
		.with_filter(filter)
		.boxed()
}

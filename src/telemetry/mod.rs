//! Log output for applications embedding the engine.
//!
//! The engine emits `tracing` events under the `spillsort` target. This
//! module installs a compact formatter on stderr, filtered by the
//! `SPILLSORT_LOG` environment variable, an explicit filter, or a log level.

mod logs;

use std::sync::LazyLock;

use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// The environment variable holding the default log filter directives.
pub static LOG_FILTER: LazyLock<Option<String>> =
	LazyLock::new(|| std::env::var("SPILLSORT_LOG").ok().filter(|v| !v.is_empty()));

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Default, Debug)]
pub struct Builder {
	log_level: Option<String>,
	filter: Option<EnvFilter>,
}

pub fn builder() -> Builder {
	Builder::default()
}

impl Builder {
	/// Set the log level on the builder
	pub fn with_log_level(mut self, log_level: &str) -> Self {
		self.log_level = Some(log_level.to_string());
		self
	}

	/// Set the filter on the builder
	pub fn with_filter(mut self, filter: EnvFilter) -> Self {
		self.filter = Some(filter);
		self
	}

	/// The filter to apply: an explicit filter, then the environment, then the log level.
	fn env_filter(self) -> EnvFilter {
		if let Some(filter) = self.filter {
			return filter;
		}
		if let Some(directives) = LOG_FILTER.as_deref() {
			match EnvFilter::try_new(directives) {
				Ok(filter) => return filter,
				Err(e) => {
					eprintln!("Ignoring invalid SPILLSORT_LOG directives '{directives}': {e}")
				}
			}
		}
		let level = self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
		EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
	}

	/// Build a tracing dispatcher with the fmt subscriber
	pub fn build(self) -> Box<dyn Subscriber + Send + Sync + 'static> {
		let registry = tracing_subscriber::registry();
		let registry = registry.with(logs::new(self.env_filter()));
		Box::new(registry)
	}

	/// Install the subscriber globally
	pub fn init(self) {
		self.build().init()
	}
}

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when set.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
	use tracing_subscriber::layer::SubscriberExt;
	use tracing_subscriber::util::SubscriberInitExt;

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(&config.filter));

	let registry = tracing_subscriber::registry().with(filter);
	match config.format {
		LogFormat::Text => registry
			.with(tracing_subscriber::fmt::layer().with_target(true))
			.try_init(),
		LogFormat::Json => registry
			.with(
				tracing_subscriber::fmt::layer()
					.json()
					.flatten_event(true)
					.with_current_span(false),
			)
			.try_init(),
	}
}

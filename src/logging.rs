use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "csv_etl=info";

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// dry-run CSV output. `RUST_LOG` overrides the default filter.
pub fn init_logging(json: bool) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(DEFAULT_DIRECTIVE),
    };
    let registry = tracing_subscriber::registry().with(filter);
    let writer = std::io::stderr;

    if json {
        registry.with(fmt::layer().json().with_writer(writer)).init();
    } else {
        registry.with(fmt::layer().with_writer(writer)).init();
    }
}

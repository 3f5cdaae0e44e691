/// Initialize logging
///
/// `RUST_LOG` wins over the verbosity flag. The agent passes `ansi = false`
/// because its output is redirected into a log file.
pub fn init_logging(verbose: bool, ansi: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(ansi))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber; `RUST_LOG` overrides the default level
///
/// Logs go to stderr so report tables on stdout stay clean.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bnf_map_checker={}", default_level)));

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}

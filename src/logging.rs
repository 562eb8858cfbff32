//! Diagnostic logging setup.
//!
//! Logs go to stderr so stdout stays reserved for transcribed text.

use tracing_subscriber::EnvFilter;

/// Default filter directive for the given CLI verbosity.
///
/// `RUST_LOG` overrides this when set.
pub fn default_directive(quiet: bool, verbose: u8) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn build_filter(quiet: bool, verbose: u8) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(quiet, verbose)))
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(quiet: bool, verbose: u8) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_filter(quiet, verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .try_init();

    if installed.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

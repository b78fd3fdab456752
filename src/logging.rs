use std::env;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once. Log lines go to stderr so stdout
/// stays reserved for the transcript. `DUALSCRIBE_LOG` takes the usual
/// filter syntax; `--verbose` bumps the default to debug.
pub fn init_logging(verbose: bool) {
    let _ = TRACING_INIT.get_or_init(|| {
        let default_level = if verbose { "debug" } else { "warn" };
        let filter = env::var("DUALSCRIBE_LOG")
            .ok()
            .and_then(|spec| EnvFilter::try_new(spec).ok())
            .unwrap_or_else(|| EnvFilter::new(default_level));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `verbose`. Logs go to
/// stderr so command output on stdout stays machine readable.
pub fn init(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}

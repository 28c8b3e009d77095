use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

/// Initialize tracing for the process.
///
/// Default: info for our crates, warn for everything else. Overridden by `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    let crate_name = service_name.replace('-', "_");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tgclone_core=info,tgclone_telegram=info,{crate_name}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::External(format!("logging init failed: {e}")))
}

use tracing_subscriber::{fmt, EnvFilter};

use crate::{DispatchError, DispatchResult};

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(json: bool) -> DispatchResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| DispatchError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}

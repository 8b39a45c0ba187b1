//! Logger bootstrap for the binary.

use env_logger::Env;

/// Initialise env_logger once; `RUST_LOG` overrides the default level.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

use crate::cli::ShopTunnelScenarioCli;
use clap::Parser;

/// Initialise logging for the runner. Logs at `info` unless `RUST_LOG` says otherwise.
///
/// Safe to call more than once, later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Initialise the CLI and logging for the shop tunnel runner.
pub fn init() -> ShopTunnelScenarioCli {
    init_logging();

    ShopTunnelScenarioCli::parse()
}

use std::process::ExitCode;

use clap::Parser;
use merch_shop::{scenario, MerchShopCli};
use shop_tunnel_runner::prelude::{init_logging, run};

/// Exit status when the run finished but a threshold did not hold.
const THRESHOLDS_FAILED: u8 = 99;

fn main() -> ExitCode {
    init_logging();
    let cli = MerchShopCli::parse();

    match run(scenario(cli)) {
        Ok(summary) if summary.passed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(THRESHOLDS_FAILED),
        Err(e) => {
            log::error!("Run failed: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

mod cli;
mod config;
mod context;
mod definition;
mod executor;
mod init;
mod monitor;
mod pool;
mod progress;
mod run;
mod schedule;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::ShopTunnelScenarioCli;
    pub use crate::config::{ConfigError, ConfigFile, ScenarioConfig};
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{RunnerContext, VuContext};
    pub use crate::definition::{HookResult, ScenarioDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::init::{init, init_logging};
    pub use crate::run::run;
    pub use crate::types::ShopTunnelResult;

    pub use shop_tunnel_core::prelude::*;
    pub use shop_tunnel_instruments::{AsOperation, Checks, Reporter};
    pub use shop_tunnel_summary_model::RunSummary;
}

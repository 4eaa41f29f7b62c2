use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use shop_client_instrumented::prelude::*;
use shop_tunnel_runner::prelude::*;

pub const AUTH_CHECK: &str = "auth status is 200 with token";
pub const INFO_CHECK: &str = "info status is 200";
pub const SEND_CHECK: &str = "send status is 200";
pub const BUY_CHECK: &str = "buy status is 200";

/// What to do with the rest of the iteration when the auth step doesn't return a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AuthFailurePolicy {
    /// Run the remaining steps with an empty bearer token, sent as `Authorization: Bearer `.
    ///
    /// The shop rejects this the same way it rejects any other invalid token, so the remaining
    /// steps fail their checks rather than being skipped.
    #[default]
    Continue,
    /// End the iteration after the auth step
    Abort,
}

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct MerchShopCli {
    #[command(flatten)]
    pub runner: ShopTunnelScenarioCli,

    /// Password used to authenticate every virtual user
    #[clap(long, default_value = "testpassword")]
    pub password: String,

    /// The user that coins are sent to
    #[clap(long, default_value = "testuser")]
    pub to_user: String,

    /// The number of coins sent in each iteration
    #[clap(long, default_value_t = 1)]
    pub amount: i32,

    /// The item bought in each iteration
    #[clap(long, default_value = "pen")]
    pub item: String,

    #[clap(long, value_enum, default_value_t = AuthFailurePolicy::Continue)]
    pub on_auth_failure: AuthFailurePolicy,
}

impl MerchShopCli {
    /// Scenario settings with the given runner flags.
    pub fn with_runner(runner: ShopTunnelScenarioCli) -> Self {
        Self {
            runner,
            password: "testpassword".to_string(),
            to_user: "testuser".to_string(),
            amount: 1,
            item: "pen".to_string(),
            on_auth_failure: AuthFailurePolicy::Continue,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShopSettings {
    pub password: String,
    pub to_user: String,
    pub amount: i32,
    pub item: String,
    pub on_auth_failure: AuthFailurePolicy,
}

#[derive(Debug, Default)]
pub struct ShopRunnerValues {
    pub settings: ShopSettings,
    warned_missing_token: AtomicBool,
}

impl UserValuesConstraint for ShopRunnerValues {}

impl ShopRunnerValues {
    fn warn_missing_token_once(&self, username: &str, status: u16) {
        if !self.warned_missing_token.swap(true, Ordering::Relaxed) {
            log::warn!(
                "Auth for {} returned status {} without a token, continuing with an empty bearer token. This is only reported once.",
                username,
                status
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct ShopVuValues {
    client: Option<MerchShopClient>,
}

impl UserValuesConstraint for ShopVuValues {}

/// State for a single iteration.
#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
}

impl Session {
    fn bearer(&self) -> &str {
        self.token.as_deref().unwrap_or_default()
    }
}

pub type ShopVuContext = VuContext<ShopRunnerValues, ShopVuValues>;

/// The username for a virtual user, stable for the whole run.
pub fn username(vu_id: usize) -> String {
    format!("testuser{vu_id}")
}

fn vu_setup(ctx: &mut ShopVuContext) -> HookResult {
    let client = MerchShopClient::new(ctx.runner_context().get_connection_string())?;
    ctx.get_mut().client = Some(client);

    Ok(())
}

fn iteration(ctx: &mut ShopVuContext) -> HookResult {
    let vu_id = ctx.vu_id();
    let username = username(vu_id);
    let runner_context = ctx.runner_context().clone();
    let settings = &runner_context.get().settings;
    let executor = runner_context.executor();
    let reporter = runner_context.reporter();
    let client = ctx
        .get()
        .client
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No client for vu-{vu_id}"))?;

    let mut session = Session::default();

    let auth = executor
        .execute_in_place(async { Ok(client.auth(&username, &settings.password).await) })?;
    Checks::new(&auth)
        .check(AUTH_CHECK, |r| {
            r.status() == 200 && r.json_str("token").is_some()
        })
        .record(reporter, vu_id);
    session.token = auth.json_str("token");

    if session.token.is_none() {
        match settings.on_auth_failure {
            AuthFailurePolicy::Abort => {
                return Err(IterationAbortError::new(format!(
                    "No token for {username}, auth returned status {}",
                    auth.status()
                ))
                .into());
            }
            AuthFailurePolicy::Continue => {
                runner_context
                    .get()
                    .warn_missing_token_once(&username, auth.status());
            }
        }
    }

    let info = executor.execute_in_place(async { Ok(client.info(session.bearer()).await) })?;
    Checks::new(&info)
        .check(INFO_CHECK, |r| r.status() == 200)
        .record(reporter, vu_id);

    let send = executor.execute_in_place(async {
        Ok(client
            .send_coin(session.bearer(), &settings.to_user, settings.amount)
            .await)
    })?;
    Checks::new(&send)
        .check(SEND_CHECK, |r| r.status() == 200)
        .record(reporter, vu_id);

    let buy = executor
        .execute_in_place(async { Ok(client.buy(session.bearer(), &settings.item).await) })?;
    Checks::new(&buy)
        .check(BUY_CHECK, |r| r.status() == 200)
        .record(reporter, vu_id);

    Ok(())
}

/// The merch shop scenario with its default load profile and thresholds.
pub fn scenario(cli: MerchShopCli) -> ScenarioDefinitionBuilder<ShopRunnerValues, ShopVuValues> {
    let settings = ShopSettings {
        password: cli.password,
        to_user: cli.to_user,
        amount: cli.amount,
        item: cli.item,
        on_auth_failure: cli.on_auth_failure,
    };

    ScenarioDefinitionBuilder::new(env!("CARGO_PKG_NAME"), cli.runner)
        .with_default_connection_string("http://localhost:8080")
        .with_default_arrival_rate(250, Duration::from_secs(1))
        .with_default_duration_s(100)
        .with_default_vus(300, 100_000)
        .with_default_threshold("http_req_failed", "rate<0.0001")
        .with_default_threshold("http_req_duration", "med<50")
        .with_runner_values(ShopRunnerValues {
            settings,
            ..Default::default()
        })
        .use_vu_setup(vu_setup)
        .use_iteration(iteration)
}

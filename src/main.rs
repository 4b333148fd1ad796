//! regulatord - HTTP + WebSocket shell around one regulator Controller.
//!
//! Hosts normally push state snapshots through `POST /tick` or the WebSocket
//! `tick` envelope. `--demo` instead drives the pipeline from a built-in
//! synthetic economy, which is handy for poking at the API surface.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regulator_backend::{
    api::{self, AppState},
    models::{
        EconomicEvent, EconomyState, EventKind, FlowImpact, ParameterScope, RegisteredParameter,
    },
    Controller, Mode, RegulatorConfig, SimHostAdapter, TransportConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "regulatord", about = "Autonomous economy regulator daemon")]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// "autonomous" applies plans; "advisor" only recommends.
    #[arg(long, env = "REGULATOR_MODE", default_value = "autonomous")]
    mode: String,

    /// Bearer token required on mutation routes when set.
    #[arg(long, env = "REGULATOR_API_KEY")]
    api_key: Option<String>,

    /// Drive the pipeline from a built-in synthetic economy.
    #[arg(long, env = "REGULATOR_DEMO", default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();
    let args = Args::parse();

    let mut config = RegulatorConfig::from_env();
    config.mode = match args.mode.as_str() {
        "advisor" => Mode::Advisor,
        _ => Mode::Autonomous,
    };
    config.parameters = default_parameters();

    let mut transport = TransportConfig::from_env();
    transport.port = args.port;
    if args.api_key.is_some() {
        transport.api_key = args.api_key.clone();
    }

    info!(
        mode = config.mode.as_str(),
        grace_period = config.grace_period,
        check_interval = config.check_interval,
        parameters = config.parameters.len(),
        "regulator starting"
    );

    let adapter = Arc::new(SimHostAdapter::new(demo_state(0)));
    let controller = Controller::new(config, adapter.clone());
    let state = AppState::new(controller, transport);

    if args.demo {
        info!("demo economy enabled: self-driving one tick per second");
        tokio::spawn(demo_loop(state.clone(), adapter));
    }

    let app = api::router(state);
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("regulator API listening on {addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regulator_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Starter registry for the demo host: one knob per common parameter type.
fn default_parameters() -> Vec<RegisteredParameter> {
    let param = |key: &str, param_type: &str, flow_impact, value: f64| RegisteredParameter {
        key: key.to_string(),
        param_type: param_type.to_string(),
        flow_impact,
        scope: Some(ParameterScope::currency("gold")),
        current_value: Some(value),
        description: None,
    };
    vec![
        param("market_fee", "fee", FlowImpact::Sink, 0.05),
        param("transfer_tax", "tax", FlowImpact::Sink, 0.02),
        param("crafting_cost", "cost", FlowImpact::Sink, 10.0),
        param("daily_reward", "reward", FlowImpact::Faucet, 25.0),
        param("quest_yield", "yield", FlowImpact::Faucet, 5.0),
        param("mine_faucet_rate", "faucet_rate", FlowImpact::Faucet, 1.0),
        param("repair_sink_rate", "sink_rate", FlowImpact::Sink, 1.0),
        param("ore_drop_rate", "drop_rate", FlowImpact::Neutral, 0.3),
    ]
}

/// Synthetic three-role economy used by `--demo`.
fn demo_state(tick: u64) -> EconomyState {
    let mut state = EconomyState {
        tick,
        roles: vec!["trader".into(), "producer".into(), "consumer".into()],
        resources: vec!["ore".into(), "tools".into()],
        currencies: vec!["gold".into()],
        ..Default::default()
    };
    for i in 0..30 {
        let agent = format!("agent-{i}");
        let role = state.roles[i % 3].clone();
        state
            .agent_balances
            .insert(agent.clone(), HashMap::from([("gold".into(), 100.0)]));
        state.agent_roles.insert(agent.clone(), role);
        state
            .agent_inventories
            .insert(agent, HashMap::from([("ore".into(), 5.0), ("tools".into(), 1.0)]));
    }
    state
        .market_prices
        .insert("gold".into(), HashMap::from([("ore".into(), 4.0), ("tools".into(), 20.0)]));
    state
}

/// Random-walks the demo economy and feeds it through the controller.
async fn demo_loop(state: AppState, adapter: Arc<SimHostAdapter>) {
    let mut rng = ChaCha8Rng::from_entropy();
    let mut economy = demo_state(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        ticker.tick().await;

        // Drift balances and prices a little each tick.
        for balances in economy.agent_balances.values_mut() {
            if let Some(gold) = balances.get_mut("gold") {
                *gold = (*gold + rng.gen_range(-3.0..4.0)).max(0.0);
            }
        }
        if let Some(prices) = economy.market_prices.get_mut("gold") {
            for price in prices.values_mut() {
                *price = (*price * rng.gen_range(0.97..1.03)).max(0.1);
            }
        }
        economy.recent_transactions = demo_events(&mut rng, economy.tick);

        adapter.put_state(economy.clone());
        let mut controller = state.controller.lock().await;
        match controller.tick(None).await {
            Ok(outcome) => {
                if !outcome.adjustments.is_empty() {
                    info!(
                        tick = outcome.tick,
                        adjustments = outcome.adjustments.len(),
                        "demo tick applied adjustments"
                    );
                }
            }
            Err(err) => warn!(error = %err, "demo tick failed"),
        }
        drop(controller);

        economy.tick += 1;
    }
}

fn demo_events(rng: &mut ChaCha8Rng, tick: u64) -> Vec<EconomicEvent> {
    let mut events = Vec::new();
    for i in 0..rng.gen_range(3..10) {
        let actor = format!("agent-{}", rng.gen_range(0..30));
        let event = match i % 3 {
            0 => EconomicEvent::new(EventKind::Mint, actor, rng.gen_range(1.0..8.0))
                .with_currency("gold")
                .with_system("mining")
                .with_source_or_sink("daily_mine"),
            1 => EconomicEvent::new(EventKind::Burn, actor, rng.gen_range(1.0..6.0))
                .with_currency("gold")
                .with_system("repair")
                .with_source_or_sink("tool_repair"),
            _ => EconomicEvent::new(EventKind::Trade, actor, 1.0)
                .with_currency("gold")
                .with_resource("ore")
                .with_price(rng.gen_range(3.0..5.0)),
        };
        let mut event = event;
        event.timestamp = tick;
        events.push(event);
    }
    events
}

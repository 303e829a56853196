/// Metrics collection and reporting module
///
/// Counters for dispatched trades, DCA cycles, limit-order closures and
/// cross-chain polling, exposed through a Prometheus listener when enabled.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, increment_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metrics namespace
const NAMESPACE: &str = "tradeflow";

const TRADES: &str = "tradeflow_trades_total";
const DCA_CYCLES: &str = "tradeflow_dca_cycles_total";
const LIMIT_ORDER_CLOSURES: &str = "tradeflow_limit_order_closures_total";
const CROSS_CHAIN_POLLS: &str = "tradeflow_cross_chain_polls_total";
const SECRETS_DISCLOSED: &str = "tradeflow_cross_chain_secrets_disclosed_total";

/// Install the Prometheus exporter on `0.0.0.0:port`
pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!(TRADES, "Dispatched trades by operation and outcome");
    describe_counter!(DCA_CYCLES, "DCA cycles by outcome");
    describe_counter!(LIMIT_ORDER_CLOSURES, "Limit-order closures by reason");
    describe_counter!(CROSS_CHAIN_POLLS, "Cross-chain status polls");
    describe_counter!(SECRETS_DISCLOSED, "Cross-chain secrets disclosed");

    info!("{} metrics exposed on {}", NAMESPACE, addr);
    Ok(())
}

pub fn record_trade(chain: &str, operation: &str, outcome: &str) {
    increment_counter!(TRADES, "chain" => chain.to_string(), "operation" => operation.to_string(), "outcome" => outcome.to_string());
}

pub fn record_dca_cycle(chain: &str, outcome: &str) {
    increment_counter!(DCA_CYCLES, "chain" => chain.to_string(), "outcome" => outcome.to_string());
}

pub fn record_limit_order_closure(chain: &str, reason: &str) {
    increment_counter!(LIMIT_ORDER_CLOSURES, "chain" => chain.to_string(), "reason" => reason.to_string());
}

pub fn record_cross_chain_poll() {
    increment_counter!(CROSS_CHAIN_POLLS);
}

pub fn record_secret_disclosed() {
    increment_counter!(SECRETS_DISCLOSED);
}

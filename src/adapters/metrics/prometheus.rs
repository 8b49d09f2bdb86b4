//! Prometheus Metrics Registry - Relayer Observability
//!
//! Registers and exposes Prometheus metrics for the rebalancer daemon:
//! run outcomes, per-signer actions, ether moved, and the last observed
//! balances of every signer and of the treasury.

use std::sync::Arc;

use alloy::primitives::U256;
use alloy::primitives::utils::format_ether;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::usecases::rebalancer::{FundingAction, RebalanceReport};

/// Centralized Prometheus metrics for the relayer.
///
/// All metrics follow the naming convention `relayer_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Rebalance runs by outcome (`ok`, `error`, `skipped`).
    pub rebalance_runs: IntCounterVec,
    /// Per-signer actions taken by rebalance runs.
    pub signer_actions: IntCounterVec,
    /// Total ether sent from the treasury.
    pub ether_transferred: prometheus::Counter,
    /// Last observed signer balance (ether).
    pub signer_balance: GaugeVec,
    /// Last observed treasury balance (ether).
    pub treasury_balance: Gauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let rebalance_runs = IntCounterVec::new(
            Opts::new("relayer_rebalance_runs_total", "Rebalance runs by outcome"),
            &["outcome"],
        )?;

        let signer_actions = IntCounterVec::new(
            Opts::new(
                "relayer_rebalance_signer_actions_total",
                "Per-signer rebalance actions",
            ),
            &["action"],
        )?;

        let ether_transferred = prometheus::Counter::new(
            "relayer_rebalance_ether_transferred_total",
            "Ether sent from the treasury to pool signers",
        )?;

        let signer_balance = GaugeVec::new(
            Opts::new(
                "relayer_signer_balance_ether",
                "Signer balance observed by the last rebalance run",
            ),
            &["index", "address"],
        )?;

        let treasury_balance = Gauge::new(
            "relayer_treasury_balance_ether",
            "Treasury balance at the start of the last rebalance run",
        )?;

        // Register all metrics
        registry.register(Box::new(rebalance_runs.clone()))?;
        registry.register(Box::new(signer_actions.clone()))?;
        registry.register(Box::new(ether_transferred.clone()))?;
        registry.register(Box::new(signer_balance.clone()))?;
        registry.register(Box::new(treasury_balance.clone()))?;

        Ok(Self {
            registry,
            rebalance_runs,
            signer_actions,
            ether_transferred,
            signer_balance,
            treasury_balance,
        })
    }

    /// Record a completed rebalance run.
    pub fn record_rebalance(&self, report: &RebalanceReport) {
        self.rebalance_runs.with_label_values(&["ok"]).inc();
        self.treasury_balance
            .set(ether_f64(report.treasury_initial_balance));
        self.ether_transferred
            .inc_by(ether_f64(report.total_transferred()));

        for entry in &report.signers {
            let action = match entry.action {
                FundingAction::Sufficient => "sufficient",
                FundingAction::ToppedUp { .. } => "topped_up",
                FundingAction::Failed { .. } => "failed",
            };
            self.signer_actions.with_label_values(&[action]).inc();

            if let Some(prior) = entry.prior_balance {
                let observed = prior + entry.transferred().unwrap_or_default();
                self.signer_balance
                    .with_label_values(&[&entry.index.to_string(), &entry.address.to_string()])
                    .set(ether_f64(observed));
            }
        }
    }

    /// Record a run that did not produce a report.
    pub fn record_rebalance_failure(&self, outcome: &str) {
        self.rebalance_runs.with_label_values(&[outcome]).inc();
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    metrics.render().map_err(|e| {
                        error!(error = %e, "Failed to encode metrics");
                        StatusCode::INTERNAL_SERVER_ERROR
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

/// Wei to ether as a float, for gauges only.
fn ether_f64(wei: U256) -> f64 {
    format_ether(wei).parse().unwrap_or(0.0)
}

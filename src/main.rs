//! Meta-transaction Relayer - Entry Point
//!
//! Loads configuration, initializes logging, connects to the chain and
//! dispatches one of the CLI subcommands.
//!
//! Wiring sequence:
//! 1. Parse CLI, load config.toml + env key overrides, validate
//! 2. Init tracing (JSON structured logging)
//! 3. Connect the chain provider, build the ledger client
//! 4. Build the signer pool, treasury, relay and rebalancer
//! 5. Run the requested subcommand
//!
//! `run` spawns the health server on :8080, the metrics server on
//! :9090 and the periodic rebalancer, and waits for SIGINT.

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bytes, U256};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use meta_relayer::adapters::chain::{AlloyLedger, ChainProvider};
use meta_relayer::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use meta_relayer::adapters::proof::{HttpProofSource, ProofClientConfig};
use meta_relayer::config::{self, AppConfig};
use meta_relayer::domain::wei_to_ether;
use meta_relayer::ports::{LedgerClient, ProofSource, TxRequest};
use meta_relayer::usecases::{
    BalanceRebalancer, CallTemplate, RebalanceError, RelayCall, TransactionRelay,
};

/// Rotating-signer meta-transaction relayer.
#[derive(Debug, Parser)]
#[command(name = "meta-relayer", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the rebalancer periodically with health and metrics servers.
    Run,
    /// Run one rebalance pass and print the report as JSON.
    Rebalance,
    /// Relay one call to the venue contract.
    ///
    /// Either pass pre-encoded `--calldata`, or a `--function` signature
    /// with one `--arg` per parameter. Arguments `@signer` and `@proof`
    /// are filled in for each signer tried; `@proof` is fetched once for
    /// `--asset-id` before any signer is used.
    Relay {
        /// Hex calldata (with or without 0x).
        #[arg(long, required_unless_present = "function", conflicts_with = "function")]
        calldata: Option<String>,
        /// Function signature, e.g. `executeCloseMarket(address,uint256,bytes,uint256,bytes)`.
        #[arg(long)]
        function: Option<String>,
        /// Function argument, repeated in parameter order.
        #[arg(long = "arg", requires = "function", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Asset id whose proof replaces `@proof`.
        #[arg(long, requires = "function")]
        asset_id: Option<u64>,
        /// Native value to attach, in wei.
        #[arg(long, default_value = "0")]
        value_wei: String,
    },
    /// List pool signers and the treasury with their balances.
    Signers,
    /// Fetch the current proof for an asset and print it as hex.
    Proof {
        /// Asset (pair) id understood by the proof service.
        asset_id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── 1. Load configuration ───────────────────────────────
    let config = config::loader::load_config(&cli.config).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.relayer.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.relayer.name,
        version = env!("CARGO_PKG_VERSION"),
        signers = config.signers.private_keys.len(),
        "Starting meta-transaction relayer"
    );

    // ── 3. Chain access ─────────────────────────────────────
    let provider = Arc::new(
        ChainProvider::connect(&config.chain.rpc_url, config.chain.expected_chain_id)
            .await
            .context("Failed to connect to chain RPC")?,
    );
    let ledger = Arc::new(AlloyLedger::new(
        Arc::clone(&provider),
        Duration::from_millis(config.chain.receipt_poll_interval_ms),
    ));

    // ── 4. Identities ───────────────────────────────────────
    let pool = Arc::new(config.signer_pool()?);
    let treasury = config.treasury_signer()?;

    match cli.command {
        Command::Run => {
            let rebalancer = BalanceRebalancer::new(
                Arc::clone(&ledger),
                Arc::clone(&pool),
                treasury,
                config.threshold_wei()?,
            );
            run_daemon(&config, provider, rebalancer).await
        }
        Command::Rebalance => {
            let rebalancer =
                BalanceRebalancer::new(Arc::clone(&ledger), Arc::clone(&pool), treasury, config.threshold_wei()?);
            let report = rebalancer.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Relay {
            calldata,
            function,
            args,
            asset_id,
            value_wei,
        } => {
            let value = U256::from_str(value_wei.trim()).context("Invalid --value-wei")?;
            let venue = config.venue_contract()?;
            let relay = TransactionRelay::with_options(ledger, pool, config.relay_options());

            let receipt = match (calldata, function) {
                (Some(calldata), _) => {
                    let input = Bytes::from_str(calldata.trim()).context("Invalid --calldata hex")?;
                    relay
                        .relay(|_signer| {
                            Ok(RelayCall {
                                request: TxRequest {
                                    to: venue,
                                    value,
                                    input: input.clone(),
                                },
                                context: (),
                            })
                        })
                        .await?
                }
                (None, Some(signature)) => {
                    let template = CallTemplate::parse(&signature, &args)?;
                    info!(function = %template.signature(), asset_id, "Relaying encoded call");

                    match asset_id {
                        Some(asset_id) => {
                            let proofs = proof_source(&config)?;
                            relay
                                .relay_with_proof(&proofs, asset_id, |signer, proof| {
                                    Ok(RelayCall {
                                        request: TxRequest {
                                            to: venue,
                                            value,
                                            input: template.encode(signer.address(), Some(proof))?,
                                        },
                                        context: (),
                                    })
                                })
                                .await?
                        }
                        None if template.needs_proof() => {
                            bail!("{} takes @proof; pass --asset-id", template.signature())
                        }
                        None => {
                            relay
                                .relay(|signer| {
                                    Ok(RelayCall {
                                        request: TxRequest {
                                            to: venue,
                                            value,
                                            input: template.encode(signer.address(), None)?,
                                        },
                                        context: (),
                                    })
                                })
                                .await?
                        }
                    }
                }
                (None, None) => bail!("one of --calldata or --function is required"),
            };
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(())
        }
        Command::Signers => list_signers(ledger.as_ref(), &pool, &treasury).await,
        Command::Proof { asset_id } => {
            let proof = proof_source(&config)?.fetch_proof(asset_id).await?;
            println!("{proof}");
            Ok(())
        }
    }
}

/// Periodic rebalancing with health/metrics servers until SIGINT.
async fn run_daemon(
    config: &AppConfig,
    provider: Arc<ChainProvider>,
    rebalancer: BalanceRebalancer<AlloyLedger>,
) -> Result<()> {
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let health = Arc::new(HealthState::new());

    // ── Health server ───────────────────────────────────────
    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    // ── Metrics server ──────────────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new()?);
    let metrics_handle = if config.metrics.enabled {
        let server = Arc::clone(&metrics);
        let bind = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve(bind, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    // ── Rebalancer loop ─────────────────────────────────────
    let mut rebalance_shutdown = shutdown_tx.subscribe();
    let loop_health = Arc::clone(&health);
    let period = Duration::from_secs(config.rebalance.interval_seconds);
    let rebalancer_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop_health.rebalancer_running.store(true, Ordering::Relaxed);

        loop {
            tokio::select! {
                biased;
                _ = rebalance_shutdown.recv() => {
                    info!("Rebalancer received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let chain_ok = provider.is_healthy().await;
                    loop_health.chain_healthy.store(chain_ok, Ordering::Relaxed);
                    if !chain_ok {
                        warn!("Chain RPC health check failed");
                    }

                    match rebalancer.run().await {
                        Ok(report) => metrics.record_rebalance(&report),
                        Err(RebalanceError::AlreadyRunning) => {
                            metrics.record_rebalance_failure("skipped");
                        }
                        Err(e) => {
                            error!(error = %e, "Rebalance run failed");
                            metrics.record_rebalance_failure("error");
                        }
                    }
                }
            }
        }

        loop_health.rebalancer_running.store(false, Ordering::Relaxed);
    });

    info!("All tasks spawned - relayer is running");

    // ── Wait for SIGINT ─────────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    let _ = shutdown_tx.send(());
    health.rebalancer_running.store(false, Ordering::Relaxed);

    // A run in flight finishes its current transfer wait first.
    let _ = tokio::time::timeout(Duration::from_secs(30), rebalancer_handle).await;
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn proof_source(config: &AppConfig) -> Result<HttpProofSource> {
    Ok(HttpProofSource::new(ProofClientConfig {
        base_url: config.proof.base_url.clone(),
        timeout: Duration::from_secs(config.proof.timeout_seconds),
    })?)
}

async fn list_signers(
    ledger: &AlloyLedger,
    pool: &meta_relayer::domain::SignerPool,
    treasury: &meta_relayer::domain::Signer,
) -> Result<()> {
    for signer in pool.iter().chain(std::iter::once(treasury)) {
        let balance = match ledger.balance(signer.address()).await {
            Ok(wei) => format!("{} ETH", wei_to_ether(wei)),
            Err(e) => format!("unavailable ({e})"),
        };
        println!("{:<10} {}  {balance}", signer.role().to_string(), signer.address());
    }
    Ok(())
}

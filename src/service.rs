//! Starts and supervises the long running control loops.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256};
use tokio::task::JoinSet;

use crate::batch_request::BatchRequester;
use crate::config::OrchestratorConfig;
use crate::context::OrchestratorContext;
use crate::error::Result;
use crate::ethereum::EthereumBridge;
use crate::home::HomeChain;
use crate::loops::run_loop;
use crate::price_oracle::PriceFeed;
use crate::relayer::Relayer;
use crate::signer::Signer;

/// Owns the three duties and the handles they share. Clients are built
/// once and shared by reference for the process lifetime; the loops hold
/// no other state between ticks.
pub struct Orchestrator {
    signer: Signer,
    relayer: Relayer,
    batch_requester: BatchRequester,
    batch_requesting_enabled: bool,
    loop_duration: Duration,
}

impl Orchestrator {
    /// Wires the duties up from the shared clients and config.
    pub fn new(
        home: Arc<dyn HomeChain>,
        bridge: Arc<dyn EthereumBridge>,
        price_feed: Arc<dyn PriceFeed>,
        orchestrator_address: String,
        eth_address: Address,
        peg_id: H256,
        config: &OrchestratorConfig,
    ) -> Self {
        let signer = Signer::new(
            home.clone(),
            orchestrator_address,
            eth_address,
            peg_id,
        );
        let relayer = Relayer::new(
            home.clone(),
            bridge,
            peg_id,
            config.relayer.relay_valsets,
            config.relayer.valset_offset(),
            config.relayer.relay_batches,
            config.relayer.batch_offset(),
        );
        let batch_requester = BatchRequester::new(
            home,
            price_feed,
            config.batch_requester.min_batch_fee_usd,
            config.batch_requester.denom_prefix.clone(),
            config.batch_requester.erc20_denoms.clone(),
        );
        Self {
            signer,
            relayer,
            batch_requester,
            batch_requesting_enabled: config.batch_requester.enabled,
            loop_duration: config.relayer.loop_duration(),
        }
    }

    /// Runs every duty until shutdown or the first fatal error. Validators
    /// run all three loops; everyone else only relays, since the home
    /// chain would reject confirmations and batch requests from a key
    /// outside the valset anyway. Each loop runs in its own task so a
    /// panic in one cannot tear down the others.
    pub async fn run(
        self: Arc<Self>,
        ctx: OrchestratorContext,
        is_validator: bool,
    ) -> Result<()> {
        let period = self.loop_duration;
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        if is_validator {
            let me = self.clone();
            let shutdown = ctx.shutdown_signal();
            tasks.spawn(async move {
                run_loop(shutdown, period, "signer", || me.signer.tick()).await
            });
        }
        {
            let me = self.clone();
            let shutdown = ctx.shutdown_signal();
            tasks.spawn(async move {
                run_loop(shutdown, period, "relayer", || me.relayer.tick())
                    .await
            });
        }
        if is_validator && self.batch_requesting_enabled {
            let me = self.clone();
            let shutdown = ctx.shutdown_signal();
            tasks.spawn(async move {
                run_loop(shutdown, period, "batch requester", || {
                    me.batch_requester.tick()
                })
                .await
            });
        } else if !self.batch_requesting_enabled {
            tracing::info!("periodic batch requesting is disabled");
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // fatal: stop the siblings and surface the error
                    ctx.shutdown();
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("an orchestrator loop panicked: {}", e);
                }
            }
        }
        Ok(())
    }
}

//! Foreign chain client.
//!
//! The loops consume the bridge contract through the [`EthereumBridge`]
//! trait. The production implementation wraps the deployed contract with a
//! signing middleware, prices gas within the configured adjustment and
//! ceiling, and keeps a short memory of submitted calldata so the same
//! payload is not resubmitted while a previous attempt may still be in the
//! mempool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider, StreamExt, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use tokio::sync::Mutex;

use crate::config::EthereumConfig;
use crate::context::Shutdown;
use crate::error::{BridgeMiddleware, Error, Result};
use crate::types::{TxBatch, Valset};

abigen!(
    BridgeContract,
    r#"[
        function state_pegId() external view returns (bytes32)
        function state_lastValsetNonce() external view returns (uint256)
        function lastBatchNonce(address _erc20Address) external view returns (uint256)
        function updateValset(address[] _newValidators, uint256[] _newPowers, uint256 _newValsetNonce, address[] _currentValidators, uint256[] _currentPowers, uint256 _currentValsetNonce, uint8[] _v, bytes32[] _r, bytes32[] _s) external
        function submitBatch(address[] _currentValidators, uint256[] _currentPowers, uint256 _currentValsetNonce, uint8[] _v, bytes32[] _r, bytes32[] _s, uint256[] _amounts, address[] _destinations, uint256[] _fees, uint256 _batchNonce, address _tokenContract, uint256 _batchTimeout) external
    ]"#
);

/// One validator signature in contract order. Members that did not confirm
/// get a zero placeholder; the contract skips `v == 0` entries when it
/// tallies power.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigParts {
    /// Recovery id, 27 or 28, or 0 for a placeholder.
    pub v: u8,
    /// Signature `r` word.
    pub r: [u8; 32],
    /// Signature `s` word.
    pub s: [u8; 32],
}

/// Read/write facade over the bridge contract.
#[async_trait]
pub trait EthereumBridge: Send + Sync {
    /// Domain separator of the deployed bridge instance.
    async fn peg_id(&self) -> Result<H256>;

    /// Nonce of the valset currently installed on the contract.
    async fn get_valset_nonce(&self) -> Result<u64>;

    /// Last executed batch nonce for a token.
    async fn get_batch_nonce(&self, token: Address) -> Result<u64>;

    /// Current foreign chain block height.
    async fn latest_block_height(&self) -> Result<u64>;

    /// Submits a valset transition. `sigs` must be ordered to match
    /// `current_valset.members`.
    async fn send_valset_update(
        &self,
        new_valset: &Valset,
        current_valset: &Valset,
        sigs: &[SigParts],
    ) -> Result<()>;

    /// Submits a batch for execution. `sigs` must be ordered to match
    /// `current_valset.members`.
    async fn send_batch(
        &self,
        batch: &TxBatch,
        current_valset: &Valset,
        sigs: &[SigParts],
    ) -> Result<()>;
}

struct PendingInput {
    input: Bytes,
    seen: Instant,
}

/// Production [`EthereumBridge`] over an http provider and a local wallet.
pub struct PegBridge {
    contract: BridgeContract<BridgeMiddleware>,
    provider: Provider<Http>,
    gas_price_adjustment: f64,
    max_gas_price: U256,
    pending_tx_wait: Duration,
    pending: Mutex<Vec<PendingInput>>,
}

impl PegBridge {
    /// Connects to the configured RPC endpoint and binds the contract.
    pub fn connect(
        config: &EthereumConfig,
        wallet: LocalWallet,
        pending_tx_wait: Duration,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_endpoint.as_str())?
            .interval(Duration::from_secs(7));
        let wallet = wallet.with_chain_id(config.chain_id);
        let client =
            Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        let contract = BridgeContract::new(config.contract_address, client);
        let max_gas_price =
            U256::from(config.max_gas_price_gwei) * U256::exp10(9);
        Ok(Self {
            contract,
            provider,
            gas_price_adjustment: config.gas_price_adjustment,
            max_gas_price,
            pending_tx_wait,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Suggested gas price scaled by the configured adjustment, checked
    /// against the ceiling.
    async fn gas_price(&self) -> Result<U256> {
        let suggested = self.provider.get_gas_price().await?;
        let scale = (self.gas_price_adjustment * 100.0).round() as u64;
        let adjusted = suggested
            .saturating_mul(U256::from(scale))
            .checked_div(U256::from(100u64))
            .unwrap_or(suggested);
        if adjusted > self.max_gas_price {
            return Err(Error::GasPriceTooHigh {
                required: adjusted,
                maximum: self.max_gas_price,
            });
        }
        Ok(adjusted)
    }

    async fn is_pending(&self, input: &Bytes) -> bool {
        let mut pending = self.pending.lock().await;
        let wait = self.pending_tx_wait;
        pending.retain(|p| p.seen.elapsed() < wait);
        pending.iter().any(|p| p.input == *input)
    }

    async fn record_pending(&self, input: Bytes) {
        self.pending.lock().await.push(PendingInput {
            input,
            seen: Instant::now(),
        });
    }

    /// Sends a prepared contract call, waiting for its receipt. Identical
    /// calldata inside the wait window is skipped so racing relayers (or a
    /// slow mempool) do not trigger duplicate submissions.
    async fn submit(
        &self,
        call: ethers::contract::ContractCall<BridgeMiddleware, ()>,
        what: &str,
    ) -> Result<()> {
        let input = call
            .calldata()
            .ok_or(Error::Generic("contract call without calldata"))?;
        if self.is_pending(&input).await {
            tracing::debug!(
                "an identical {} submission is still pending, skipping",
                what
            );
            return Ok(());
        }
        let call = call.gas_price(self.gas_price().await?);
        self.record_pending(input).await;

        let pending = call.send().await?;
        let tx_hash = pending.tx_hash();
        tracing::debug!("{} submission {:?} is in the mempool", what, tx_hash);
        match pending.await? {
            Some(receipt) if receipt.status == Some(1u64.into()) => {
                tracing::info!(
                    "{} submission mined in tx {:?}",
                    what,
                    receipt.transaction_hash
                );
                Ok(())
            }
            Some(receipt) => {
                Err(Error::SubmissionReverted(receipt.transaction_hash))
            }
            None => Err(Error::Generic("submission dropped from the mempool")),
        }
    }

    /// Watches the mempool over WebSocket and remembers calldata of
    /// transactions addressed to the bridge, extending the dedup window to
    /// submissions made by other relayers. Purely an optimization; the
    /// contract's nonce checks keep things correct without it.
    pub async fn watch_pending_txs(
        self: Arc<Self>,
        ws_endpoint: url::Url,
        mut shutdown: Shutdown,
    ) -> Result<()> {
        let ws = Provider::<Ws>::connect(ws_endpoint.as_str()).await?;
        let mut stream = ws.subscribe_full_pending_txs().await?;
        let bridge = self.contract.address();
        tracing::debug!("watching pending txs for {:?}", bridge);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                tx = stream.next() => match tx {
                    Some(tx) if tx.to == Some(bridge) => {
                        self.record_pending(tx.input).await;
                    }
                    Some(_) => {}
                    None => {
                        tracing::warn!("pending tx subscription closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn member_arrays(valset: &Valset) -> (Vec<Address>, Vec<U256>) {
    valset
        .members
        .iter()
        .map(|m| (m.eth_address, U256::from(m.power)))
        .unzip()
}

fn sig_arrays(sigs: &[SigParts]) -> (Vec<u8>, Vec<[u8; 32]>, Vec<[u8; 32]>) {
    let v = sigs.iter().map(|s| s.v).collect();
    let r = sigs.iter().map(|s| s.r).collect();
    let s = sigs.iter().map(|s| s.s).collect();
    (v, r, s)
}

#[async_trait]
impl EthereumBridge for PegBridge {
    async fn peg_id(&self) -> Result<H256> {
        let id = self.contract.state_peg_id().call().await?;
        Ok(H256::from(id))
    }

    async fn get_valset_nonce(&self) -> Result<u64> {
        let nonce = self.contract.state_last_valset_nonce().call().await?;
        Ok(nonce.as_u64())
    }

    async fn get_batch_nonce(&self, token: Address) -> Result<u64> {
        let nonce = self.contract.last_batch_nonce(token).call().await?;
        Ok(nonce.as_u64())
    }

    async fn latest_block_height(&self) -> Result<u64> {
        let height = self.provider.get_block_number().await?;
        Ok(height.as_u64())
    }

    async fn send_valset_update(
        &self,
        new_valset: &Valset,
        current_valset: &Valset,
        sigs: &[SigParts],
    ) -> Result<()> {
        let (new_validators, new_powers) = member_arrays(new_valset);
        let (current_validators, current_powers) = member_arrays(current_valset);
        let (v, r, s) = sig_arrays(sigs);
        let call = self.contract.update_valset(
            new_validators,
            new_powers,
            U256::from(new_valset.nonce),
            current_validators,
            current_powers,
            U256::from(current_valset.nonce),
            v,
            r,
            s,
        );
        self.submit(call, "valset update").await
    }

    async fn send_batch(
        &self,
        batch: &TxBatch,
        current_valset: &Valset,
        sigs: &[SigParts],
    ) -> Result<()> {
        let (current_validators, current_powers) = member_arrays(current_valset);
        let (v, r, s) = sig_arrays(sigs);
        let amounts = batch.transactions.iter().map(|tx| tx.amount).collect();
        let destinations =
            batch.transactions.iter().map(|tx| tx.destination).collect();
        let fees = batch.transactions.iter().map(|tx| tx.fee).collect();
        let call = self.contract.submit_batch(
            current_validators,
            current_powers,
            U256::from(current_valset.nonce),
            v,
            r,
            s,
            amounts,
            destinations,
            fees,
            U256::from(batch.nonce),
            batch.token_contract,
            U256::from(batch.timeout),
        );
        self.submit(call, "batch").await
    }
}

//! In-memory fakes behind the client traits, plus fixture helpers shared
//! by the loop tests.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as _};
use ethers::types::{Address, H256, U256};
use tokio::sync::Mutex;

use crate::checkpoint;
use crate::config::OrchestratorConfig;
use crate::context::OrchestratorContext;
use crate::error::{Error, Result};
use crate::ethereum::{EthereumBridge, SigParts};
use crate::home::HomeChain;
use crate::price_oracle::PriceFeed;
use crate::types::{
    BatchConfirm, BatchFees, TxBatch, Valset, ValsetConfirm, ValsetMember,
};

pub const ORCHESTRATOR: &str = "peg1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";

const TEST_CONFIG: &str = r#"
    [home]
    chain-id = "peg-1"
    grpc-endpoint = "http://localhost:9090"
    tendermint-rpc = "http://localhost:26657"
    account-address = "peg1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu"
    private-key = "0x0101010101010101010101010101010101010101010101010101010101010101"
    gas-prices = "500000000upeg"

    [ethereum]
    chain-id = 1
    rpc-endpoint = "http://localhost:8545"
    contract-address = "0x3bbe98e15a409e6a2ea8d6d4ceabed5e4a64dbd1"
    private-key = "0x0202020202020202020202020202020202020202020202020202020202020202"
"#;

pub fn test_config() -> OrchestratorConfig {
    config::Config::builder()
        .add_source(config::File::from_str(
            TEST_CONFIG,
            config::FileFormat::Toml,
        ))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

pub fn test_context() -> OrchestratorContext {
    OrchestratorContext::new(test_config())
}

pub fn test_peg_id() -> H256 {
    H256::from([0x11; 32])
}

pub fn test_token() -> Address {
    "0x4444444444444444444444444444444444444444".parse().unwrap()
}

/// Deterministic wallet `i`, usable as a valset member key.
pub fn test_wallet(i: u8) -> LocalWallet {
    let mut key = [0u8; 32];
    key[31] = i;
    LocalWallet::from_bytes(&key).unwrap()
}

pub fn member_for_wallet(i: u8, power: u64) -> ValsetMember {
    ValsetMember {
        power,
        eth_address: test_wallet(i).address(),
    }
}

/// Two-member valset held by wallets 1 and 2 with equal power.
pub fn test_valset(nonce: u64, height: u64) -> Valset {
    Valset {
        nonce,
        members: vec![
            member_for_wallet(1, 2_147_483_648),
            member_for_wallet(2, 2_147_483_647),
        ],
        height,
    }
}

/// A one-transaction batch for [`test_token`].
pub fn test_batch(nonce: u64, timeout: u64, height: u64) -> TxBatch {
    TxBatch {
        nonce,
        timeout,
        token_contract: test_token(),
        transactions: vec![crate::types::BatchTx {
            id: nonce * 10,
            sender: ORCHESTRATOR.to_owned(),
            destination: "0x3333333333333333333333333333333333333333"
                .parse()
                .unwrap(),
            amount: U256::exp10(18),
            fee: U256::exp10(17),
        }],
        height,
    }
}

/// Real confirmations over the valset checkpoint from the given wallets.
pub fn signed_valset_confirms(
    valset: &Valset,
    wallets: &[u8],
) -> Vec<ValsetConfirm> {
    let digest = checkpoint::valset_checkpoint(test_peg_id(), valset);
    wallets
        .iter()
        .map(|&i| {
            let wallet = test_wallet(i);
            let signature =
                checkpoint::sign_checkpoint(&wallet, digest).unwrap();
            ValsetConfirm {
                nonce: valset.nonce,
                orchestrator: ORCHESTRATOR.to_owned(),
                eth_signer: wallet.address(),
                signature: format!("0x{signature}"),
            }
        })
        .collect()
}

/// Real confirmations over the batch checkpoint from the given wallets.
pub fn signed_batch_confirms(
    batch: &TxBatch,
    wallets: &[u8],
) -> Vec<BatchConfirm> {
    let digest = checkpoint::batch_checkpoint(test_peg_id(), batch);
    wallets
        .iter()
        .map(|&i| {
            let wallet = test_wallet(i);
            let signature =
                checkpoint::sign_checkpoint(&wallet, digest).unwrap();
            BatchConfirm {
                nonce: batch.nonce,
                token_contract: batch.token_contract,
                eth_signer: wallet.address(),
                orchestrator: ORCHESTRATOR.to_owned(),
                signature: format!("0x{signature}"),
            }
        })
        .collect()
}

/// Scripted home chain. Confirmations mutate the pending queues the way
/// the real module does, so idempotence tests can watch them drain.
#[derive(Default)]
pub struct MockHomeChain {
    pub state: Mutex<HomeState>,
}

#[derive(Default)]
pub struct HomeState {
    pub current_valset: Option<Valset>,
    pub historical_valsets: HashMap<u64, Valset>,
    pub unsigned_valsets: Vec<Valset>,
    pub latest_valsets: Vec<Valset>,
    pub valset_confirms: HashMap<u64, Vec<ValsetConfirm>>,
    pub unsigned_batch: Option<TxBatch>,
    pub latest_batches: Vec<TxBatch>,
    pub batch_confirms: HashMap<(u64, Address), Vec<BatchConfirm>>,
    pub unbatched_fees: Vec<BatchFees>,
    pub block_times: HashMap<u64, SystemTime>,
    pub sent_valset_confirms: Vec<u64>,
    pub sent_batch_confirms: Vec<u64>,
    pub requested_batches: Vec<String>,
    /// When set, every read errors, simulating a node outage.
    pub fail_reads: bool,
}

impl HomeState {
    fn check_up(&self) -> Result<()> {
        if self.fail_reads {
            Err(Error::Generic("home chain rpc is down"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HomeChain for MockHomeChain {
    async fn current_valset(&self) -> Result<Valset> {
        let state = self.state.lock().await;
        state.check_up()?;
        state
            .current_valset
            .clone()
            .ok_or(Error::Generic("no current valset"))
    }

    async fn valset_at(&self, nonce: u64) -> Result<Option<Valset>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.historical_valsets.get(&nonce).cloned())
    }

    async fn oldest_unsigned_valsets(
        &self,
        _orchestrator: &str,
    ) -> Result<Vec<Valset>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.unsigned_valsets.clone())
    }

    async fn latest_valsets(&self) -> Result<Vec<Valset>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.latest_valsets.clone())
    }

    async fn all_valset_confirms(
        &self,
        nonce: u64,
    ) -> Result<Vec<ValsetConfirm>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.valset_confirms.get(&nonce).cloned().unwrap_or_default())
    }

    async fn oldest_unsigned_batch(
        &self,
        _orchestrator: &str,
    ) -> Result<Option<TxBatch>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.unsigned_batch.clone())
    }

    async fn latest_batches(&self) -> Result<Vec<TxBatch>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.latest_batches.clone())
    }

    async fn batch_confirms(
        &self,
        nonce: u64,
        token: Address,
    ) -> Result<Vec<BatchConfirm>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state
            .batch_confirms
            .get(&(nonce, token))
            .cloned()
            .unwrap_or_default())
    }

    async fn unbatched_token_fees(&self) -> Result<Vec<BatchFees>> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state.unbatched_fees.clone())
    }

    async fn block_time(&self, height: u64) -> Result<SystemTime> {
        let state = self.state.lock().await;
        state.check_up()?;
        Ok(state
            .block_times
            .get(&height)
            .copied()
            .unwrap_or(SystemTime::UNIX_EPOCH))
    }

    async fn send_valset_confirm(
        &self,
        _eth_from: Address,
        _peg_id: H256,
        valset: &Valset,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_up()?;
        state.sent_valset_confirms.push(valset.nonce);
        let nonce = valset.nonce;
        state.unsigned_valsets.retain(|v| v.nonce != nonce);
        Ok(())
    }

    async fn send_batch_confirm(
        &self,
        _eth_from: Address,
        _peg_id: H256,
        batch: &TxBatch,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_up()?;
        state.sent_batch_confirms.push(batch.nonce);
        state.unsigned_batch = None;
        Ok(())
    }

    async fn send_request_batch(&self, denom: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_up()?;
        state.requested_batches.push(denom.to_owned());
        Ok(())
    }
}

/// Scripted bridge contract. Successful valset submissions bump the
/// installed nonce, like a mined transaction would.
#[derive(Default)]
pub struct MockBridge {
    pub state: Mutex<BridgeState>,
}

#[derive(Default)]
pub struct BridgeState {
    pub valset_nonce: u64,
    pub batch_nonces: HashMap<Address, u64>,
    pub height: u64,
    pub submitted_valsets: Vec<(Valset, Valset, Vec<SigParts>)>,
    pub submitted_batches: Vec<(TxBatch, Valset, Vec<SigParts>)>,
    /// When set, submissions revert, simulating a lost relay race.
    pub fail_submissions: bool,
}

#[async_trait]
impl EthereumBridge for MockBridge {
    async fn peg_id(&self) -> Result<H256> {
        Ok(test_peg_id())
    }

    async fn get_valset_nonce(&self) -> Result<u64> {
        Ok(self.state.lock().await.valset_nonce)
    }

    async fn get_batch_nonce(&self, token: Address) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .await
            .batch_nonces
            .get(&token)
            .copied()
            .unwrap_or_default())
    }

    async fn latest_block_height(&self) -> Result<u64> {
        Ok(self.state.lock().await.height)
    }

    async fn send_valset_update(
        &self,
        new_valset: &Valset,
        current_valset: &Valset,
        sigs: &[SigParts],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_submissions {
            return Err(Error::SubmissionReverted(H256::zero()));
        }
        state.valset_nonce = new_valset.nonce;
        state.submitted_valsets.push((
            new_valset.clone(),
            current_valset.clone(),
            sigs.to_vec(),
        ));
        Ok(())
    }

    async fn send_batch(
        &self,
        batch: &TxBatch,
        current_valset: &Valset,
        sigs: &[SigParts],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_submissions {
            return Err(Error::SubmissionReverted(H256::zero()));
        }
        state
            .batch_nonces
            .insert(batch.token_contract, batch.nonce);
        state.submitted_batches.push((
            batch.clone(),
            current_valset.clone(),
            sigs.to_vec(),
        ));
        Ok(())
    }
}

/// Scripted price feed; unlisted tokens error like the real one.
#[derive(Default)]
pub struct MockPriceFeed {
    prices: Mutex<HashMap<Address, f64>>,
}

impl MockPriceFeed {
    pub async fn set_price(&self, token: Address, price: f64) {
        self.prices.lock().await.insert(token, price);
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn usd_price(&self, token: Address) -> Result<f64> {
        self.prices
            .lock()
            .await
            .get(&token)
            .copied()
            .ok_or(Error::PriceNotListed(token))
    }
}

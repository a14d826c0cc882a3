use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use serde::Deserialize;

use crate::error::Result;

const fn default_true() -> bool {
    true
}

const fn default_loop_duration_secs() -> u64 {
    60
}

const fn default_pending_tx_wait_secs() -> u64 {
    120
}

const fn default_gas_limit() -> u64 {
    400_000
}

const fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_gas_price_adjustment() -> f64 {
    1.3
}

fn default_coingecko_base_url() -> String {
    String::from("https://api.coingecko.com/api/v3")
}

fn default_denom_prefix() -> String {
    String::from("peg")
}

/// OrchestratorConfig is the configuration for the whole orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    /// The home (Cosmos) chain and the orchestrator's account on it.
    pub home: HomeConfig,
    /// The foreign (EVM) chain and the deployed bridge contract.
    pub ethereum: EthereumConfig,
    /// Relayer loop behavior.
    #[serde(default)]
    pub relayer: RelayerConfig,
    /// Batch requester loop behavior.
    #[serde(default)]
    pub batch_requester: BatchRequesterConfig,
}

/// HomeConfig is the configuration for the home chain connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HomeConfig {
    /// Chain id string, e.g. `peg-1`. Part of every signed transaction.
    pub chain_id: String,
    /// gRPC endpoint of a trusted home chain node.
    pub grpc_endpoint: url::Url,
    /// Consensus (Tendermint) RPC endpoint of the same node, used for block
    /// timestamp lookups.
    pub tendermint_rpc: url::Url,
    /// Bech32 account address the orchestrator broadcasts from. Must match
    /// the key below and must be the address this validator registered as
    /// its orchestrator.
    pub account_address: String,
    /// Hex encoded secp256k1 private key for the account above.
    #[serde(skip_serializing)]
    pub private_key: String,
    /// Gas price as an amount immediately followed by a denom, for example
    /// `500000000upeg`.
    pub gas_prices: String,
    /// Gas limit for confirmation and batch request transactions.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

/// EthereumConfig is the configuration for the foreign chain connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthereumConfig {
    /// EVM chain id, part of every submitted transaction's signature.
    pub chain_id: u64,
    /// Http(s) JSON-RPC endpoint.
    pub rpc_endpoint: url::Url,
    /// Optional WebSocket endpoint. When set, the orchestrator watches the
    /// mempool for competing submissions to the bridge contract.
    pub ws_endpoint: Option<url::Url>,
    /// Address of the deployed bridge contract.
    pub contract_address: Address,
    /// Hex encoded secp256k1 private key of the submitting account. The
    /// same key signs the validator's checkpoint confirmations.
    #[serde(skip_serializing)]
    pub private_key: String,
    /// Multiplier applied to the node's suggested gas price.
    #[serde(default = "default_gas_price_adjustment")]
    pub gas_price_adjustment: f64,
    /// Ceiling on the adjusted gas price, in gwei. Submissions that would
    /// need more are skipped until the network calms down.
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
}

/// RelayerConfig is the configuration for the relayer loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// Whether to relay valset updates to the bridge contract.
    #[serde(default = "default_true")]
    pub relay_valsets: bool,
    /// Minimum age, in seconds, a valset update must reach on the home
    /// chain before this relayer will submit it. Staggers honest relayers.
    #[serde(default)]
    pub valset_offset_secs: u64,
    /// Whether to relay batches to the bridge contract.
    #[serde(default = "default_true")]
    pub relay_batches: bool,
    /// Minimum age, in seconds, a batch must reach before submission.
    #[serde(default)]
    pub batch_offset_secs: u64,
    /// How long, in seconds, a previously submitted and still pending
    /// payload inhibits an identical resubmission.
    #[serde(default = "default_pending_tx_wait_secs")]
    pub pending_tx_wait_secs: u64,
    /// Seconds between two ticks of each control loop.
    #[serde(default = "default_loop_duration_secs")]
    pub loop_duration_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            relay_valsets: true,
            valset_offset_secs: 0,
            relay_batches: true,
            batch_offset_secs: 0,
            pending_tx_wait_secs: default_pending_tx_wait_secs(),
            loop_duration_secs: default_loop_duration_secs(),
        }
    }
}

impl RelayerConfig {
    /// Period between two ticks of each control loop.
    pub fn loop_duration(&self) -> Duration {
        Duration::from_secs(self.loop_duration_secs)
    }

    /// Age gate before a valset update becomes relay-eligible.
    pub fn valset_offset(&self) -> Duration {
        Duration::from_secs(self.valset_offset_secs)
    }

    /// Age gate before a batch becomes relay-eligible.
    pub fn batch_offset(&self) -> Duration {
        Duration::from_secs(self.batch_offset_secs)
    }

    /// Mempool deduplication window.
    pub fn pending_tx_wait(&self) -> Duration {
        Duration::from_secs(self.pending_tx_wait_secs)
    }
}

/// BatchRequesterConfig is the configuration for the batch requester loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchRequesterConfig {
    /// If false, the batch requester loop is inert.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Batches whose pooled fees are worth less than this many USD are not
    /// requested. Zero disables the threshold entirely.
    #[serde(default)]
    pub min_batch_fee_usd: f64,
    /// Base URL of the CoinGecko-compatible price feed.
    #[serde(default = "default_coingecko_base_url")]
    pub coingecko_base_url: String,
    /// Prefix for denoms derived from a token contract address.
    #[serde(default = "default_denom_prefix")]
    pub denom_prefix: String,
    /// Tokens whose home chain denom is not derived from the contract
    /// address, e.g. the chain's own staking coin.
    #[serde(default)]
    pub erc20_denoms: HashMap<Address, String>,
}

impl Default for BatchRequesterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_batch_fee_usd: 0.0,
            coingecko_base_url: default_coingecko_base_url(),
            denom_prefix: default_denom_prefix(),
            erc20_denoms: HashMap::new(),
        }
    }
}

/// Loads the configuration from a TOML file, with `PEG_ORCHESTRATOR_*`
/// environment variables layered on top. Every error here is fatal; bad
/// values never make it into a running loop.
pub fn load<P: AsRef<Path>>(path: P) -> Result<OrchestratorConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(
            config::Environment::with_prefix("PEG_ORCHESTRATOR")
                .separator("__"),
        )
        .build()?;
    cfg.try_deserialize().map_err(Into::into)
}

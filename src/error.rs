use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};

/// The middleware stack used for every bridge contract interaction.
pub type BridgeMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

/// An enum of all possible errors that could be encountered during the
/// execution of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying gRPC transport.
    #[error(transparent)]
    GrpcTransport(#[from] tonic::transport::Error),
    /// The home chain node rejected a gRPC request.
    #[error(transparent)]
    GrpcStatus(#[from] tonic::Status),
    /// Protobuf decoding error.
    #[error(transparent)]
    ProtoDecode(#[from] prost::DecodeError),
    /// HTTP client error.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Error in the Ethereum Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Bridge contract error.
    #[error(transparent)]
    EthersContract(#[from] ethers::contract::ContractError<BridgeMiddleware>),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWallet(#[from] ethers::signers::WalletError),
    /// Malformed EVM signature.
    #[error(transparent)]
    EthSignature(#[from] ethers::types::SignatureError),
    /// Secp256k1 signing error on the home chain account key.
    #[error(transparent)]
    Ecdsa(#[from] k256::ecdsa::Error),
    /// Malformed timestamp from the consensus RPC.
    #[error(transparent)]
    Timestamp(#[from] humantime::TimestampError),
    /// A string that should have been a hex encoded Ethereum address.
    #[error("invalid ethereum address: {0}")]
    InvalidAddress(String),
    /// A string that should have been a base 10 integer amount.
    #[error("invalid integer amount: {0}")]
    InvalidAmount(String),
    /// A string that should have been a hex encoded signature.
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    /// A private key in the config was not valid hex key material.
    #[error("invalid private key encoding")]
    InvalidPrivateKey,
    /// The configured gas prices string was not `<amount><denom>`.
    #[error("invalid gas prices: {0}")]
    InvalidGasPrices(String),
    /// The orchestrator account does not exist on the home chain yet.
    #[error("account {0} not found on the home chain")]
    AccountNotFound(String),
    /// The home chain accepted the broadcast but rejected the transaction.
    #[error("home chain rejected tx with code {code}: {raw_log}")]
    TxRejected {
        /// ABCI error code.
        code: u32,
        /// Raw log line returned by the node.
        raw_log: String,
    },
    /// The adjusted gas price went over the configured ceiling.
    #[error("gas price {required} exceeds the configured maximum {maximum}")]
    GasPriceTooHigh {
        /// Gas price the submission would need right now.
        required: U256,
        /// Configured ceiling.
        maximum: U256,
    },
    /// A bridge contract submission was mined but reverted.
    #[error("submission reverted in tx {0:?}")]
    SubmissionReverted(H256),
    /// The price feed has no USD listing for a token.
    #[error("no usd listing for token {0:?}")]
    PriceNotListed(Address),
    /// Missing secrets in the config.
    #[error("missing required private key in the config")]
    MissingSecrets,
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

impl Error {
    /// Whether this error should bring the whole process down. Everything
    /// else is transient: the loops log it and try again next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::MissingSecrets
                | Error::InvalidPrivateKey
                | Error::InvalidGasPrices(_)
        )
    }
}

/// A type alias for the result used all over the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;

use ethers::types::{Address, Signature, U256};

use crate::error::{Error, Result};
use crate::proto::peg::v1 as proto;

/// One member of the bridge validator set: the Ethereum address a validator
/// delegated its bridge duties to, weighted by its normalized voting power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValsetMember {
    /// Voting power on the `u32::MAX` scale.
    pub power: u64,
    /// Delegated Ethereum address.
    pub eth_address: Address,
}

/// A bridge validator set as recorded by the home chain. Member order is
/// fixed by the home chain and flows unchanged into the checkpoint digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valset {
    /// Monotonically increasing valset nonce.
    pub nonce: u64,
    /// Ordered members.
    pub members: Vec<ValsetMember>,
    /// Home chain block height the valset was recorded at.
    pub height: u64,
}

impl Valset {
    /// Sum of the normalized voting powers of all members.
    pub fn total_power(&self) -> u128 {
        self.members.iter().map(|m| u128::from(m.power)).sum()
    }
}

/// One withdrawal inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTx {
    /// Withdrawal id assigned by the home chain.
    pub id: u64,
    /// Home chain sender account.
    pub sender: String,
    /// Ethereum address receiving the tokens.
    pub destination: Address,
    /// Amount of the batch's token to transfer.
    pub amount: U256,
    /// Fee, in the same token, paid to whoever relays the batch.
    pub fee: U256,
}

/// A bundle of withdrawals for a single token contract. Transactions are
/// ordered by descending fee, as cut by the home chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxBatch {
    /// Monotonically increasing nonce, per token contract.
    pub nonce: u64,
    /// Foreign block height after which the batch can no longer execute.
    pub timeout: u64,
    /// ERC20 contract all transactions in the batch move.
    pub token_contract: Address,
    /// The withdrawals.
    pub transactions: Vec<BatchTx>,
    /// Home chain block height the batch was cut at.
    pub height: u64,
}

/// Per-token aggregate of the withdrawals not yet assigned to any batch.
/// A derived view: re-queried every tick, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFees {
    /// ERC20 contract address.
    pub token: Address,
    /// Sum of the pooled fees, an 18 decimal fixed point integer.
    pub total_fees: U256,
    /// Number of pooled withdrawals.
    pub tx_count: u64,
}

/// A validator's signature over a valset checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValsetConfirm {
    /// Nonce of the confirmed valset.
    pub nonce: u64,
    /// Home chain account that broadcast the confirmation.
    pub orchestrator: String,
    /// Ethereum address the signature must recover to.
    pub eth_signer: Address,
    /// Hex encoded EIP-191 signature over the checkpoint.
    pub signature: String,
}

/// A validator's signature over a batch checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfirm {
    /// Nonce of the confirmed batch.
    pub nonce: u64,
    /// Token contract identifying the batch queue.
    pub token_contract: Address,
    /// Ethereum address the signature must recover to.
    pub eth_signer: Address,
    /// Home chain account that broadcast the confirmation.
    pub orchestrator: String,
    /// Hex encoded EIP-191 signature over the checkpoint.
    pub signature: String,
}

/// Common surface of the two confirmation kinds, enough for the relayer to
/// verify and order signatures.
pub trait Confirm {
    /// The Ethereum address the signature is claimed for.
    fn eth_signer(&self) -> Address;
    /// The hex encoded signature.
    fn signature(&self) -> &str;
}

impl Confirm for ValsetConfirm {
    fn eth_signer(&self) -> Address {
        self.eth_signer
    }

    fn signature(&self) -> &str {
        &self.signature
    }
}

impl Confirm for BatchConfirm {
    fn eth_signer(&self) -> Address {
        self.eth_signer
    }

    fn signature(&self) -> &str {
        &self.signature
    }
}

/// Home chain denom for a bridged token without a native denom: the
/// configured prefix, a slash, then the checksummed contract address.
pub fn peg_denom(prefix: &str, token: Address) -> String {
    format!("{}/{}", prefix, ethers::utils::to_checksum(&token, None))
}

pub(crate) fn parse_eth_address(s: &str) -> Result<Address> {
    s.parse().map_err(|_| Error::InvalidAddress(s.to_owned()))
}

pub(crate) fn parse_amount(s: &str) -> Result<U256> {
    U256::from_dec_str(s).map_err(|_| Error::InvalidAmount(s.to_owned()))
}

pub(crate) fn parse_signature(s: &str) -> Result<Signature> {
    s.trim_start_matches("0x")
        .parse()
        .map_err(|_| Error::InvalidSignature(s.to_owned()))
}

impl TryFrom<proto::BridgeValidator> for ValsetMember {
    type Error = Error;

    fn try_from(v: proto::BridgeValidator) -> Result<Self> {
        Ok(Self {
            power: v.power,
            eth_address: parse_eth_address(&v.ethereum_address)?,
        })
    }
}

impl TryFrom<proto::Valset> for Valset {
    type Error = Error;

    fn try_from(v: proto::Valset) -> Result<Self> {
        let members = v
            .members
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>>>()?;
        if members.is_empty() {
            return Err(Error::Generic("valset without members"));
        }
        Ok(Self {
            nonce: v.nonce,
            members,
            height: v.height,
        })
    }
}

impl TryFrom<proto::OutgoingTransferTx> for BatchTx {
    type Error = Error;

    fn try_from(tx: proto::OutgoingTransferTx) -> Result<Self> {
        let token = tx
            .erc20_token
            .ok_or(Error::Generic("outgoing transfer without a token amount"))?;
        let fee = tx
            .erc20_fee
            .ok_or(Error::Generic("outgoing transfer without a fee"))?;
        Ok(Self {
            id: tx.id,
            sender: tx.sender,
            destination: parse_eth_address(&tx.dest_address)?,
            amount: parse_amount(&token.amount)?,
            fee: parse_amount(&fee.amount)?,
        })
    }
}

impl TryFrom<proto::OutgoingTxBatch> for TxBatch {
    type Error = Error;

    fn try_from(b: proto::OutgoingTxBatch) -> Result<Self> {
        Ok(Self {
            nonce: b.batch_nonce,
            timeout: b.batch_timeout,
            token_contract: parse_eth_address(&b.token_contract)?,
            transactions: b
                .transactions
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<Vec<_>>>()?,
            height: b.block,
        })
    }
}

impl TryFrom<proto::BatchFees> for BatchFees {
    type Error = Error;

    fn try_from(f: proto::BatchFees) -> Result<Self> {
        Ok(Self {
            token: parse_eth_address(&f.token)?,
            total_fees: parse_amount(&f.total_fees)?,
            tx_count: f.tx_count,
        })
    }
}

impl TryFrom<proto::MsgValsetConfirm> for ValsetConfirm {
    type Error = Error;

    fn try_from(c: proto::MsgValsetConfirm) -> Result<Self> {
        Ok(Self {
            nonce: c.nonce,
            orchestrator: c.orchestrator,
            eth_signer: parse_eth_address(&c.eth_address)?,
            signature: c.signature,
        })
    }
}

impl TryFrom<proto::MsgConfirmBatch> for BatchConfirm {
    type Error = Error;

    fn try_from(c: proto::MsgConfirmBatch) -> Result<Self> {
        Ok(Self {
            nonce: c.nonce,
            token_contract: parse_eth_address(&c.token_contract)?,
            eth_signer: parse_eth_address(&c.eth_signer)?,
            orchestrator: c.orchestrator,
            signature: c.signature,
        })
    }
}

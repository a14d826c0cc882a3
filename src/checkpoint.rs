//! The checkpoint digests validators sign and the bridge contract verifies.
//!
//! A checkpoint is the keccak256 of the ABI encoding of the artifact mixed
//! with the peg id, so a signature can never be replayed against another
//! bridge instance or another method. The layout here must match the
//! contract byte for byte; it is the binding contract between the signer
//! and the relayer.

use ethers::abi::Token;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};

use crate::error::Result;
use crate::types::{TxBatch, Valset};

const VALSET_METHOD_TAG: &[u8] = b"checkpoint";
const BATCH_METHOD_TAG: &[u8] = b"transactionBatch";

/// Method tags are ABI encoded the way solidity encodes a short string
/// constant cast to bytes32: left aligned, zero padded.
fn method_tag(tag: &[u8]) -> Token {
    let mut padded = vec![0u8; 32];
    padded[..tag.len()].copy_from_slice(tag);
    Token::FixedBytes(padded)
}

/// Digest of a valset update: peg id, method tag, nonce, then the member
/// addresses and powers as parallel arrays in valset order.
pub fn valset_checkpoint(peg_id: H256, valset: &Valset) -> H256 {
    let validators = valset
        .members
        .iter()
        .map(|m| Token::Address(m.eth_address))
        .collect();
    let powers = valset
        .members
        .iter()
        .map(|m| Token::Uint(U256::from(m.power)))
        .collect();
    let encoded = ethers::abi::encode(&[
        Token::FixedBytes(peg_id.as_bytes().to_vec()),
        method_tag(VALSET_METHOD_TAG),
        Token::Uint(U256::from(valset.nonce)),
        Token::Array(validators),
        Token::Array(powers),
    ]);
    H256::from(keccak256(encoded))
}

/// Digest of a withdrawal batch: peg id, method tag, the amount,
/// destination and fee arrays in transaction order, then the batch nonce,
/// token contract and timeout.
pub fn batch_checkpoint(peg_id: H256, batch: &TxBatch) -> H256 {
    let amounts = batch
        .transactions
        .iter()
        .map(|tx| Token::Uint(tx.amount))
        .collect();
    let destinations = batch
        .transactions
        .iter()
        .map(|tx| Token::Address(tx.destination))
        .collect();
    let fees = batch
        .transactions
        .iter()
        .map(|tx| Token::Uint(tx.fee))
        .collect();
    let encoded = ethers::abi::encode(&[
        Token::FixedBytes(peg_id.as_bytes().to_vec()),
        method_tag(BATCH_METHOD_TAG),
        Token::Array(amounts),
        Token::Array(destinations),
        Token::Array(fees),
        Token::Uint(U256::from(batch.nonce)),
        Token::Address(batch.token_contract),
        Token::Uint(U256::from(batch.timeout)),
    ]);
    H256::from(keccak256(encoded))
}

/// EIP-191 signature over a checkpoint digest. The contract recovers
/// against the prefixed hash, so the prefix is applied here and not on the
/// raw artifact bytes.
pub fn sign_checkpoint(wallet: &LocalWallet, digest: H256) -> Result<Signature> {
    wallet.sign_hash(hash_message(digest)).map_err(Into::into)
}

/// Recovers the Ethereum address that signed a checkpoint.
pub fn recover_checkpoint(digest: H256, signature: &Signature) -> Result<Address> {
    signature.recover(hash_message(digest)).map_err(Into::into)
}

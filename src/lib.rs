#![deny(unsafe_code)]

//! # Peg Orchestrator
//!
//! A long-running process operated by a validator of a Cosmos-based home
//! chain that keeps a token peg to an EVM foreign chain live and safe. The
//! home chain proposes validator set updates and withdrawal batches; a
//! bridge contract on the foreign chain executes them once presented with a
//! quorum of validator signatures.
//!
//! The orchestrator runs three periodic control loops:
//!
//!   1. The **signer** produces this validator's signature over every
//!      validator set update and withdrawal batch the home chain is waiting
//!      on, and broadcasts the confirmations back to the home chain.
//!   2. The **relayer** watches for artifacts that have accumulated a
//!      signing quorum and submits them to the bridge contract.
//!   3. The **batch requester** prices the pending withdrawal fees and asks
//!      the home chain to cut a new batch when it is worth relaying.
//!
//! The loops share nothing but the configuration and the client handles;
//! all state of record lives on the two chains.

/// A module implementing the batch requester loop.
pub mod batch_request;
/// Canonical digests signed by validators and checked by the bridge contract.
pub mod checkpoint;
/// Orchestrator configuration.
pub mod config;
/// A module for managing the context of the orchestrator.
pub mod context;
/// Crate errors.
pub mod error;
/// Foreign chain client: the bridge contract on the EVM side.
pub mod ethereum;
/// Home chain client: the peg module query and tx surfaces.
pub mod home;
/// Periodic execution of the control loops.
pub mod loops;
/// USD price feed for bridged tokens.
pub mod price_oracle;
/// Generated protobuf wire types.
pub mod proto;
/// A module implementing the relayer loop.
pub mod relayer;
/// Retry functionality.
pub mod retry;
/// A module for starting and supervising the long-running loops.
pub mod service;
/// A module implementing the signer loop.
pub mod signer;
/// Domain types shared by the loops.
pub mod types;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};

//! Home chain client.
//!
//! The loops consume the home chain through the [`HomeChain`] trait: reads
//! against the peg module's query service and writes broadcast as peg
//! module messages. All reads are best-effort snapshots; the loops assume
//! eventual consistency and reconcile on later ticks.

mod tendermint;
mod tx;

use std::time::SystemTime;

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256};
use tonic::transport::{Channel, Endpoint};

use crate::checkpoint;
use crate::config::HomeConfig;
use crate::error::{Error, Result};
use crate::proto::peg::v1 as proto;
use crate::proto::peg::v1::query_client::QueryClient;
use crate::types::{BatchConfirm, BatchFees, TxBatch, Valset, ValsetConfirm};

pub use tendermint::ConsensusRpc;
pub use tx::Broadcaster;

/// Read/write facade over the home chain, narrow enough for in-memory
/// fakes in tests.
#[async_trait]
pub trait HomeChain: Send + Sync {
    /// Latest valset known to the home chain.
    async fn current_valset(&self) -> Result<Valset>;

    /// Historical valset lookup by nonce.
    async fn valset_at(&self, nonce: u64) -> Result<Option<Valset>>;

    /// Valsets this orchestrator has not confirmed yet, oldest first.
    async fn oldest_unsigned_valsets(
        &self,
        orchestrator: &str,
    ) -> Result<Vec<Valset>>;

    /// Recent valsets, a bounded window for relayer correlation.
    async fn latest_valsets(&self) -> Result<Vec<Valset>>;

    /// All collected signatures for a valset nonce.
    async fn all_valset_confirms(
        &self,
        nonce: u64,
    ) -> Result<Vec<ValsetConfirm>>;

    /// Oldest batch this orchestrator has not confirmed yet, if any.
    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> Result<Option<TxBatch>>;

    /// Recent unrelayed batches.
    async fn latest_batches(&self) -> Result<Vec<TxBatch>>;

    /// All collected signatures for a batch.
    async fn batch_confirms(
        &self,
        nonce: u64,
        token: Address,
    ) -> Result<Vec<BatchConfirm>>;

    /// Per-token aggregate of withdrawals not yet in a batch.
    async fn unbatched_token_fees(&self) -> Result<Vec<BatchFees>>;

    /// Timestamp of the home chain block at `height`.
    async fn block_time(&self, height: u64) -> Result<SystemTime>;

    /// Signs the valset checkpoint and broadcasts the confirmation.
    async fn send_valset_confirm(
        &self,
        eth_from: Address,
        peg_id: H256,
        valset: &Valset,
    ) -> Result<()>;

    /// Signs the batch checkpoint and broadcasts the confirmation.
    async fn send_batch_confirm(
        &self,
        eth_from: Address,
        peg_id: H256,
        batch: &TxBatch,
    ) -> Result<()>;

    /// Asks the peg module to cut a new batch for `denom`. The module
    /// deduplicates, so duplicate requests are harmless.
    async fn send_request_batch(&self, denom: &str) -> Result<()>;
}

/// gRPC-backed [`HomeChain`] implementation over a single trusted node.
pub struct GrpcHomeChain {
    query: QueryClient<Channel>,
    broadcaster: Broadcaster,
    consensus: ConsensusRpc,
    eth_wallet: LocalWallet,
}

impl GrpcHomeChain {
    /// Connects to the node named in the config. The Ethereum wallet signs
    /// checkpoint confirmations; the home account key inside the
    /// broadcaster signs the transactions that carry them.
    pub async fn connect(
        config: &HomeConfig,
        eth_wallet: LocalWallet,
    ) -> Result<Self> {
        let channel = Endpoint::from_shared(config.grpc_endpoint.to_string())?
            .connect()
            .await?;
        let query = QueryClient::new(channel.clone());
        let broadcaster = Broadcaster::new(channel, config)?;
        let consensus = ConsensusRpc::new(config.tendermint_rpc.clone());
        Ok(Self {
            query,
            broadcaster,
            consensus,
            eth_wallet,
        })
    }

    /// The account this orchestrator broadcasts from.
    pub fn account_address(&self) -> &str {
        self.broadcaster.address()
    }
}

#[async_trait]
impl HomeChain for GrpcHomeChain {
    async fn current_valset(&self) -> Result<Valset> {
        let mut query = self.query.clone();
        let response = query
            .current_valset(proto::QueryCurrentValsetRequest {})
            .await?
            .into_inner();
        response
            .valset
            .ok_or(Error::Generic("home chain returned no current valset"))?
            .try_into()
    }

    async fn valset_at(&self, nonce: u64) -> Result<Option<Valset>> {
        let mut query = self.query.clone();
        let response = query
            .valset_request(proto::QueryValsetRequestRequest { nonce })
            .await?
            .into_inner();
        response.valset.map(TryInto::try_into).transpose()
    }

    async fn oldest_unsigned_valsets(
        &self,
        orchestrator: &str,
    ) -> Result<Vec<Valset>> {
        let mut query = self.query.clone();
        let response = query
            .last_pending_valset_requests_by_addr(
                proto::QueryLastPendingValsetRequestsByAddrRequest {
                    address: orchestrator.to_owned(),
                },
            )
            .await?
            .into_inner();
        response
            .valsets
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn latest_valsets(&self) -> Result<Vec<Valset>> {
        let mut query = self.query.clone();
        let response = query
            .last_valset_requests(proto::QueryLastValsetRequestsRequest {})
            .await?
            .into_inner();
        response
            .valsets
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn all_valset_confirms(
        &self,
        nonce: u64,
    ) -> Result<Vec<ValsetConfirm>> {
        let mut query = self.query.clone();
        let response = query
            .valset_confirms_by_nonce(
                proto::QueryValsetConfirmsByNonceRequest { nonce },
            )
            .await?
            .into_inner();
        response
            .confirms
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> Result<Option<TxBatch>> {
        let mut query = self.query.clone();
        let response = query
            .last_pending_batch_request_by_addr(
                proto::QueryLastPendingBatchRequestByAddrRequest {
                    address: orchestrator.to_owned(),
                },
            )
            .await?
            .into_inner();
        response.batch.map(TryInto::try_into).transpose()
    }

    async fn latest_batches(&self) -> Result<Vec<TxBatch>> {
        let mut query = self.query.clone();
        let response = query
            .outgoing_tx_batches(proto::QueryOutgoingTxBatchesRequest {})
            .await?
            .into_inner();
        response
            .batches
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn batch_confirms(
        &self,
        nonce: u64,
        token: Address,
    ) -> Result<Vec<BatchConfirm>> {
        let mut query = self.query.clone();
        let response = query
            .batch_confirms(proto::QueryBatchConfirmsRequest {
                nonce,
                contract_address: format!("{token:?}"),
            })
            .await?
            .into_inner();
        response
            .confirms
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn unbatched_token_fees(&self) -> Result<Vec<BatchFees>> {
        let mut query = self.query.clone();
        let response = query
            .batch_fees(proto::QueryBatchFeeRequest {})
            .await?
            .into_inner();
        response
            .batch_fees
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn block_time(&self, height: u64) -> Result<SystemTime> {
        self.consensus.block_time(height).await
    }

    async fn send_valset_confirm(
        &self,
        eth_from: Address,
        peg_id: H256,
        valset: &Valset,
    ) -> Result<()> {
        let digest = checkpoint::valset_checkpoint(peg_id, valset);
        let signature = checkpoint::sign_checkpoint(&self.eth_wallet, digest)?;
        let msg = proto::MsgValsetConfirm {
            nonce: valset.nonce,
            orchestrator: self.broadcaster.address().to_owned(),
            eth_address: format!("{eth_from:?}"),
            signature: format!("0x{signature}"),
        };
        self.broadcaster
            .broadcast(vec![tx::to_any("/peg.v1.MsgValsetConfirm", &msg)])
            .await
    }

    async fn send_batch_confirm(
        &self,
        eth_from: Address,
        peg_id: H256,
        batch: &TxBatch,
    ) -> Result<()> {
        let digest = checkpoint::batch_checkpoint(peg_id, batch);
        let signature = checkpoint::sign_checkpoint(&self.eth_wallet, digest)?;
        let msg = proto::MsgConfirmBatch {
            nonce: batch.nonce,
            token_contract: format!("{:?}", batch.token_contract),
            eth_signer: format!("{eth_from:?}"),
            orchestrator: self.broadcaster.address().to_owned(),
            signature: format!("0x{signature}"),
        };
        self.broadcaster
            .broadcast(vec![tx::to_any("/peg.v1.MsgConfirmBatch", &msg)])
            .await
    }

    async fn send_request_batch(&self, denom: &str) -> Result<()> {
        let msg = proto::MsgRequestBatch {
            orchestrator: self.broadcaster.address().to_owned(),
            denom: denom.to_owned(),
        };
        self.broadcaster
            .broadcast(vec![tx::to_any("/peg.v1.MsgRequestBatch", &msg)])
            .await
    }
}

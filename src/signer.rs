//! The signer loop.
//!
//! Signs off on any validator set updates or withdrawal batches the home
//! chain is waiting on. Artifacts come straight from the validator's own
//! trusted node, so they are assumed valid and signed as-is. The loop keeps
//! no local state: the home chain remembers what is unsigned, and
//! re-broadcasting an existing confirmation is a no-op there.

use std::sync::Arc;

use ethers::types::{Address, H256};

use crate::error::Result;
use crate::home::HomeChain;
use crate::retry::with_retry;

/// Produces this validator's confirmations over pending artifacts.
pub struct Signer {
    home: Arc<dyn HomeChain>,
    orchestrator_address: String,
    eth_address: Address,
    peg_id: H256,
}

impl Signer {
    /// Creates the signer duty.
    pub fn new(
        home: Arc<dyn HomeChain>,
        orchestrator_address: String,
        eth_address: Address,
        peg_id: H256,
    ) -> Self {
        Self {
            home,
            orchestrator_address,
            eth_address,
            peg_id,
        }
    }

    /// One tick: confirm pending valsets, then the oldest pending batch.
    /// The batch phase runs even when there are no valsets to confirm. Any
    /// failure aborts the tick; the artifacts stay listed as unsigned on
    /// the home chain, so the next tick picks them up again.
    pub async fn tick(&self) -> Result<()> {
        self.sign_valset_updates().await?;
        self.sign_oldest_batch().await?;
        Ok(())
    }

    async fn sign_valset_updates(&self) -> Result<()> {
        let valsets = with_retry(|| {
            self.home.oldest_unsigned_valsets(&self.orchestrator_address)
        })
        .await?;

        if valsets.is_empty() {
            tracing::debug!("no validator set to confirm");
            return Ok(());
        }

        for valset in &valsets {
            with_retry(|| {
                self.home
                    .send_valset_confirm(self.eth_address, self.peg_id, valset)
            })
            .await?;
            tracing::info!(
                nonce = valset.nonce,
                members = valset.members.len(),
                "confirmed valset update on the home chain"
            );
        }

        Ok(())
    }

    async fn sign_oldest_batch(&self) -> Result<()> {
        let batch = with_retry(|| {
            self.home.oldest_unsigned_batch(&self.orchestrator_address)
        })
        .await?;

        let Some(batch) = batch else {
            tracing::debug!("no token batch to confirm");
            return Ok(());
        };

        with_retry(|| {
            self.home
                .send_batch_confirm(self.eth_address, self.peg_id, &batch)
        })
        .await?;
        tracing::info!(
            token_contract = ?batch.token_contract,
            nonce = batch.nonce,
            txs = batch.transactions.len(),
            "confirmed batch on the home chain"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use ethers::signers::Signer as _EthersSigner;

    fn signer(home: Arc<MockHomeChain>) -> Signer {
        Signer::new(
            home,
            ORCHESTRATOR.to_owned(),
            test_wallet(1).address(),
            test_peg_id(),
        )
    }

    #[tokio::test]
    async fn pending_valset_is_confirmed_and_cleared() {
        let home = Arc::new(MockHomeChain::default());
        {
            let mut state = home.state.lock().await;
            state.unsigned_valsets = vec![test_valset(7, 1000)];
        }
        let signer = signer(home.clone());

        signer.tick().await.unwrap();

        let state = home.state.lock().await;
        assert_eq!(state.sent_valset_confirms, vec![7]);
        assert!(state.unsigned_valsets.is_empty());
    }

    #[tokio::test]
    async fn valsets_are_confirmed_in_reported_order() {
        let home = Arc::new(MockHomeChain::default());
        {
            let mut state = home.state.lock().await;
            state.unsigned_valsets =
                vec![test_valset(3, 300), test_valset(4, 400)];
        }
        let signer = signer(home.clone());

        signer.tick().await.unwrap();

        let state = home.state.lock().await;
        assert_eq!(state.sent_valset_confirms, vec![3, 4]);
    }

    #[tokio::test]
    async fn quiet_chain_means_a_silent_tick() {
        let home = Arc::new(MockHomeChain::default());
        let signer = signer(home.clone());

        signer.tick().await.unwrap();

        let state = home.state.lock().await;
        assert!(state.sent_valset_confirms.is_empty());
        assert!(state.sent_batch_confirms.is_empty());
    }

    #[tokio::test]
    async fn second_tick_is_a_noop_after_the_chain_catches_up() {
        let home = Arc::new(MockHomeChain::default());
        {
            let mut state = home.state.lock().await;
            state.unsigned_valsets = vec![test_valset(7, 1000)];
            state.unsigned_batch = Some(test_batch(4, 9_000_000, 500));
        }
        let signer = signer(home.clone());

        signer.tick().await.unwrap();
        signer.tick().await.unwrap();

        // exactly one confirmation each; the home chain no longer reports
        // the artifacts after the first confirmation lands
        let state = home.state.lock().await;
        assert_eq!(state.sent_valset_confirms.len(), 1);
        assert_eq!(state.sent_batch_confirms.len(), 1);
    }

    #[tokio::test]
    async fn batch_phase_runs_without_pending_valsets() {
        let home = Arc::new(MockHomeChain::default());
        {
            let mut state = home.state.lock().await;
            state.unsigned_batch = Some(test_batch(4, 9_000_000, 500));
        }
        let signer = signer(home.clone());

        signer.tick().await.unwrap();

        let state = home.state.lock().await;
        assert!(state.sent_valset_confirms.is_empty());
        assert_eq!(state.sent_batch_confirms, vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn an_outage_fails_the_tick_and_recovery_resumes() {
        let home = Arc::new(MockHomeChain::default());
        {
            let mut state = home.state.lock().await;
            state.unsigned_valsets = vec![test_valset(7, 1000)];
            state.fail_reads = true;
        }
        let signer = signer(home.clone());

        // the tick retries internally, then surfaces the error non-fatally
        let result = signer.tick().await;
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_fatal());

        home.state.lock().await.fail_reads = false;
        signer.tick().await.unwrap();

        let state = home.state.lock().await;
        assert_eq!(state.sent_valset_confirms, vec![7]);
    }
}

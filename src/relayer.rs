//! The relayer loop.
//!
//! Watches the home chain for artifacts that have accumulated a signing
//! quorum and submits them to the bridge contract. Multiple honest
//! relayers race on purpose; the contract's nonce checks make every
//! submission idempotent, so losing a race is just a log line.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ethers::types::{Address, Signature, H256};

use crate::checkpoint;
use crate::error::Result;
use crate::ethereum::{EthereumBridge, SigParts};
use crate::home::HomeChain;
use crate::retry::with_retry;
use crate::types::{Confirm, Valset, ValsetMember};

/// Submits quorum-signed artifacts to the bridge contract.
pub struct Relayer {
    home: Arc<dyn HomeChain>,
    bridge: Arc<dyn EthereumBridge>,
    peg_id: H256,
    relay_valsets: bool,
    valset_offset: Duration,
    relay_batches: bool,
    batch_offset: Duration,
}

impl Relayer {
    /// Creates the relayer duty.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        home: Arc<dyn HomeChain>,
        bridge: Arc<dyn EthereumBridge>,
        peg_id: H256,
        relay_valsets: bool,
        valset_offset: Duration,
        relay_batches: bool,
        batch_offset: Duration,
    ) -> Self {
        Self {
            home,
            bridge,
            peg_id,
            relay_valsets,
            valset_offset,
            relay_batches,
            batch_offset,
        }
    }

    /// One tick: consider relaying a valset update, then consider relaying
    /// batches. The phases are independent; a failure in one is logged and
    /// does not starve the other.
    pub async fn tick(&self) -> Result<()> {
        if self.relay_valsets {
            if let Err(e) = self.relay_valset_update().await {
                tracing::warn!("failed to relay a valset update: {}", e);
            }
        }
        if self.relay_batches {
            if let Err(e) = self.relay_batches_once().await {
                tracing::warn!("failed to relay batches: {}", e);
            }
        }
        Ok(())
    }

    /// The valset currently installed on the bridge contract, rebuilt from
    /// the home chain's historical record.
    async fn current_foreign_valset(&self) -> Result<Option<(u64, Valset)>> {
        let nonce = with_retry(|| self.bridge.get_valset_nonce()).await?;
        let valset = with_retry(|| self.home.valset_at(nonce)).await?;
        if valset.is_none() {
            tracing::warn!(
                nonce,
                "the bridge contract's valset is unknown to the home chain"
            );
        }
        Ok(valset.map(|v| (nonce, v)))
    }

    async fn relay_valset_update(&self) -> Result<()> {
        let Some((installed_nonce, installed)) =
            self.current_foreign_valset().await?
        else {
            return Ok(());
        };

        let mut candidates: Vec<Valset> =
            with_retry(|| self.home.latest_valsets())
                .await?
                .into_iter()
                .filter(|v| v.nonce > installed_nonce)
                .collect();
        // highest nonce first: one submission catches the contract up
        candidates.sort_by(|a, b| b.nonce.cmp(&a.nonce));

        let mut selected = None;
        for valset in candidates {
            let confirms =
                with_retry(|| self.home.all_valset_confirms(valset.nonce))
                    .await?;
            let digest = checkpoint::valset_checkpoint(self.peg_id, &valset);
            let confirms = verified_confirms(digest, confirms);
            if has_quorum(&valset, &confirms) {
                selected = Some((valset, confirms));
                break;
            }
        }
        let Some((valset, confirms)) = selected else {
            tracing::debug!("no valset update ready to relay");
            return Ok(());
        };

        if !self.old_enough(valset.height, self.valset_offset).await? {
            tracing::debug!(
                nonce = valset.nonce,
                "valset update has not aged past the relay offset yet"
            );
            return Ok(());
        }

        // the contract tallies power against the installed set
        if !has_quorum(&installed, &confirms) {
            tracing::debug!(
                nonce = valset.nonce,
                "confirmations do not reach a quorum of the installed valset"
            );
            return Ok(());
        }
        let sigs = order_signatures(&installed.members, &confirms);

        tracing::info!(nonce = valset.nonce, "relaying valset update");
        if let Err(e) = self
            .bridge
            .send_valset_update(&valset, &installed, &sigs)
            .await
        {
            // most likely another relayer was faster; the next tick will
            // observe the higher nonce and skip
            tracing::warn!(
                nonce = valset.nonce,
                "valset submission did not land: {}",
                e
            );
        }
        Ok(())
    }

    async fn relay_batches_once(&self) -> Result<()> {
        let Some((_, installed)) = self.current_foreign_valset().await? else {
            return Ok(());
        };

        let batches = with_retry(|| self.home.latest_batches()).await?;
        let eth_height =
            with_retry(|| self.bridge.latest_block_height()).await?;

        // highest eligible batch per token
        let mut best: HashMap<Address, (crate::types::TxBatch, Vec<(Address, Signature)>)> =
            HashMap::new();
        for batch in batches {
            if batch.timeout <= eth_height {
                tracing::debug!(
                    nonce = batch.nonce,
                    token_contract = ?batch.token_contract,
                    timeout = batch.timeout,
                    "dropping a timed out batch"
                );
                continue;
            }
            let executed = with_retry(|| {
                self.bridge.get_batch_nonce(batch.token_contract)
            })
            .await?;
            if batch.nonce <= executed {
                continue;
            }
            let confirms = with_retry(|| {
                self.home.batch_confirms(batch.nonce, batch.token_contract)
            })
            .await?;
            let digest = checkpoint::batch_checkpoint(self.peg_id, &batch);
            let confirms = verified_confirms(digest, confirms);
            if !has_quorum(&installed, &confirms) {
                tracing::debug!(
                    nonce = batch.nonce,
                    token_contract = ?batch.token_contract,
                    "batch lacks a signing quorum"
                );
                continue;
            }
            match best.entry(batch.token_contract) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert((batch, confirms));
                }
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    if batch.nonce > entry.get().0.nonce {
                        entry.insert((batch, confirms));
                    }
                }
            }
        }

        for (token, (batch, confirms)) in best {
            if !self.old_enough(batch.height, self.batch_offset).await? {
                tracing::debug!(
                    nonce = batch.nonce,
                    token_contract = ?token,
                    "batch has not aged past the relay offset yet"
                );
                continue;
            }
            let sigs = order_signatures(&installed.members, &confirms);
            tracing::info!(
                nonce = batch.nonce,
                token_contract = ?token,
                "relaying batch"
            );
            if let Err(e) =
                self.bridge.send_batch(&batch, &installed, &sigs).await
            {
                tracing::warn!(
                    nonce = batch.nonce,
                    token_contract = ?token,
                    "batch submission did not land: {}",
                    e
                );
            }
        }
        Ok(())
    }

    /// Whether an artifact recorded at `height` is older than `offset`.
    /// Offsets stagger honest relayers so they do not all pay gas for the
    /// same artifact.
    async fn old_enough(&self, height: u64, offset: Duration) -> Result<bool> {
        if offset.is_zero() {
            return Ok(true);
        }
        let recorded = with_retry(|| self.home.block_time(height)).await?;
        let age = SystemTime::now()
            .duration_since(recorded)
            .unwrap_or_default();
        Ok(age >= offset)
    }
}

/// Drops confirmations whose signature does not recover to the claimed
/// signer. A forged or corrupt confirmation must not count toward quorum,
/// and the contract would reject the whole submission over it.
fn verified_confirms<C: Confirm>(
    digest: H256,
    confirms: Vec<C>,
) -> Vec<(Address, Signature)> {
    confirms
        .into_iter()
        .filter_map(|confirm| {
            let signature =
                crate::types::parse_signature(confirm.signature()).ok()?;
            let recovered =
                checkpoint::recover_checkpoint(digest, &signature).ok()?;
            if recovered == confirm.eth_signer() {
                Some((recovered, signature))
            } else {
                tracing::warn!(
                    claimed = ?confirm.eth_signer(),
                    recovered = ?recovered,
                    "confirmation signature does not recover to its signer"
                );
                None
            }
        })
        .collect()
}

/// Whether the confirmed members hold at least 2/3 of `valset`'s power.
fn has_quorum(valset: &Valset, confirms: &[(Address, Signature)]) -> bool {
    let signed: HashSet<Address> =
        confirms.iter().map(|(signer, _)| *signer).collect();
    let confirmed: u128 = valset
        .members
        .iter()
        .filter(|m| signed.contains(&m.eth_address))
        .map(|m| u128::from(m.power))
        .sum();
    confirmed * 3 >= valset.total_power() * 2
}

/// Lays the signatures out in contract order: one slot per member of the
/// installed valset, zero placeholders for members without a confirmation.
fn order_signatures(
    members: &[ValsetMember],
    confirms: &[(Address, Signature)],
) -> Vec<SigParts> {
    let by_signer: HashMap<Address, Signature> =
        confirms.iter().map(|(signer, sig)| (*signer, *sig)).collect();
    members
        .iter()
        .map(|member| match by_signer.get(&member.eth_address) {
            Some(signature) => {
                let mut r = [0u8; 32];
                let mut s = [0u8; 32];
                signature.r.to_big_endian(&mut r);
                signature.s.to_big_endian(&mut s);
                SigParts {
                    v: signature.v as u8,
                    r,
                    s,
                }
            }
            None => SigParts::default(),
        })
        .collect()
}

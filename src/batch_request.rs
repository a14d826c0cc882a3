//! The batch requester loop.
//!
//! Withdrawals pool on the home chain until someone asks for a batch to be
//! cut. Cutting one only makes sense when the pooled fees cover the gas a
//! relayer will burn executing it, so each tick prices every token's
//! pooled fees in USD and requests batches for the ones past the
//! configured threshold.

use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, FromPrimitive};
use ethers::types::{Address, U256};

use crate::error::Result;
use crate::home::HomeChain;
use crate::price_oracle::PriceFeed;
use crate::retry::with_retry;
use crate::types::{peg_denom, BatchFees};

/// Asks the home chain to cut batches once they are worth relaying.
pub struct BatchRequester {
    home: Arc<dyn HomeChain>,
    price_feed: Arc<dyn PriceFeed>,
    min_batch_fee_usd: f64,
    denom_prefix: String,
    erc20_denoms: HashMap<Address, String>,
}

impl BatchRequester {
    /// Creates the batch requester duty.
    pub fn new(
        home: Arc<dyn HomeChain>,
        price_feed: Arc<dyn PriceFeed>,
        min_batch_fee_usd: f64,
        denom_prefix: String,
        erc20_denoms: HashMap<Address, String>,
    ) -> Self {
        Self {
            home,
            price_feed,
            min_batch_fee_usd,
            denom_prefix,
            erc20_denoms,
        }
    }

    /// One tick: fetch the pooled fees and request a batch for every token
    /// past the threshold. Nothing here fails the tick; a token that can
    /// not be priced right now is simply skipped until the next one.
    pub async fn tick(&self) -> Result<()> {
        let fees = match with_retry(|| self.home.unbatched_token_fees()).await
        {
            Ok(fees) => fees,
            Err(e) => {
                tracing::warn!(
                    "unable to get outgoing withdrawal fees: {}",
                    e
                );
                return Ok(());
            }
        };

        if fees.is_empty() {
            tracing::debug!("no outgoing withdrawals to batch");
            return Ok(());
        }

        for fee in fees {
            self.request_batch(fee).await;
        }

        Ok(())
    }

    async fn request_batch(&self, fees: BatchFees) {
        let denom = self.token_denom(fees.token);

        if !self.fee_threshold_met(fees.token, fees.total_fees).await {
            return;
        }

        tracing::info!(
            denom = %denom,
            token_contract = ?fees.token,
            txs = fees.tx_count,
            "requesting a batch on the home chain"
        );

        // fire and forget: the module deduplicates repeated requests
        let _ = self.home.send_request_batch(&denom).await;
    }

    fn token_denom(&self, token: Address) -> String {
        self.erc20_denoms
            .get(&token)
            .cloned()
            .unwrap_or_else(|| peg_denom(&self.denom_prefix, token))
    }

    async fn fee_threshold_met(&self, token: Address, total_fees: U256) -> bool {
        if self.min_batch_fee_usd == 0.0 {
            return true;
        }

        let price = match self.price_feed.usd_price(token).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(
                    token_contract = ?token,
                    "failed to query the usd price: {}",
                    e
                );
                return false;
            }
        };

        let (Some(price), Some(min_fee)) = (
            BigDecimal::from_f64(price),
            BigDecimal::from_f64(self.min_batch_fee_usd),
        ) else {
            return false;
        };
        let total_fee_usd = fee_units(total_fees) * price;

        if total_fee_usd < min_fee {
            tracing::debug!(
                token_contract = ?token,
                batch_fee = %total_fee_usd,
                min_fee = %min_fee,
                "insufficient token batch fee"
            );
            return false;
        }

        true
    }
}

/// Converts an 18 decimal fixed point fee total into whole token units.
/// The fee can be a full 256 bit integer, which neither `f64` nor a 128 bit
/// decimal can hold without loss, so it goes through a bignum.
fn fee_units(total_fees: U256) -> BigDecimal {
    let mut bytes = [0u8; 32];
    total_fees.to_little_endian(&mut bytes);
    BigDecimal::new(BigInt::from_bytes_le(Sign::Plus, &bytes), 18)
}

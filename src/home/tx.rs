//! Assembles, signs and broadcasts home chain transactions.
//!
//! Confirmations and batch requests are ordinary peg module messages packed
//! into a SIGN_MODE_DIRECT transaction. The account number and sequence are
//! looked up per broadcast; confirmations are deduplicated chain-side, so a
//! lost sequence race only costs one retry.

use k256::ecdsa::signature::Signer as _;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use prost::Message;
use tonic::transport::Channel;

use crate::config::HomeConfig;
use crate::error::{Error, Result};
use crate::proto::cosmos::auth::v1beta1::query_client::QueryClient as AuthQueryClient;
use crate::proto::cosmos::auth::v1beta1::{BaseAccount, QueryAccountRequest};
use crate::proto::cosmos::base::v1beta1::Coin;
use crate::proto::cosmos::crypto::secp256k1::PubKey;
use crate::proto::cosmos::tx::signing::v1beta1::SignMode;
use crate::proto::cosmos::tx::v1beta1::service_client::ServiceClient;
use crate::proto::cosmos::tx::v1beta1::{
    mode_info, AuthInfo, BroadcastMode, BroadcastTxRequest, Fee, ModeInfo,
    SignDoc, SignerInfo, TxBody, TxRaw,
};

/// Packs a message into a protobuf `Any` under its type url.
pub(crate) fn to_any<M: Message>(type_url: &str, msg: &M) -> prost_types::Any {
    prost_types::Any {
        type_url: type_url.to_owned(),
        value: msg.encode_to_vec(),
    }
}

/// Signs and broadcasts peg module messages from a single account.
pub struct Broadcaster {
    service: ServiceClient<Channel>,
    auth: AuthQueryClient<Channel>,
    chain_id: String,
    address: String,
    key: SigningKey,
    fee: Coin,
    gas_limit: u64,
}

impl Broadcaster {
    /// Builds a broadcaster from the home chain config. Key material and
    /// gas prices are validated here, at startup.
    pub fn new(channel: Channel, config: &HomeConfig) -> Result<Self> {
        let raw = hex::decode(config.private_key.trim_start_matches("0x"))
            .map_err(|_| Error::InvalidPrivateKey)?;
        let key = SigningKey::from_slice(&raw)
            .map_err(|_| Error::InvalidPrivateKey)?;
        let (gas_price, fee_denom) = parse_gas_prices(&config.gas_prices)?;
        let fee_amount = gas_price.saturating_mul(u128::from(config.gas_limit));
        Ok(Self {
            service: ServiceClient::new(channel.clone()),
            auth: AuthQueryClient::new(channel),
            chain_id: config.chain_id.clone(),
            address: config.account_address.clone(),
            key,
            fee: Coin {
                denom: fee_denom,
                amount: fee_amount.to_string(),
            },
            gas_limit: config.gas_limit,
        })
    }

    /// The bech32 account address this broadcaster signs as.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn account(&self) -> Result<BaseAccount> {
        let mut auth = self.auth.clone();
        let response = auth
            .account(QueryAccountRequest {
                address: self.address.clone(),
            })
            .await?
            .into_inner();
        let any = response
            .account
            .ok_or_else(|| Error::AccountNotFound(self.address.clone()))?;
        BaseAccount::decode(any.value.as_slice()).map_err(Into::into)
    }

    /// Signs `messages` into a single transaction and broadcasts it in sync
    /// mode. Waits for the CheckTx acknowledgement only; commitment is
    /// observed by the loops through their next queries.
    pub async fn broadcast(
        &self,
        messages: Vec<prost_types::Any>,
    ) -> Result<()> {
        let account = self.account().await?;

        let body = TxBody {
            messages,
            memo: String::new(),
            timeout_height: 0,
        };
        let body_bytes = body.encode_to_vec();

        let pub_key = PubKey {
            key: self
                .key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
        };
        let auth_info = AuthInfo {
            signer_infos: vec![SignerInfo {
                public_key: Some(to_any(
                    "/cosmos.crypto.secp256k1.PubKey",
                    &pub_key,
                )),
                mode_info: Some(ModeInfo {
                    sum: Some(mode_info::Sum::Single(mode_info::Single {
                        mode: SignMode::Direct as i32,
                    })),
                }),
                sequence: account.sequence,
            }],
            fee: Some(Fee {
                amount: vec![self.fee.clone()],
                gas_limit: self.gas_limit,
                payer: String::new(),
                granter: String::new(),
            }),
        };
        let auth_info_bytes = auth_info.encode_to_vec();

        let sign_doc = SignDoc {
            body_bytes: body_bytes.clone(),
            auth_info_bytes: auth_info_bytes.clone(),
            chain_id: self.chain_id.clone(),
            account_number: account.account_number,
        };
        let signature: k256::ecdsa::Signature =
            self.key.sign(&sign_doc.encode_to_vec());
        let signature = signature.normalize_s().unwrap_or(signature);

        let raw = TxRaw {
            body_bytes,
            auth_info_bytes,
            signatures: vec![signature.to_vec()],
        };

        let mut service = self.service.clone();
        let response = service
            .broadcast_tx(BroadcastTxRequest {
                tx_bytes: raw.encode_to_vec(),
                mode: BroadcastMode::Sync as i32,
            })
            .await?
            .into_inner();
        let tx_response = response
            .tx_response
            .ok_or(Error::Generic("broadcast returned no tx response"))?;
        if tx_response.code != 0 {
            return Err(Error::TxRejected {
                code: tx_response.code,
                raw_log: tx_response.raw_log,
            });
        }
        tracing::debug!("broadcast home chain tx {}", tx_response.txhash);
        Ok(())
    }
}

/// Splits a `<amount><denom>` gas prices string, e.g. `500000000upeg`.
fn parse_gas_prices(gas_prices: &str) -> Result<(u128, String)> {
    let digits = gas_prices
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(gas_prices.len());
    let (amount, denom) = gas_prices.split_at(digits);
    if amount.is_empty() || denom.is_empty() {
        return Err(Error::InvalidGasPrices(gas_prices.to_owned()));
    }
    let amount = amount
        .parse()
        .map_err(|_| Error::InvalidGasPrices(gas_prices.to_owned()))?;
    Ok((amount, denom.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_prices_split_into_amount_and_denom() {
        let (amount, denom) = parse_gas_prices("500000000upeg").unwrap();
        assert_eq!(amount, 500_000_000);
        assert_eq!(denom, "upeg");
    }

    #[test]
    fn malformed_gas_prices_are_rejected() {
        assert!(parse_gas_prices("").is_err());
        assert!(parse_gas_prices("upeg").is_err());
        assert!(parse_gas_prices("500000000").is_err());
    }

    #[test]
    fn any_packing_preserves_the_type_url() {
        let coin = Coin {
            denom: "upeg".into(),
            amount: "1".into(),
        };
        let any = to_any("/cosmos.base.v1beta1.Coin", &coin);
        assert_eq!(any.type_url, "/cosmos.base.v1beta1.Coin");
        assert_eq!(Coin::decode(any.value.as_slice()).unwrap(), coin);
    }
}

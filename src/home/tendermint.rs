//! Minimal consensus RPC client.
//!
//! The relayer's offset gates need to know when a home chain block was
//! produced. The peg module does not expose block headers, so this goes to
//! the node's Tendermint RPC over HTTP and reads the header timestamp.

use std::time::SystemTime;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Block timestamp lookups against a Tendermint RPC endpoint.
pub struct ConsensusRpc {
    base: url::Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    result: BlockResult,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Header,
}

#[derive(Debug, Deserialize)]
struct Header {
    time: String,
}

impl ConsensusRpc {
    /// Creates a client against the given RPC base URL.
    pub fn new(base: url::Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    /// Timestamp of the block at `height`.
    pub async fn block_time(&self, height: u64) -> Result<SystemTime> {
        let url = self.base.join(&format!("block?height={height}"))?;
        let response: BlockResponse =
            self.client.get(url).send().await?.json().await?;
        humantime::parse_rfc3339(&response.result.block.header.time)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_timestamps_parse() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "id": -1,
            "result": {
                "block_id": { "hash": "AA" },
                "block": {
                    "header": {
                        "chain_id": "peg-1",
                        "height": "1000",
                        "time": "2024-05-01T12:00:00.123456789Z"
                    }
                }
            }
        }"#;
        let response: BlockResponse = serde_json::from_str(raw).unwrap();
        let time =
            humantime::parse_rfc3339(&response.result.block.header.time)
                .unwrap();
        assert!(time > SystemTime::UNIX_EPOCH);
    }
}

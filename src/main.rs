#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ethers::signers::{LocalWallet, Signer};
use structopt::StructOpt;

use peg_orchestrator::config;
use peg_orchestrator::context::OrchestratorContext;
use peg_orchestrator::ethereum::{EthereumBridge, PegBridge};
use peg_orchestrator::home::{GrpcHomeChain, HomeChain};
use peg_orchestrator::price_oracle::CoinGeckoPriceFeed;
use peg_orchestrator::service::Orchestrator;

/// The peg orchestrator command-line tool
///
/// Start the orchestrator from a config file:
///
///     $ peg-orchestrator -vvv -c <CONFIG_FILE_PATH>
#[derive(StructOpt)]
#[structopt(name = "Peg Orchestrator")]
struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    verbose: i32,
    /// File that contains configration.
    #[structopt(
        short = "c",
        long = "config-filename",
        value_name = "PATH",
        parse(from_os_str)
    )]
    config_filename: PathBuf,
}

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    let config = config::load(&args.config_filename)
        .context("failed to load the config file")?;
    let ctx = OrchestratorContext::new(config.clone());

    let eth_wallet: LocalWallet = config
        .ethereum
        .private_key
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .context("failed to parse the ethereum private key")?
        .with_chain_id(config.ethereum.chain_id);
    let eth_address = eth_wallet.address();

    let home = Arc::new(
        GrpcHomeChain::connect(&config.home, eth_wallet.clone())
            .await
            .context("failed to connect to the home chain, is the node running?")?,
    );
    let bridge = Arc::new(
        PegBridge::connect(
            &config.ethereum,
            eth_wallet,
            config.relayer.pending_tx_wait(),
        )
        .context("failed to connect to the ethereum rpc")?,
    );

    let peg_id = bridge
        .peg_id()
        .await
        .context("failed to query the peg id from the bridge contract")?;
    tracing::info!("using home chain account {}", config.home.account_address);
    tracing::info!("using ethereum address {:?}", eth_address);
    tracing::info!("bridge peg id {:?}", peg_id);

    // a key outside the current valset cannot sign anything the home chain
    // will accept, so it runs relayer duties only
    let current_valset = home
        .current_valset()
        .await
        .context("failed to query the current valset from the home chain")?;
    let is_validator = current_valset
        .members
        .iter()
        .any(|m| m.eth_address == eth_address);
    if !is_validator {
        tracing::warn!(
            "the ethereum address is not in the current valset, running \
             relayer duties only"
        );
    }

    if let Some(ws_endpoint) = config.ethereum.ws_endpoint.clone() {
        let bridge = bridge.clone();
        let shutdown = ctx.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = bridge.watch_pending_txs(ws_endpoint, shutdown).await
            {
                tracing::warn!("pending tx watch stopped: {}", e);
            }
        });
    }

    let price_feed = Arc::new(CoinGeckoPriceFeed::new(
        config.batch_requester.coingecko_base_url.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        home,
        bridge,
        price_feed,
        config.home.account_address.clone(),
        eth_address,
        peg_id,
        &config,
    ));

    let mut service = tokio::spawn(orchestrator.run(ctx.clone(), is_validator));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("shutting down...");
            // send shutdown signal to all of the loops
            ctx.shutdown();
            match tokio::time::timeout(Duration::from_secs(15), service).await {
                Ok(_) => tracing::info!("clean exit"),
                Err(_) => tracing::warn!("graceful shutdown timed out"),
            }
        }
        result = &mut service => {
            match result {
                Ok(Ok(())) => tracing::info!("orchestrator stopped"),
                Ok(Err(e)) => {
                    tracing::error!("orchestrator failed: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::error!("orchestrator task died: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("peg_orchestrator={}", log_level).parse()?);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

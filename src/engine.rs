//! The pool engine: module wiring and the job producer.
//!
//! Setup constructs every component against its seams and connects the
//! channels; run spins the long-lived tasks and drives the block-to-job
//! loop that feeds stratum, the accountant, and the submitter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oprpool_accounting::{Accountant, AccountingError};
use oprpool_chain::{ChainClient, MinuteKeeper};
use oprpool_core::constants::version_for_height;
use oprpool_core::hasher::opr_hash;
use oprpool_core::opr::valid_identity;
use oprpool_core::{CoreError, Job, OprContent, OracleError, PowHasher, PriceOracle, Reward, ShareCheck};
use oprpool_pegnet::{Grader, Node, PegnetError, PegnetHook};
use oprpool_storage::{Store, StorageError};
use oprpool_stratum::{Server, StratumConfig};
use oprpool_submit::{SubmissionJob, Submitter};
use oprpool_util::{validate_coinbase_address, validate_ec_secret_address};

use crate::auth::StoreAuthority;
use crate::config::Settings;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pegnet(#[from] PegnetError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Everything needed to mint records in the pool's name.
#[derive(Debug, Clone)]
pub struct IdentityInfo {
    pub identity: String,
    pub coinbase_address: String,
    pub es_address: String,
}

pub struct PoolEngine {
    pub store: Arc<Store>,
    pub stratum: Arc<Server>,
    pub node: Arc<Node>,
    pub minute_keeper: Arc<MinuteKeeper>,
    pub accountant: Arc<Accountant>,
    pub submitter: Arc<Submitter>,

    oracle: Arc<dyn PriceOracle>,
    identity: IdentityInfo,
    hook_rx: Mutex<Option<mpsc::Receiver<PegnetHook>>>,
}

impl PoolEngine {
    /// Validates the configuration, constructs all modules, and links
    /// their channels. Startup is the one place that refuses to continue
    /// on bad input.
    pub fn setup(
        settings: &Settings,
        store: Arc<Store>,
        chain: Arc<dyn ChainClient>,
        oracle: Arc<dyn PriceOracle>,
        hasher: Arc<dyn PowHasher>,
        grader: Arc<dyn Grader>,
    ) -> Result<PoolEngine, EngineError> {
        let identity = IdentityInfo {
            identity: settings.pool.identity.clone(),
            coinbase_address: settings.pool.coinbase_address.clone(),
            es_address: settings.pool.es_address.clone(),
        };
        if !valid_identity(&identity.identity) {
            return Err(EngineError::Config(format!(
                "pool identity must be set to alphanumerics and commas, got {:?}",
                identity.identity
            )));
        }
        validate_coinbase_address(&identity.coinbase_address).map_err(|e| {
            EngineError::Config(format!("pool coinbase address failed: {}", e))
        })?;
        validate_ec_secret_address(&identity.es_address).map_err(|e| {
            EngineError::Config(format!("pool entry credit address failed: {}", e))
        })?;

        let accountant = Arc::new(Accountant::new(store.clone(), &settings.pool.fee_rate)?);
        let minute_keeper = Arc::new(MinuteKeeper::new(chain.clone()));
        let gate: Arc<dyn ShareCheck> = minute_keeper.clone();

        let stratum = Arc::new(Server::new(
            StratumConfig {
                port: settings.stratum.port,
                require_auth: settings.stratum.require_auth,
                validate_all_shares: settings.stratum.validate_all_shares,
                welcome_message: settings.stratum.welcome_message.clone(),
                ..Default::default()
            },
            hasher,
            Arc::new(StoreAuthority::new(store.clone())),
            gate.clone(),
        ));

        let mut node = Node::new(
            chain.clone(),
            store.clone(),
            grader,
            Duration::from_secs(settings.pegnet.polling_period),
            Duration::from_secs(settings.pegnet.retry_period),
        )?;
        let hook_rx = node.get_hook();

        let submitter = Arc::new(Submitter::new(
            store.clone(),
            chain,
            gate,
            identity.es_address.clone(),
            settings.submit.cutoff,
            settings.submit.ema_n,
            settings.submit.soft_max,
        ));

        // Accepted shares fan out to both ledgers
        stratum.add_share_export(accountant.share_channel());
        stratum.add_share_export(submitter.share_channel());

        Ok(PoolEngine {
            store,
            stratum,
            node: Arc::new(node),
            minute_keeper,
            accountant,
            submitter,
            oracle,
            identity,
            hook_rx: Mutex::new(Some(hook_rx)),
        })
    }

    /// Runs every component until the cancellation token fires, then tears
    /// the tasks down.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let hook_rx = self.hook_rx.lock().unwrap().take().expect("run called twice");

        let stratum = self.stratum.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = stratum.listen().await {
                error!("engine: stratum server failed: {}", e);
            }
        });
        let node = self.node.clone();
        let follower = tokio::spawn(async move { node.dblock_sync().await });
        let keeper = self.minute_keeper.clone();
        let minutes = tokio::spawn(async move { keeper.run().await });
        let accountant = self.accountant.clone();
        let ledgers = tokio::spawn(async move { accountant.listen().await });
        let submitter = self.submitter.clone();
        let submits = tokio::spawn(async move { submitter.run().await });

        tokio::select! {
            _ = cancel.cancelled() => info!("engine: shutting down"),
            _ = self.listen_blocks(hook_rx) => warn!("engine: block hook closed"),
        }

        self.stratum.stop_mining();
        for task in [listener, follower, minutes, ledgers, submits] {
            task.abort();
        }
    }

    /// The job producer: each graded block event becomes the next round's
    /// job and closes the books on the round it graded.
    async fn listen_blocks(&self, mut hook_rx: mpsc::Receiver<PegnetHook>) {
        while let Some(hook) = hook_rx.recv().await {
            self.handle_hook(hook).await;
        }
    }

    pub(crate) async fn handle_hook(&self, hook: PegnetHook) {
        let next_height = hook.height + 1;

        let job = if hook.top {
            match self.build_job(&hook) {
                Ok(job) => job,
                Err(e) => {
                    error!("engine: failed to build job height={}: {}", next_height, e);
                    return;
                }
            }
        } else {
            // Catch-up rounds never reach miners; the submitter still
            // needs the event to keep its moving average honest
            Job::degenerate(next_height)
        };

        if hook.top {
            debug!("engine: new job id={} oprhash={}", job.id, job.opr_hash_hex());
            self.stratum.notify(job.clone());
            if self.accountant.job_channel().send(job.id).await.is_err() {
                error!("engine: accountant job channel closed");
            }
        }

        let reward = self.compute_reward(&hook);
        if reward.graded_count > 0 {
            info!(
                "engine: pool graded height={} reward={} winning={}",
                hook.height,
                reward.pool_reward as f64 / 1e8,
                reward.winning_count
            );
        }
        if self.accountant.reward_channel().send(reward).await.is_err() {
            error!("engine: accountant reward channel closed");
        }

        if self
            .submitter
            .blocks_channel()
            .send(SubmissionJob { hook, job })
            .await
            .is_err()
        {
            error!("engine: submitter block channel closed");
        }
    }

    /// Builds the candidate record for the next round from fresh prices
    /// and the just-graded winners.
    fn build_job(&self, hook: &PegnetHook) -> Result<Job, EngineError> {
        let height = hook.height + 1;
        let version = version_for_height(height as u32);

        let prices = self.oracle.pull_all_prices(version)?;

        let mut winners = Vec::with_capacity(hook.graded.winners_short_hashes.len());
        for short in &hook.graded.winners_short_hashes {
            winners.push(hex::decode(short).map_err(CoreError::Hex)?);
        }

        let content = OprContent {
            height,
            id: self.identity.identity.clone(),
            address: self.identity.coinbase_address.clone(),
            winners,
            assets: OprContent::assets_from_prices(version, &prices)?,
        };
        content.validate(version)?;

        // The wide encoding rides along so the submitter's cache is ready
        // the moment a cutover past version 2 is scheduled
        let payload_v4 = content.marshal_v4();
        let payload = content.marshal(version)?;

        Ok(Job {
            id: height,
            opr_hash: opr_hash(&payload),
            payload,
            payload_v4,
        })
    }

    /// What the graded round paid entries carrying the pool's identity or
    /// coinbase address.
    fn compute_reward(&self, hook: &PegnetHook) -> Reward {
        let mut pool_reward = 0i64;
        let mut winning_count = 0;
        let mut graded_count = 0;
        for g in &hook.graded.graded {
            if g.id == self.identity.identity || g.address == self.identity.coinbase_address {
                graded_count += 1;
                pool_reward += g.payout;
                if g.payout > 0 {
                    winning_count += 1;
                }
            }
        }
        Reward {
            job_id: hook.height,
            pool_reward,
            winning_count,
            graded_count,
        }
    }
}

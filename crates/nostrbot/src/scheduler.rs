use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::bot::{Bot, BotContext};
use crate::dispatch::{self, DispatchError};
use crate::identity::Identity;
use crate::pool::{ClientPool, RelayPool};

/// Builds a relay pool for a set of relay URLs
pub type PoolFactory = Arc<dyn Fn(Vec<String>) -> Arc<dyn RelayPool> + Send + Sync>;

/// One bot waiting to be run
pub struct BotEntry {
    pub bot: Box<dyn Bot>,
    pub identity: Option<Identity>,
    /// Used when the scheduler has no shared relay set
    pub relays: Vec<String>,
}

impl BotEntry {
    pub fn new(bot: Box<dyn Bot>, identity: Option<Identity>, relays: Vec<String>) -> Self {
        Self {
            bot,
            identity,
            relays,
        }
    }
}

/// How one bot's loop ended
#[derive(Debug)]
pub struct BotExit {
    pub name: String,
    pub result: Result<(), DispatchError>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub exits: Vec<BotExit>,
    /// Tasks that panicked instead of returning
    pub panicked: usize,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &BotExit> {
        self.exits.iter().filter(|exit| exit.result.is_err())
    }

    pub fn is_clean(&self) -> bool {
        self.panicked == 0 && self.failures().next().is_none()
    }
}

/// Runs bots concurrently until they all stop.
///
/// With a shared relay set every bot gets the same pool, otherwise each bot
/// gets its own pool for its own relays. A bot that stops on a transport
/// error is reported, never restarted.
pub struct Scheduler {
    entries: Vec<BotEntry>,
    shared_relays: Option<Vec<String>>,
    pool_factory: PoolFactory,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            entries: Vec::new(),
            shared_relays: None,
            pool_factory: Arc::new(|relays: Vec<String>| {
                Arc::new(ClientPool::new(relays)) as Arc<dyn RelayPool>
            }),
            cancel,
        }
    }

    pub fn pool_factory(mut self, factory: PoolFactory) -> Self {
        self.pool_factory = factory;
        self
    }

    pub fn shared_relays(mut self, relays: Vec<String>) -> Self {
        self.shared_relays = Some(relays);
        self
    }

    pub fn add(&mut self, entry: BotEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> RunReport {
        let shared = self.shared_relays.map(|relays| (self.pool_factory)(relays));
        let mut pools: Vec<Arc<dyn RelayPool>> = shared.iter().cloned().collect();
        let mut tasks = JoinSet::new();

        for entry in self.entries {
            let pool = match &shared {
                Some(pool) => pool.clone(),
                None => {
                    let pool = (self.pool_factory)(entry.relays);
                    pools.push(pool.clone());
                    pool
                }
            };

            let name = entry.bot.name().to_string();
            let ctx = BotContext::new(name.clone(), entry.identity, pool, self.cancel.clone());
            let span = tracing::info_span!("bot", name = %name);

            tasks.spawn(
                async move {
                    let result = dispatch::run(entry.bot, ctx).await;
                    BotExit { name, result }
                }
                .instrument(span),
            );
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(exit) => {
                    match &exit.result {
                        Ok(()) => tracing::info!(bot = %exit.name, "bot stopped"),
                        Err(e) => tracing::error!(bot = %exit.name, error = %e, "bot failed"),
                    }
                    report.exits.push(exit);
                }
                Err(e) => {
                    tracing::error!(error = %e, "bot task panicked");
                    report.panicked += 1;
                }
            }
        }

        for pool in pools {
            pool.close().await;
        }

        report
    }
}

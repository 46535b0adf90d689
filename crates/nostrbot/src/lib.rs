//! Runtime for bots that follow a filtered stream of signed nostr events,
//! verify each event and hand it to their own logic, optionally answering
//! over an encrypted command protocol.

pub mod agents;
pub mod bot;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod pool;
pub mod query;
pub mod rpc;
pub mod scheduler;
pub mod store;
pub mod validator;

pub use bot::{Bot, BotContext, BotError, LogBot};
pub use config::{BotConfig, ConfigError, RuntimeConfig};
pub use identity::Identity;
pub use pool::{ClientPool, MemoryPool, RelayPool};
pub use query::{build_filter, Interest};
pub use rpc::{MethodTable, ReplyDraft, RpcBot};
pub use scheduler::{BotEntry, Scheduler};

pub mod coin;
pub mod collect;
pub mod compose;
pub mod config;
pub mod crypto;
pub mod deployment;
pub mod error;
pub mod execute;
pub mod genesis;
pub mod gentx;
pub mod keyring;
pub mod modules;
pub mod node_config;
pub mod post_genesis;
pub mod provision;
pub mod utils;

pub use config::{TestnetArgs, TestnetConfig};
pub use error::TestnetError;
pub use execute::{Clock, FixedClock, SystemClock, TestnetSummary, init_testnet};

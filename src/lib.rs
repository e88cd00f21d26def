pub mod types;
pub mod sources {
    pub mod coinglass;
}
pub mod aggregators;
pub mod config;
pub mod refresh;
pub mod status;

pub use types::*;
pub use sources::coinglass::{CoinGlassClient, RetryPolicy};
pub use aggregators::aggregate_indicators;
pub use refresh::{RefreshOutcome, Refresher, StatusReport};

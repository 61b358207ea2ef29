pub mod provider;

pub use provider::{extract_points, StakingProvider};

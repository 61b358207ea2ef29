// HTTP surface of the seed leaderboard: the two functions the UI calls
// plus cached reads and per-token lookups.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;

pub use server::ApiServer;
pub use state::AppState;

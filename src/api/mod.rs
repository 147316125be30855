//! Operator status API.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;

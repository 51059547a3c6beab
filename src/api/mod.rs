//! HTTP surface for the campaign orchestrator (§6 External Interfaces):
//! campaign lifecycle CRUD, the score-breakdown and rescore endpoints, and
//! the SSE event stream, all wired through a shared [`Env`].

pub mod env;
pub mod handlers;
pub mod server;

pub use env::{Env, SharedEnv};
pub use handlers::{api_router, build_router};
pub use server::start_server;

//! `leadbot-gateway`: webhook ingress wiring the debounce coordinator, the
//! tiered store and the funnel engine into one turn per consolidated message.

pub mod admin;
pub mod app;
pub mod error;
pub mod http;
pub mod locks;
pub mod turn;

pub use app::{build_router, AppState};
pub use error::TurnError;
pub use locks::KeyedLocks;
pub use turn::{run_turn, Inbound, TurnReply, TurnStatus};

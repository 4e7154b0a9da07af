//! Web layer for the rail data API.
//!
//! Handlers sit behind the Request Gate ([`gate`]), which authenticates,
//! rate limits and audits every request except the health probe.

mod dto;
mod error;
mod gate;
mod routes;
mod state;

pub use dto::*;
pub use error::AppError;
pub use gate::{Gate, request_gate};
pub use routes::{create_router, protect};
pub use state::AppState;

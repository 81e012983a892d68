//! Read-only HTTP dashboard over the transfer coordinator

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;

pub use error::ApiError;
pub use server::{router, serve};
pub use state::AppState;

pub mod error;
pub mod handlers;
pub mod server;

#[cfg(test)]
mod test_support;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};

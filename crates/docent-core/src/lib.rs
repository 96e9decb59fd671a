// Core docent functionality without terminal dependencies

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod preflight;
pub mod store;
pub mod stream;
pub mod test_utils;
pub mod tools;
pub mod utils;

pub use error::{Error, Result};

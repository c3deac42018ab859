pub mod config;
pub mod error;
pub mod handler;
pub mod history;
pub mod markup;
pub mod parser;
pub mod stats;
pub mod store;

pub use error::PulseError;

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod init;
pub mod metrics;
pub mod models;
pub mod nn;
pub mod training;
pub mod utils;

pub use error::{Kg4TextError, Result};

#![doc = "Common types shared across the PLC simulator workspace."]

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod index;
pub mod select;
pub mod table;
pub mod xml;

pub use error::{HarvestError, Result};

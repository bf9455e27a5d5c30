//! Utility modules

pub mod paths;

pub use paths::{backup_path, temp_path};

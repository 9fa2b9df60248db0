pub mod agent;
pub mod config;
pub mod extract;
pub mod fs_util;
pub mod memory;
pub mod transcript;
pub mod types;

pub mod adb;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod models;
pub mod output;
pub mod partitions;
pub mod properties;

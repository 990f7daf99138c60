pub mod config;
pub mod instance;
pub mod runtime;
pub mod storage;

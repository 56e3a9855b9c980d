pub mod config;
pub mod db;
pub mod faces;
pub mod logging;
pub mod server;
pub mod storage;

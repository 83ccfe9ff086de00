pub mod analyzers;
pub mod api;
pub mod broker;
pub mod cache;
pub mod collector;
pub mod config;
pub mod runner;
pub mod store;
pub mod util;

pub mod anthropic;
pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod content;
pub mod deploy;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod provisioning;
pub mod retry;
pub mod scan;
pub mod state_machine;
pub mod store;
pub mod ui;

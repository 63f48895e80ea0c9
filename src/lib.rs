pub mod backend;
pub mod cli;
pub mod config;
pub mod export;
pub mod poller;
pub mod predictions;
pub mod report;
pub mod selection;
pub mod session;
pub mod state;
pub mod urls;
pub mod util;

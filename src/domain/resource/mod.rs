pub mod acquire;
pub mod config;
pub mod drain;
pub mod eventlog;
pub mod exclude;
pub mod inventory;
pub mod monitor;
pub mod request;
pub mod reslog;
pub mod status;
pub mod topo;

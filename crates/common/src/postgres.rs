mod client;
mod command_repository;
mod config;
mod router_repository;

pub use client::*;
pub use command_repository::*;
pub use config::*;
pub use router_repository::*;

mod client;
mod command_cache;
mod config;
mod router_cache;

pub use client::*;
pub use command_cache::*;
pub use config::*;
pub use router_cache::*;

mod command_handler;
mod conversions;
mod server;

pub use command_handler::*;
pub use conversions::*;
pub use server::*;

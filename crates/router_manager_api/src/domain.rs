mod command_queue;
mod identity_resolver;

pub use command_queue::*;
pub use identity_resolver::*;

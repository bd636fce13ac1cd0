mod command;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod result;
mod router;

pub use command::*;
#[cfg(any(test, feature = "testing"))]
pub use memory::*;
pub use result::*;
pub use router::*;

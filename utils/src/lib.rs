//! Small helpers shared by the reimage crates: subprocess query
//! extensions and tracing setup. Nothing here may depend on the
//! snapshot model; keep it to the standard library and core crates.

mod command;
mod tracing_util;
pub use command::*;
pub use tracing_util::*;

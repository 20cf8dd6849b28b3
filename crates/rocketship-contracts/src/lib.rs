// Public contracts for the Rocketship engine API
// This crate defines the DTOs shared between the engine service, the
// interpreter's reporters, and external clients.

pub mod discovery;
pub mod log;
pub mod run;
pub mod step;

pub use discovery::*;
pub use log::*;
pub use run::*;
pub use step::*;

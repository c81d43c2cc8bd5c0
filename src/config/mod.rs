//! Configuration parsing and types.
//!
//! - `types` - `devservices.yaml` structure (`Config`, `ContainerServiceConfig`, `ComposeConfig`)
//! - `duration` - human and ISO-style duration strings
//! - `parser` - locating and loading the config file

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;

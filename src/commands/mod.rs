mod ps;
mod up;
mod validate;

pub use ps::run_ps;
pub use up::{run_up, UpOptions};
pub use validate::run_validate;

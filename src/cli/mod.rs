mod commands;
mod wizard;

pub use commands::{authorize, check, run_backup};
pub use wizard::run_setup;

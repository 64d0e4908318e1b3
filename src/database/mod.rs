mod probe;

pub use probe::{connection_opts, probe_connection};

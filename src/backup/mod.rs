pub mod artifact;
pub mod dump;
pub mod workflow;

pub use artifact::{backup_file_name, BackupArtifact};
pub use dump::{DumpExecutor, DumpInvocation, DumpOutput, DumpRunner, ProcessDumpRunner};
pub use workflow::{BackupWorkflow, WorkflowResult};

pub mod master_control;

pub use master_control::{BOOTSTRAP_TASK, MasterControlProgram};

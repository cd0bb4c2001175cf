pub mod system_state;

pub use system_state::{GlobalVariableSink, SystemMetrics, SystemState, SystemStateManager};

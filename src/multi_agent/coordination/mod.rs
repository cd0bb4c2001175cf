pub mod task_processor;
pub mod task_queue;

pub use task_processor::{TaskHandle, TaskLifecycleObserver, TaskProcessor};
pub use task_queue::{TaskQueue, TaskQueueStats};

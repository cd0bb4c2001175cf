pub mod user_context;

pub use user_context::{UserContextManager, UserInitialization};

pub mod communication_manager;
pub mod message;

pub use communication_manager::{
    BroadcastReport, CommunicationConfig, CommunicationManager, MessageBusStats, SYSTEM_SENDER,
};
pub use message::{AgentMessage, MessageFilter, MessageType, Recipient};

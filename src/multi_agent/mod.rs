pub mod communication;
pub mod context;
pub mod coordination;
pub mod manager;
pub mod registry;
pub mod state;

//! Reducers for the agent's cognitive domains. Each owns one sub-record.

pub mod activity;
pub mod architecture;
pub mod goals;
pub mod memory;
pub mod persona;
pub mod plugins;

pub use activity::ActivityReducer;
pub use architecture::ArchitectureReducer;
pub use goals::GoalReducer;
pub use memory::MemoryReducer;
pub use persona::PersonaReducer;
pub use plugins::PluginReducer;

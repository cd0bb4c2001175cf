pub mod cognitive_profile_agent;

pub use cognitive_profile_agent::{
    CognitiveProfile, CognitiveProfileAgent, ProfilingStrategy, ResponseProfilingStrategy,
};

pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AgentParamsConfig, BoundaryMode, Channel, ExecutionConfig, FieldConfig, InitialConditions,
    KernelConfig, OutputConfig, SimulationConfig, StimulusConfig, StimulusSource, TimingConfig,
    UniverseConfig,
};
pub use sim_params::SimParams;
pub use snapshot::Snapshot;
pub use vecmath::{Vec2, clamp, wrap};

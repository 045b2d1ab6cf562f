use serde::{Deserialize, Serialize};

use crate::config::{BoundaryMode, Channel, KernelConfig};

/// Simulation parameters derived from the configuration, used on every tick.
/// Angles are in radians here (the config file uses degrees).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Domain
    pub width: u32,
    pub height: u32,
    pub boundary: BoundaryMode,

    // Run length
    pub num_agents: u32,
    pub num_steps: u32,
    pub record_interval_steps: u32,
    pub seed: u64,

    // Agent sensing / steering
    pub sensor_angle: f32,   // SA
    pub sensor_offset: f32,  // SO
    pub rotation_angle: f32, // RA
    pub deposit_amount: f32, // depT
    pub step_size: f32,
    pub reorient_probability: f32, // pCD
    pub sense_channel: Channel,

    // Field post-processing
    pub decay_rate: f32,
    pub kernel: KernelConfig,
    pub stimulus_weight: f32,

    // Execution
    pub parallel_sensing: bool,
}

impl SimParams {
    /// Total number of discrete cells in the domain.
    pub fn num_cells(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

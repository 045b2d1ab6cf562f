use serde::{Serialize, Deserialize};

/// The state of a run after a given tick, handed to the export/rendering layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of completed ticks when the snapshot was taken.
    pub tick: u32,
    /// Population size (constant for the run).
    pub agent_count: u32,
    /// Sum of the trail channel over all cells.
    pub trail_total: f32,
    /// Largest trail value in the field. Display normalization is left to the consumer.
    pub trail_max: f32,
    /// Moves refused this run because the target cell belonged to another agent.
    pub blocked_moves: u64,
    /// Releases of cells the releasing agent did not hold.
    pub stale_releases: u64,
    /// Row-major copy of the trail channel, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<(f32, f32)>>,
}

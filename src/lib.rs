//! Stigmergic trail-network simulation: agents sense a shared chemical field,
//! steer toward the strongest trail, move without sharing cells, and deposit
//! trail that then diffuses and decays.

pub mod agent;
pub mod field;
pub mod kernel;
pub mod occupancy;
pub mod simulation;

pub use agent::{Agent, AgentParams, Domain};
pub use field::{Cell, Field};
pub use kernel::{BilateralKernel, GridView, SmoothingKernel, StencilKernel};
pub use occupancy::OccupancyIndex;
pub use simulation::{RunStats, Simulation, TickPhase};

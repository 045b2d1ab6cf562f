use log::trace;
use physarum_common::{clamp, wrap, BoundaryMode, Channel, SimParams, Vec2};
use rand::Rng;
use std::f32::consts::TAU;

use crate::field::{Cell, Field};

/// Number of sensors per agent: left, centre, right.
pub const SENSOR_COUNT: usize = 3;

/// Fixed per-run sensing and steering parameters. Angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentParams {
    /// SO: distance from the agent to each sensor.
    pub sensor_offset: f32,
    /// SA: angle between the centre sensor and each side sensor.
    pub sensor_angle: f32,
    /// RA: how far the bearing turns toward the strongest sensor.
    pub rotation_angle: f32,
    /// depT: trail added on each successful move.
    pub deposit_amount: f32,
}

impl AgentParams {
    pub fn from_sim_params(params: &SimParams) -> Self {
        AgentParams {
            sensor_offset: params.sensor_offset,
            sensor_angle: params.sensor_angle,
            rotation_angle: params.rotation_angle,
            deposit_amount: params.deposit_amount,
        }
    }
}

/// Extent, edge behaviour and step length shared by every agent's movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    pub width: u32,
    pub height: u32,
    pub boundary: BoundaryMode,
    pub step_size: f32,
}

impl Domain {
    pub fn from_sim_params(params: &SimParams) -> Self {
        Domain {
            width: params.width,
            height: params.height,
            boundary: params.boundary,
            step_size: params.step_size,
        }
    }

    /// Brings an arbitrary point back into the domain.
    /// Clamped keeps it inside `[0, dim - 1]`, toroidal wraps into `[0, dim)`.
    #[inline(always)]
    pub fn confine(&self, p: Vec2) -> Vec2 {
        let (w, h) = (self.width as f32, self.height as f32);
        match self.boundary {
            BoundaryMode::Clamped => Vec2::new(clamp(p.x, 0.0, w - 1.0), clamp(p.y, 0.0, h - 1.0)),
            BoundaryMode::Toroidal => Vec2::new(wrap(p.x, w), wrap(p.y, h)),
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.is_finite() && p.x >= 0.0 && p.y >= 0.0 && p.x < self.width as f32 && p.y < self.height as f32
    }
}

/// A point agent that senses the field ahead of it, steers, moves and deposits.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub position: Vec2,
    /// Displacement per unit step. Not necessarily unit length (see `reorient`).
    pub direction: Vec2,
    /// Current forward bearing (radians) the sensor fan is centred on.
    pub sensor_angle: f32,
    pub params: AgentParams,
}

impl Agent {
    /// An agent facing `sensor_angle`, with its heading aligned to that bearing.
    pub fn new(position: Vec2, sensor_angle: f32, params: AgentParams) -> Self {
        Agent {
            position,
            direction: Vec2::from_angle(sensor_angle),
            sensor_angle,
            params,
        }
    }

    /// An agent with a random heading, as used for initial placement.
    pub fn random<R: Rng + ?Sized>(position: Vec2, params: AgentParams, rng: &mut R) -> Self {
        let mut agent = Agent::new(position, 0.0, params);
        agent.reorient(rng);
        agent
    }

    /// Integer cells read by the left, centre and right sensors.
    pub fn sensor_cells(&self) -> [(i64, i64); SENSOR_COUNT] {
        let theta = self.sensor_angle;
        let sa = self.params.sensor_angle;
        let so = self.params.sensor_offset;
        [theta - sa, theta, theta + sa].map(|bearing| {
            let p = self.position.offset_by(bearing, so);
            (p.x.round() as i64, p.y.round() as i64)
        })
    }

    /// Samples the three sensors and turns toward the strongest reading.
    ///
    /// Ties go to the lowest sensor index, so an even field always turns by `-RA`.
    /// Updates `sensor_angle` (kept in `[0, 2π)`) and `direction`; returns the chosen sensor index.
    pub fn sense(&mut self, field: &Field, domain: &Domain, channel: Channel) -> usize {
        let readings = self
            .sensor_cells()
            .map(|(x, y)| field.sample(x, y, channel, domain.boundary));
        let chosen = strongest_sensor(&readings);

        self.sensor_angle = wrap(self.sensor_angle + (chosen as f32 - 1.0) * self.params.rotation_angle, TAU);
        self.direction = Vec2::from_angle(self.sensor_angle);
        chosen
    }

    /// Replaces the heading with two independent uniforms in `[-1, 1]`.
    ///
    /// The pair is deliberately left unnormalized, so the step length varies with
    /// the draw. The sensor bearing follows the new heading.
    pub fn reorient<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.direction = Vec2::new(rng.random_range(-1.0f32..=1.0), rng.random_range(-1.0f32..=1.0));
        self.sensor_angle = self.direction.angle();
        trace!("reoriented to ({:.3}, {:.3})", self.direction.x, self.direction.y);
    }

    /// Where `advance` would put the agent. Does not touch the agent.
    #[inline(always)]
    pub fn project_move(&self, domain: &Domain) -> Vec2 {
        domain.confine(self.position + self.direction * domain.step_size)
    }

    /// Moves the agent to exactly the position `project_move` reports.
    #[inline(always)]
    pub fn advance(&mut self, domain: &Domain) {
        self.position = self.project_move(domain);
    }

    /// Adds `depT` to the trail at the agent's current cell.
    pub fn deposit(&self, field: &mut Field) {
        field.deposit(field.cell_of(self.position), self.params.deposit_amount, Channel::Trail);
    }

    pub fn cell(&self, field: &Field) -> Cell {
        field.cell_of(self.position)
    }
}

/// Index of the largest reading, lowest index on ties.
#[inline(always)]
pub fn strongest_sensor(readings: &[f32; SENSOR_COUNT]) -> usize {
    let mut best = 0;
    for (i, &value) in readings.iter().enumerate().skip(1) {
        if value > readings[best] {
            best = i;
        }
    }
    best
}

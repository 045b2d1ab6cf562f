use anyhow::Result;
use log::{debug, info, trace, warn};
use physarum_common::{SimParams, SimulationConfig, Snapshot, Vec2};
use rand::prelude::*;
use rand::seq::index;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::{Agent, AgentParams, Domain};
use crate::field::Field;
use crate::kernel::{self, SmoothingKernel};
use crate::occupancy::OccupancyIndex;

/// The phases of one tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Merge the stimulus channel into the trail.
    InjectStimulus,
    /// Every agent senses the same field snapshot and steers.
    SenseAll,
    /// Agents move one at a time, resolving cell conflicts, and deposit.
    MoveDepositAll,
    /// Smooth and decay the trail.
    FieldPostProcess,
}

impl TickPhase {
    pub const ORDER: [TickPhase; 4] = [
        TickPhase::InjectStimulus,
        TickPhase::SenseAll,
        TickPhase::MoveDepositAll,
        TickPhase::FieldPostProcess,
    ];
}

/// Counters accumulated over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Moves committed.
    pub moves: u64,
    /// Moves refused because another agent held the target cell.
    pub blocked_moves: u64,
    /// Random reorientations triggered by the reorientation probability.
    pub random_reorientations: u64,
}

/// Owns the field, the agents and the occupancy index, and drives them tick by tick.
pub struct Simulation {
    /// The simulation configuration.
    pub config: SimulationConfig,
    params: SimParams,
    domain: Domain,
    field: Field,
    agents: Vec<Agent>,
    occupancy: OccupancyIndex,
    kernel: Box<dyn SmoothingKernel>,
    /// Seeded RNG behind placement, both per-tick shuffles and reorientation.
    rng: StdRng,
    has_stimulus: bool,
    /// Agent visiting order, reshuffled in place before each ordered phase.
    order: Vec<usize>,
    current_tick: u32,
    stats: RunStats,
    stop_requested: Arc<AtomicBool>,
    /// Snapshots collected at record intervals.
    recorded_snapshots: Vec<Snapshot>,
}

impl Simulation {
    /// Creates a simulation with `num_agents` agents on distinct random cells.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        let mut rng = StdRng::seed_from_u64(params.seed);

        let agent_params = AgentParams::from_sim_params(&params);
        let agents = place_initial_agents(&params, agent_params, &mut rng)?;

        let stimulus = config
            .stimulus
            .as_ref()
            .map(|s| s.rasterize(params.width, params.height));

        Self::assemble(config, params, agents, stimulus, rng)
    }

    /// Creates a simulation from explicitly placed agents.
    ///
    /// `stimulus`, if given, replaces the pattern rasterized from the configuration.
    /// The injection weight still comes from the `[stimulus]` section, so an explicit
    /// grid without that section is rejected. Agents must lie inside the domain on
    /// pairwise distinct cells.
    pub fn from_agents(config: SimulationConfig, agents: Vec<Agent>, stimulus: Option<Vec<f32>>) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        if agents.is_empty() {
            anyhow::bail!("at least one agent is required.");
        }
        if stimulus.is_some() && config.stimulus.is_none() {
            anyhow::bail!("an explicit stimulus grid needs a [stimulus] section to set its weight.");
        }
        let rng = StdRng::seed_from_u64(params.seed);
        let stimulus = stimulus.or_else(|| {
            config
                .stimulus
                .as_ref()
                .map(|s| s.rasterize(params.width, params.height))
        });
        Self::assemble(config, params, agents, stimulus, rng)
    }

    fn assemble(
        config: SimulationConfig,
        params: SimParams,
        agents: Vec<Agent>,
        stimulus: Option<Vec<f32>>,
        rng: StdRng,
    ) -> Result<Self> {
        let domain = Domain::from_sim_params(&params);
        let has_stimulus = stimulus.is_some();
        let field = match stimulus {
            Some(pattern) => Field::with_stimulus(params.width, params.height, pattern)?,
            None => Field::new(params.width, params.height)?,
        };
        let kernel = kernel::from_config(&params.kernel)?;

        if agents.len() > field.num_cells() {
            anyhow::bail!("{} agents cannot fit on {} cells.", agents.len(), field.num_cells());
        }
        let occupancy = OccupancyIndex::new(field.width(), field.height());
        for (idx, agent) in agents.iter().enumerate() {
            if !domain.contains(agent.position) {
                anyhow::bail!("agent {} at {:?} lies outside the domain.", idx, agent.position);
            }
            let cell = field.cell_of(agent.position);
            if !occupancy.reserve(cell, idx) {
                anyhow::bail!("agent {} shares cell ({}, {}) with another agent.", idx, cell.x, cell.y);
            }
        }

        info!(
            "Simulation ready: {}x{} {:?} domain, {} agents, kernel radius {}, stimulus: {}.",
            params.width,
            params.height,
            params.boundary,
            agents.len(),
            kernel.radius(),
            has_stimulus
        );

        let order = (0..agents.len()).collect();
        Ok(Self {
            config,
            params,
            domain,
            field,
            agents,
            occupancy,
            kernel,
            rng,
            has_stimulus,
            order,
            current_tick: 0,
            stats: RunStats::default(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the simulation by one full tick and checks the occupancy invariant.
    pub fn step(&mut self) -> Result<()> {
        for phase in TickPhase::ORDER {
            self.run_phase(phase)?;
        }
        self.current_tick += 1;
        self.check_occupancy()?;

        debug!(
            "Tick {} | moves: {} | blocked: {} | trail total: {:.3}",
            self.current_tick,
            self.stats.moves,
            self.stats.blocked_moves,
            self.field.trail_total()
        );
        Ok(())
    }

    /// Runs a single phase. `step` runs all four in `TickPhase::ORDER`; calling
    /// phases individually exposes the partially updated state in between.
    pub fn run_phase(&mut self, phase: TickPhase) -> Result<()> {
        match phase {
            TickPhase::InjectStimulus => self.inject_stimulus(),
            TickPhase::SenseAll => self.sense_all(),
            TickPhase::MoveDepositAll => self.move_deposit_all()?,
            TickPhase::FieldPostProcess => self.post_process(),
        }
        Ok(())
    }

    /// Runs ticks until `num_steps` have completed or a stop is requested.
    /// The stop flag is only checked between ticks. Returns the ticks run by this call.
    pub fn run(&mut self) -> Result<u32> {
        let mut ran = 0;
        while self.current_tick < self.params.num_steps {
            if self.stop_requested.load(Ordering::Relaxed) {
                info!("Stop requested after tick {}.", self.current_tick);
                break;
            }
            self.step()?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Shared flag another thread can set to end `run` at the next tick boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    fn inject_stimulus(&mut self) {
        if self.has_stimulus && self.params.stimulus_weight != 0.0 {
            self.field.inject_stimulus(self.params.stimulus_weight);
        }
    }

    /// Every agent senses the field as it stands at the start of the phase.
    ///
    /// The visiting order is shuffled either way so the RNG stream does not depend
    /// on `parallel_sensing`; since sensing only reads the field, the parallel and
    /// sequential passes give identical results.
    fn sense_all(&mut self) {
        self.order.shuffle(&mut self.rng);

        let field = &self.field;
        let domain = &self.domain;
        let channel = self.params.sense_channel;

        if self.params.parallel_sensing {
            self.agents.par_iter_mut().for_each(|agent| {
                agent.sense(field, domain, channel);
            });
        } else {
            for &idx in &self.order {
                self.agents[idx].sense(field, domain, channel);
            }
        }
    }

    /// Moves and deposits agent by agent in a freshly shuffled order.
    ///
    /// An agent whose target cell is held by another agent reorients and does
    /// nothing else this tick.
    fn move_deposit_all(&mut self) -> Result<()> {
        self.order.shuffle(&mut self.rng);
        let p_reorient = self.params.reorient_probability as f64;

        for &idx in &self.order {
            let agent = &mut self.agents[idx];

            if self.rng.random_bool(p_reorient) {
                agent.reorient(&mut self.rng);
                self.stats.random_reorientations += 1;
            }

            let current_cell = self.field.cell_of(agent.position);
            let target_cell = self.field.cell_of(agent.project_move(&self.domain));

            if let Some(holder) = self.occupancy.owner(target_cell) {
                if holder != idx {
                    trace!(
                        "Agent {} blocked at ({}, {}) by agent {}.",
                        idx, target_cell.x, target_cell.y, holder
                    );
                    agent.reorient(&mut self.rng);
                    self.stats.blocked_moves += 1;
                    continue;
                }
            }

            self.occupancy.release(current_cell, idx);
            agent.advance(&self.domain);
            let new_cell = self.field.cell_of(agent.position);
            if !self.occupancy.reserve(new_cell, idx) {
                anyhow::bail!(
                    "agent {} could not claim ({}, {}) after a clear check.",
                    idx, new_cell.x, new_cell.y
                );
            }
            agent.deposit(&mut self.field);
            self.stats.moves += 1;
        }
        Ok(())
    }

    fn post_process(&mut self) {
        self.field
            .diffuse_and_decay(self.kernel.as_ref(), self.params.decay_rate, self.params.boundary);
    }

    /// Verifies that occupied cells and agents' cells are in one-to-one correspondence.
    pub fn check_occupancy(&self) -> Result<()> {
        let occupied = self.occupancy.len();
        if occupied != self.agents.len() {
            anyhow::bail!(
                "occupancy holds {} cells for {} agents after tick {}.",
                occupied,
                self.agents.len(),
                self.current_tick
            );
        }
        for (idx, agent) in self.agents.iter().enumerate() {
            let cell = self.field.cell_of(agent.position);
            let holder = self.occupancy.owner(cell);
            if holder != Some(idx) {
                anyhow::bail!(
                    "agent {} sits on ({}, {}) but the cell is held by {:?}.",
                    idx, cell.x, cell.y, holder
                );
            }
        }
        let stale = self.occupancy.stale_releases();
        if stale > 0 {
            warn!("{} stale occupancy releases so far (tick {}).", stale, self.current_tick);
        }
        Ok(())
    }

    /// Builds a snapshot of the current state.
    pub fn snapshot(&self, include_trail: bool, include_positions: bool) -> Snapshot {
        Snapshot {
            tick: self.current_tick,
            agent_count: self.agents.len() as u32,
            trail_total: self.field.trail_total(),
            trail_max: self.field.trail_max(),
            blocked_moves: self.stats.blocked_moves,
            stale_releases: self.occupancy.stale_releases(),
            trail: include_trail.then(|| self.field.trail().to_vec()),
            positions: include_positions.then(|| self.agent_positions()),
        }
    }

    /// Records a snapshot using the output flags from the configuration.
    pub fn record_snapshot(&mut self) {
        let output = &self.config.output;
        let snapshot = self.snapshot(output.save_trail_in_snapshot, output.save_positions_in_snapshot);
        debug!(
            "Recorded snapshot at tick {} (trail total {:.3}, max {:.3}).",
            snapshot.tick, snapshot.trail_total, snapshot.trail_max
        );
        self.recorded_snapshots.push(snapshot);
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }

    /// Current agent positions, in agent order.
    pub fn agent_positions(&self) -> Vec<(f32, f32)> {
        self.agents.iter().map(|a| (a.position.x, a.position.y)).collect()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn occupancy(&self) -> &OccupancyIndex {
        &self.occupancy
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Number of completed ticks.
    pub fn tick(&self) -> u32 {
        self.current_tick
    }

    pub fn is_finished(&self) -> bool {
        self.current_tick >= self.params.num_steps
    }
}

/// Places each agent on a distinct random cell, at the cell's integer corner.
fn place_initial_agents(params: &SimParams, agent_params: AgentParams, rng: &mut StdRng) -> Result<Vec<Agent>> {
    let num_cells = params.num_cells();
    let count = params.num_agents as usize;
    if count > num_cells {
        anyhow::bail!("cannot place {} agents on {} cells.", count, num_cells);
    }
    let width = params.width as usize;
    let cells = index::sample(rng, num_cells, count);
    let agents = cells
        .into_iter()
        .map(|cell| {
            let position = Vec2::new((cell % width) as f32, (cell / width) as f32);
            Agent::random(position, agent_params, rng)
        })
        .collect();
    Ok(agents)
}

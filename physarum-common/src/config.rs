use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

/// How coordinates outside `[0, width) × [0, height)` are treated.
/// Consumed identically by sensing, movement and smoothing.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Reads outside the domain return 0; positions are clamped to the last cell.
    Clamped,
    /// Coordinates wrap modulo the domain size.
    Toroidal,
}

/// The two channels held by every field cell.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Trail,
    Stimulus,
}

/// Smoothing kernel applied to the trail channel once per tick.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KernelConfig {
    /// Leaves every cell unchanged.
    Identity,
    /// Uniform average over a `(2r+1)²` window.
    Box { radius: u32 },
    /// Gaussian weights with standard deviation `sigma`, truncated at `radius`.
    Gaussian { sigma: f32, radius: u32 },
    /// 3×3 stencil with separate centre, edge (4-neighbour) and corner weights.
    Weighted { center: f32, edge: f32, corner: f32 },
    /// Explicit diffusion step `v + rate·∇²v` as a 5-point stencil. Needs `rate <= 0.25`.
    Laplacian { rate: f32 },
    /// Edge-preserving blur: spatial Gaussian times a Gaussian on value difference.
    Bilateral { radius: u32, sigma_spatial: f32, sigma_range: f32 },
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig::Box { radius: 1 }
    }
}

// Domain size and edge behaviour
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UniverseConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_boundary")]
    pub boundary: BoundaryMode,
}

// Run length and recording cadence
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub num_steps: u32,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    pub num_agents: u32,
    #[serde(default)]
    pub seed: u64,
}

/// Per-run agent parameters. Angles are given in degrees.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AgentParamsConfig {
    #[serde(default = "default_sensor_angle_deg")]
    pub sensor_angle_deg: f32,
    #[serde(default = "default_sensor_offset")]
    pub sensor_offset: f32,
    #[serde(default = "default_rotation_angle_deg")]
    pub rotation_angle_deg: f32,
    #[serde(default = "default_deposit_amount")]
    pub deposit_amount: f32,
    #[serde(default = "default_step_size")]
    pub step_size: f32,
    #[serde(default)]
    pub reorient_probability: f32,
    #[serde(default = "default_sense_channel")]
    pub sense_channel: Channel,
}

impl Default for AgentParamsConfig {
    fn default() -> Self {
        AgentParamsConfig {
            sensor_angle_deg: default_sensor_angle_deg(),
            sensor_offset: default_sensor_offset(),
            rotation_angle_deg: default_rotation_angle_deg(),
            deposit_amount: default_deposit_amount(),
            step_size: default_step_size(),
            reorient_probability: 0.0,
            sense_channel: default_sense_channel(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FieldConfig {
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    #[serde(default)]
    pub kernel: KernelConfig,
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig { decay_rate: default_decay_rate(), kernel: KernelConfig::default() }
    }
}

/// A filled disc of stimulus (food source) painted into the stimulus channel.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StimulusSource {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub radius: f32,
    pub amount: f32,
}

/// Static stimulus pattern and the weight it is merged into the trail with each tick.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StimulusConfig {
    #[serde(default = "default_stimulus_weight")]
    pub weight: f32,
    #[serde(default)]
    pub sources: Vec<StimulusSource>,
}

impl StimulusConfig {
    /// Rasterizes the configured sources into a row-major `width × height` grid.
    /// Overlapping discs add up.
    pub fn rasterize(&self, width: u32, height: u32) -> Vec<f32> {
        let (w, h) = (width as usize, height as usize);
        let mut grid = vec![0.0f32; w * h];
        for source in &self.sources {
            let r = source.radius.max(0.0);
            let r_sq = r * r;
            let x0 = (source.x - r).floor().max(0.0) as usize;
            let y0 = (source.y - r).floor().max(0.0) as usize;
            let x1 = ((source.x + r).floor().max(0.0) as usize).min(w.saturating_sub(1));
            let y1 = ((source.y + r).floor().max(0.0) as usize).min(h.saturating_sub(1));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let dx = x as f32 - source.x.floor();
                    let dy = y as f32 - source.y.floor();
                    if dx * dx + dy * dy <= r_sq {
                        grid[y * w + x] += source.amount;
                    }
                }
            }
        }
        grid
    }
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default)]
    pub save_positions: bool,
    #[serde(default = "default_true")]
    pub save_stats: bool,
    #[serde(default)]
    pub save_positions_in_snapshot: bool,
    #[serde(default)]
    pub save_trail_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "physarum".to_string(),
            save_positions: false,
            save_stats: true,
            save_positions_in_snapshot: false,
            save_trail_in_snapshot: false,
            format: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExecutionConfig {
    /// Run the sensing pass on the rayon pool. Results are identical either way.
    #[serde(default = "default_true")]
    pub parallel_sensing: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig { parallel_sensing: true }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub universe: UniverseConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    #[serde(default)]
    pub agent_params: AgentParamsConfig,
    #[serde(default)]
    pub field: FieldConfig,
    #[serde(default)]
    pub stimulus: Option<StimulusConfig>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every option that would make the run ill-defined.
    pub fn validate(&self) -> Result<()> {
        let u = &self.universe;
        if u.width == 0 || u.height == 0 {
            anyhow::bail!("universe dimensions must be non-zero (got {}x{}).", u.width, u.height);
        }
        let num_cells = u.width as u64 * u.height as u64;
        let num_agents = self.initial_conditions.num_agents as u64;
        if num_agents == 0 {
            anyhow::bail!("num_agents must be greater than 0.");
        }
        if num_agents > num_cells {
            anyhow::bail!(
                "num_agents ({}) exceeds the number of cells ({}); agents cannot be placed without collisions.",
                num_agents, num_cells
            );
        }

        let a = &self.agent_params;
        if !(0.0..=1.0).contains(&a.reorient_probability) {
            anyhow::bail!("reorient_probability must be in [0, 1] (got {}).", a.reorient_probability);
        }
        if !a.sensor_angle_deg.is_finite() || !a.rotation_angle_deg.is_finite() {
            anyhow::bail!("sensor_angle_deg and rotation_angle_deg must be finite.");
        }
        if !a.sensor_offset.is_finite() || a.sensor_offset < 0.0 {
            anyhow::bail!("sensor_offset must be finite and non-negative (got {}).", a.sensor_offset);
        }
        if !a.deposit_amount.is_finite() || a.deposit_amount < 0.0 {
            anyhow::bail!("deposit_amount must be finite and non-negative (got {}).", a.deposit_amount);
        }
        if !a.step_size.is_finite() || a.step_size <= 0.0 {
            anyhow::bail!("step_size must be finite and positive (got {}).", a.step_size);
        }

        if !(0.0..=1.0).contains(&self.field.decay_rate) {
            anyhow::bail!("decay_rate must be in [0, 1] (got {}).", self.field.decay_rate);
        }
        validate_kernel(&self.field.kernel, u.width.max(u.height))?;

        if let Some(stimulus) = &self.stimulus {
            if !stimulus.weight.is_finite() || stimulus.weight < 0.0 {
                anyhow::bail!("stimulus weight must be finite and non-negative (got {}).", stimulus.weight);
            }
            for source in &stimulus.sources {
                let inside = source.x >= 0.0
                    && source.y >= 0.0
                    && source.x < u.width as f32
                    && source.y < u.height as f32;
                if !inside || !source.amount.is_finite() || source.amount < 0.0 || !source.radius.is_finite() {
                    anyhow::bail!("stimulus source {:?} must be finite, non-negative and lie inside the domain.", source);
                }
            }
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let a = &self.agent_params;
        SimParams {
            width: self.universe.width,
            height: self.universe.height,
            boundary: self.universe.boundary,
            num_agents: self.initial_conditions.num_agents,
            num_steps: self.timing.num_steps,
            record_interval_steps: self.timing.record_interval_steps.max(1),
            seed: self.initial_conditions.seed,
            sensor_angle: a.sensor_angle_deg.to_radians(),
            sensor_offset: a.sensor_offset,
            rotation_angle: a.rotation_angle_deg.to_radians(),
            deposit_amount: a.deposit_amount,
            step_size: a.step_size,
            reorient_probability: a.reorient_probability,
            sense_channel: a.sense_channel,
            decay_rate: self.field.decay_rate,
            kernel: self.field.kernel.clone(),
            stimulus_weight: self.stimulus.as_ref().map_or(0.0, |s| s.weight),
            parallel_sensing: self.execution.parallel_sensing,
        }
    }
}

fn validate_kernel(kernel: &KernelConfig, max_radius: u32) -> Result<()> {
    if let KernelConfig::Box { radius } | KernelConfig::Gaussian { radius, .. } | KernelConfig::Bilateral { radius, .. } =
        *kernel
    {
        if radius > max_radius {
            anyhow::bail!("kernel radius {} exceeds the larger domain side {}.", radius, max_radius);
        }
    }
    match *kernel {
        KernelConfig::Identity | KernelConfig::Box { .. } => {}
        KernelConfig::Gaussian { sigma, .. } => {
            if !sigma.is_finite() || sigma <= 0.0 {
                anyhow::bail!("gaussian kernel sigma must be positive (got {}).", sigma);
            }
        }
        KernelConfig::Weighted { center, edge, corner } => {
            let weights = [center, edge, corner];
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                anyhow::bail!("weighted kernel weights must be finite and non-negative.");
            }
            if center + 4.0 * edge + 4.0 * corner <= 0.0 {
                anyhow::bail!("weighted kernel weights must not all be zero.");
            }
        }
        KernelConfig::Laplacian { rate } => {
            if !(0.0..=0.25).contains(&rate) {
                anyhow::bail!("laplacian rate must be in [0, 0.25] to stay a smoothing step (got {}).", rate);
            }
        }
        KernelConfig::Bilateral { sigma_spatial, sigma_range, .. } => {
            if !sigma_spatial.is_finite() || sigma_spatial <= 0.0 || !sigma_range.is_finite() || sigma_range <= 0.0 {
                anyhow::bail!("bilateral kernel sigmas must be positive.");
            }
        }
    }
    Ok(())
}

fn default_boundary() -> BoundaryMode {
    BoundaryMode::Toroidal
}

fn default_record_interval() -> u32 {
    50
}

fn default_sensor_angle_deg() -> f32 {
    45.0
}

fn default_sensor_offset() -> f32 {
    5.0
}

fn default_rotation_angle_deg() -> f32 {
    45.0
}

fn default_deposit_amount() -> f32 {
    5.0
}

fn default_step_size() -> f32 {
    1.0
}

fn default_sense_channel() -> Channel {
    Channel::Trail
}

fn default_decay_rate() -> f32 {
    0.01
}

fn default_stimulus_weight() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [universe]
        width = 40
        height = 30

        [timing]
        num_steps = 10

        [initial_conditions]
        num_agents = 100
        seed = 7
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = SimulationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.universe.boundary, BoundaryMode::Toroidal);
        assert_eq!(config.field.kernel, KernelConfig::Box { radius: 1 });
        assert_eq!(config.agent_params.sense_channel, Channel::Trail);
        assert!(config.stimulus.is_none());
        assert!(config.execution.parallel_sensing);

        let params = config.get_sim_params();
        assert_eq!(params.num_cells(), 1200);
        assert!((params.sensor_angle - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
        assert_eq!(params.stimulus_weight, 0.0);
    }

    #[test]
    fn full_config_parses_kernel_and_stimulus() {
        let text = r#"
            [universe]
            width = 50
            height = 50
            boundary = "clamped"

            [timing]
            num_steps = 5
            record_interval_steps = 0

            [initial_conditions]
            num_agents = 10

            [agent_params]
            sensor_angle_deg = 22.5
            sense_channel = "stimulus"
            reorient_probability = 0.1

            [field]
            decay_rate = 0.05
            kernel = { type = "gaussian", sigma = 1.5, radius = 2 }

            [stimulus]
            weight = 0.25
            sources = [ { x = 10.0, y = 10.0, radius = 2.0, amount = 3.0 } ]

            [output]
            base_filename = "run"
            format = "bincode"
        "#;
        let config = SimulationConfig::from_toml_str(text).unwrap();
        assert_eq!(config.universe.boundary, BoundaryMode::Clamped);
        assert_eq!(config.field.kernel, KernelConfig::Gaussian { sigma: 1.5, radius: 2 });
        let params = config.get_sim_params();
        assert_eq!(params.sense_channel, Channel::Stimulus);
        assert_eq!(params.stimulus_weight, 0.25);
        assert_eq!(params.record_interval_steps, 1);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let text = MINIMAL.replace("width = 40", "width = 0");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn zero_agents_are_rejected() {
        let text = MINIMAL.replace("num_agents = 100", "num_agents = 0");
        assert!(SimulationConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn more_agents_than_cells_are_rejected() {
        let text = MINIMAL.replace("num_agents = 100", "num_agents = 1201");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn out_of_range_laplacian_rate_is_rejected() {
        let text = format!("{}\n[field]\nkernel = {{ type = \"laplacian\", rate = 0.5 }}\n", MINIMAL);
        assert!(SimulationConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn kernel_radius_beyond_the_domain_is_rejected() {
        let text = format!("{}\n[field]\nkernel = {{ type = \"box\", radius = 4000 }}\n", MINIMAL);
        assert!(SimulationConfig::from_toml_str(&text).is_err());

        let text = format!("{}\n[field]\nkernel = {{ type = \"gaussian\", sigma = 2.0, radius = 41 }}\n", MINIMAL);
        assert!(SimulationConfig::from_toml_str(&text).is_err());

        let text = format!("{}\n[field]\nkernel = {{ type = \"box\", radius = 40 }}\n", MINIMAL);
        assert!(SimulationConfig::from_toml_str(&text).is_ok());
    }

    #[test]
    fn negative_stimulus_is_rejected() {
        let source = "\n[stimulus]\nsources = [ { x = 5.0, y = 5.0, radius = 1.0, amount = -2.0 } ]\n";
        assert!(SimulationConfig::from_toml_str(&format!("{}{}", MINIMAL, source)).is_err());

        let weight = "\n[stimulus]\nweight = -1.0\n";
        assert!(SimulationConfig::from_toml_str(&format!("{}{}", MINIMAL, weight)).is_err());
    }

    #[test]
    fn negative_dimension_fails_to_parse() {
        let text = MINIMAL.replace("height = 30", "height = -3");
        assert!(SimulationConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn rasterize_paints_discs() {
        let stimulus = StimulusConfig {
            weight: 1.0,
            sources: vec![
                StimulusSource { x: 2.0, y: 2.0, radius: 1.0, amount: 2.0 },
                StimulusSource { x: 0.0, y: 0.0, radius: 0.0, amount: 1.5 },
            ],
        };
        let grid = stimulus.rasterize(5, 5);
        assert_eq!(grid[2 * 5 + 2], 2.0);
        assert_eq!(grid[5 + 2], 2.0);
        assert_eq!(grid[2 * 5 + 3], 2.0);
        assert_eq!(grid[5 + 1], 0.0); // diagonal lies outside the unit disc
        assert_eq!(grid[0], 1.5);
        let total: f32 = grid.iter().sum();
        assert_eq!(total, 2.0 * 5.0 + 1.5);
    }
}

use anyhow::Result;
use physarum_common::{BoundaryMode, Channel, Vec2};
use rayon::prelude::*;

use crate::kernel::{GridView, SmoothingKernel};

/// A discrete cell of the field grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Cell { x, y }
    }
}

/// The shared two-channel scalar grid agents deposit into and sense.
///
/// Both channels are stored row-major. `trail` decays and diffuses every tick;
/// `stimulus` is static and only ever merged into `trail`.
#[derive(Debug)]
pub struct Field {
    width: usize,
    height: usize,
    trail: Vec<f32>,
    stimulus: Vec<f32>,
    // Output buffer for the smoothing pass, swapped with `trail` afterwards.
    scratch: Vec<f32>,
}

impl Field {
    /// Creates an empty field. Zero dimensions are a configuration error.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("field dimensions must be non-zero (got {}x{}).", width, height);
        }
        let (w, h) = (width as usize, height as usize);
        Ok(Field {
            width: w,
            height: h,
            trail: vec![0.0; w * h],
            stimulus: vec![0.0; w * h],
            scratch: vec![0.0; w * h],
        })
    }

    /// Creates a field whose stimulus channel holds `stimulus` (row-major).
    pub fn with_stimulus(width: u32, height: u32, stimulus: Vec<f32>) -> Result<Self> {
        let mut field = Self::new(width, height)?;
        if stimulus.len() != field.num_cells() {
            anyhow::bail!(
                "stimulus has {} values but the field has {} cells.",
                stimulus.len(),
                field.num_cells()
            );
        }
        if stimulus.iter().any(|v| !v.is_finite() || *v < 0.0) {
            anyhow::bail!("stimulus values must be finite and non-negative.");
        }
        field.stimulus = stimulus;
        Ok(field)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_cells(&self) -> usize {
        self.width * self.height
    }

    #[inline(always)]
    pub fn index(&self, cell: Cell) -> usize {
        cell.y * self.width + cell.x
    }

    pub fn trail(&self) -> &[f32] {
        &self.trail
    }

    pub fn stimulus(&self) -> &[f32] {
        &self.stimulus
    }

    pub fn channel(&self, channel: Channel) -> &[f32] {
        match channel {
            Channel::Trail => &self.trail,
            Channel::Stimulus => &self.stimulus,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut [f32] {
        match channel {
            Channel::Trail => &mut self.trail,
            Channel::Stimulus => &mut self.stimulus,
        }
    }

    /// Value of `channel` at `cell`.
    pub fn get(&self, cell: Cell, channel: Channel) -> f32 {
        self.channel(channel)[self.index(cell)]
    }

    /// Discretizes a continuous position: floor, then clamp into the grid.
    /// Every component that needs "the agent's cell" goes through here.
    #[inline(always)]
    pub fn cell_of(&self, position: Vec2) -> Cell {
        // `as usize` saturates negatives (and NaN) to 0.
        let x = (position.x.floor() as usize).min(self.width - 1);
        let y = (position.y.floor() as usize).min(self.height - 1);
        Cell { x, y }
    }

    /// Adds `amount` to `channel` at `cell`.
    pub fn deposit(&mut self, cell: Cell, amount: f32, channel: Channel) {
        let idx = self.index(cell);
        self.channel_mut(channel)[idx] += amount;
    }

    /// Reads `channel` at integer coordinates.
    ///
    /// `Clamped`: anything outside the grid reads as 0. `Toroidal`: coordinates wrap.
    #[inline(always)]
    pub fn sample(&self, x: i64, y: i64, channel: Channel, boundary: BoundaryMode) -> f32 {
        let (w, h) = (self.width as i64, self.height as i64);
        let (sx, sy) = match boundary {
            BoundaryMode::Clamped => {
                if x < 0 || y < 0 || x >= w || y >= h {
                    return 0.0;
                }
                (x, y)
            }
            BoundaryMode::Toroidal => (x.rem_euclid(w), y.rem_euclid(h)),
        };
        self.channel(channel)[sy as usize * self.width + sx as usize]
    }

    /// Adds `weight × stimulus` into the trail channel.
    pub fn inject_stimulus(&mut self, weight: f32) {
        self.trail
            .par_iter_mut()
            .zip(self.stimulus.par_iter())
            .for_each(|(t, s)| *t += weight * s);
    }

    /// Smooths the trail channel with `kernel`, then scales it by `1 - decay_rate`.
    ///
    /// Each output row only reads the previous trail buffer, so rows are computed
    /// in parallel.
    pub fn diffuse_and_decay(&mut self, kernel: &dyn SmoothingKernel, decay_rate: f32, boundary: BoundaryMode) {
        let width = self.width;
        let retain = 1.0 - decay_rate;
        let view = GridView::new(&self.trail, width, self.height, boundary);

        self.scratch
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = kernel.smooth(&view, x, y) * retain;
                }
            });

        std::mem::swap(&mut self.trail, &mut self.scratch);
    }

    pub fn trail_total(&self) -> f32 {
        self.trail.par_iter().sum()
    }

    pub fn trail_max(&self) -> f32 {
        self.trail.par_iter().cloned().reduce(|| f32::NEG_INFINITY, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::StencilKernel;

    #[test]
    fn zero_dimensions_fail() {
        assert!(Field::new(0, 5).is_err());
        assert!(Field::new(5, 0).is_err());
        assert!(Field::with_stimulus(2, 2, vec![0.0; 3]).is_err());
        assert!(Field::with_stimulus(2, 2, vec![f32::NAN; 4]).is_err());
        assert!(Field::with_stimulus(2, 2, vec![0.0, -1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn trail_max_reports_negative_peaks() {
        let mut field = Field::new(2, 2).unwrap();
        assert_eq!(field.trail_max(), 0.0);
        for idx in 0..4 {
            field.deposit(Cell::new(idx % 2, idx / 2), -1.0 - idx as f32, Channel::Trail);
        }
        assert_eq!(field.trail_max(), -1.0);
    }

    #[test]
    fn deposit_adds_to_one_channel() {
        let mut field = Field::new(4, 3).unwrap();
        let cell = Cell::new(2, 1);
        field.deposit(cell, 1.5, Channel::Trail);
        field.deposit(cell, 1.5, Channel::Trail);
        assert_eq!(field.get(cell, Channel::Trail), 3.0);
        assert_eq!(field.get(cell, Channel::Stimulus), 0.0);
        assert_eq!(field.trail_total(), 3.0);
    }

    #[test]
    fn clamped_sampling_reads_zero_outside() {
        let mut field = Field::new(4, 4).unwrap();
        field.deposit(Cell::new(3, 0), 2.0, Channel::Trail);
        assert_eq!(field.sample(3, 0, Channel::Trail, BoundaryMode::Clamped), 2.0);
        assert_eq!(field.sample(-1, 0, Channel::Trail, BoundaryMode::Clamped), 0.0);
        assert_eq!(field.sample(4, 0, Channel::Trail, BoundaryMode::Clamped), 0.0);
        assert_eq!(field.sample(i64::MAX, i64::MIN, Channel::Trail, BoundaryMode::Clamped), 0.0);
    }

    #[test]
    fn toroidal_sampling_wraps() {
        let mut field = Field::new(4, 4).unwrap();
        field.deposit(Cell::new(3, 0), 2.0, Channel::Trail);
        assert_eq!(field.sample(-1, 0, Channel::Trail, BoundaryMode::Toroidal), 2.0);
        assert_eq!(field.sample(7, 4, Channel::Trail, BoundaryMode::Toroidal), 2.0);
        assert_eq!(field.sample(-1, -4, Channel::Trail, BoundaryMode::Toroidal), 2.0);
    }

    #[test]
    fn cell_of_floors_and_clamps() {
        let field = Field::new(10, 10).unwrap();
        assert_eq!(field.cell_of(Vec2::new(3.9, 0.2)), Cell::new(3, 0));
        assert_eq!(field.cell_of(Vec2::new(-0.5, 12.0)), Cell::new(0, 9));
        assert_eq!(field.cell_of(Vec2::new(9.0, 9.999)), Cell::new(9, 9));
    }

    #[test]
    fn identity_kernel_without_decay_is_a_no_op() {
        let mut field = Field::new(6, 5).unwrap();
        for (i, cell) in [(0, 0), (5, 4), (2, 3), (3, 1)].iter().enumerate() {
            field.deposit(Cell::new(cell.0, cell.1), 0.37 * (i + 1) as f32, Channel::Trail);
        }
        let before = field.trail().to_vec();
        field.diffuse_and_decay(&StencilKernel::identity(), 0.0, BoundaryMode::Clamped);
        assert_eq!(field.trail(), &before[..]);
        field.diffuse_and_decay(&StencilKernel::identity(), 0.0, BoundaryMode::Toroidal);
        assert_eq!(field.trail(), &before[..]);
    }

    #[test]
    fn box_kernel_conserves_mass_on_a_torus() {
        let mut field = Field::new(8, 6).unwrap();
        field.deposit(Cell::new(0, 0), 9.0, Channel::Trail);
        field.deposit(Cell::new(4, 3), 4.0, Channel::Trail);
        field.diffuse_and_decay(&StencilKernel::box_average(1), 0.0, BoundaryMode::Toroidal);
        assert!((field.trail_total() - 13.0).abs() < 1e-4);
        // The corner spike wraps onto the opposite edges.
        assert!((field.get(Cell::new(7, 5), Channel::Trail) - 1.0).abs() < 1e-6);
        assert!(field.trail_max() < 9.0);
    }

    #[test]
    fn decay_scales_the_whole_channel() {
        let mut field = Field::new(5, 5).unwrap();
        field.deposit(Cell::new(2, 2), 10.0, Channel::Trail);
        field.diffuse_and_decay(&StencilKernel::box_average(1), 0.1, BoundaryMode::Toroidal);
        assert!((field.trail_total() - 9.0).abs() < 1e-4);
        field.diffuse_and_decay(&StencilKernel::identity(), 1.0, BoundaryMode::Toroidal);
        assert_eq!(field.trail_total(), 0.0);
    }

    #[test]
    fn stimulus_injection_is_weighted_and_additive() {
        let mut stimulus = vec![0.0; 9];
        stimulus[4] = 2.0;
        let mut field = Field::with_stimulus(3, 3, stimulus).unwrap();
        field.deposit(Cell::new(1, 1), 1.0, Channel::Trail);
        field.inject_stimulus(0.5);
        field.inject_stimulus(0.5);
        assert_eq!(field.get(Cell::new(1, 1), Channel::Trail), 3.0);
        assert_eq!(field.get(Cell::new(1, 1), Channel::Stimulus), 2.0);
        assert_eq!(field.trail_total(), 3.0);
    }
}

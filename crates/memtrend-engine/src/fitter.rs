//! Online least-squares trend fitting over a sliding sample window.
//!
//! A [`TrendFitter`] holds the N most recent `(timestamp, free_pages)`
//! samples for one allocation order in a ring buffer and, once the window
//! has filled, produces the best-fit line through them in constant time and
//! constant memory. One fitter exists per (node, order) pair and lives for
//! the process lifetime.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Fixed-point scale applied to fitted slopes.
///
/// Slopes are integers in units of 1/100 pages per millisecond, retaining
/// one fractional digit under pure integer arithmetic.
pub const SLOPE_SCALE: i64 = 100;

/// Parameters of a best-fit line `y = m·x + c` over one lookback window.
///
/// # Scale contract
///
/// `slope` is scaled by [`SLOPE_SCALE`] (pages per millisecond × 100).
/// `intercept` is computed as `(Σy − slope·Σx) / N` with the *scaled* slope
/// folded in unrescaled, and with x-values translated so the oldest sample
/// in the window sits at x = 0. The pair is therefore only meaningful to a
/// consumer applying the same conventions; [`PredictionEngine`] does, and
/// its line-intersection formulas are written against this contract.
///
/// [`PredictionEngine`]: crate::engine::PredictionEngine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitResult {
    /// Slope of the fitted line, scaled by [`SLOPE_SCALE`].
    pub slope: i64,
    /// Intercept of the fitted line, in pages (see the scale contract).
    pub intercept: i64,
}

/// Outcome of one [`TrendFitter::observe`] call.
///
/// Neither non-fit variant is a fault: both simply withhold a prediction
/// for the order this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    /// The window is full and a line was fitted.
    Fit(FitResult),
    /// Warm-up: fewer than `lookback` samples seen so far.
    NotReady,
    /// The window has no x-variance; no line is computable.
    Degenerate,
}

impl FitOutcome {
    /// Returns the fit, if one was produced this cycle.
    pub fn fit(self) -> Option<FitResult> {
        match self {
            FitOutcome::Fit(fit) => Some(fit),
            FitOutcome::NotReady | FitOutcome::Degenerate => None,
        }
    }
}

/// Constant-memory least-squares line fitter over a sliding window.
///
/// The insertion cursor doubles as the pointer to the oldest entry: the slot
/// about to be overwritten is always the least-recent sample. Once the
/// cursor has wrapped a first time the fitter is permanently ready.
#[derive(Debug, Clone)]
pub struct TrendFitter {
    x: Vec<i64>,
    y: Vec<i64>,
    next: usize,
    ready: bool,
}

impl TrendFitter {
    /// Creates a fitter with the given lookback window capacity.
    ///
    /// `lookback` must be at least 2 for a line to be well-defined;
    /// [`EngineConfig::validate`] enforces this for engine-owned fitters.
    ///
    /// [`EngineConfig::validate`]: crate::config::EngineConfig::validate
    pub fn new(lookback: usize) -> Self {
        Self {
            x: vec![0; lookback],
            y: vec![0; lookback],
            next: 0,
            ready: false,
        }
    }

    /// Window capacity this fitter was created with.
    pub fn lookback(&self) -> usize {
        self.x.len()
    }

    /// Whether the lookback window has filled at least once.
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Inserts one sample and, once the window is full, fits a line.
    ///
    /// `new_x` is expected to be non-decreasing across calls (wall-clock
    /// milliseconds); violations are tolerated and merely make the fit
    /// meaningless. `new_y` may be any integer.
    pub fn observe(&mut self, new_x: i64, new_y: i64) -> FitOutcome {
        let slot = self.next;
        self.x[slot] = new_x;
        self.y[slot] = new_y;
        self.next = (self.next + 1) % self.x.len();
        if self.next == 0 {
            // Cursor wrapped: the window has filled and stays full forever.
            self.ready = true;
        }

        if !self.ready {
            return FitOutcome::NotReady;
        }

        // Squaring raw timestamps can overflow 64 bits, so translate the
        // window onto a local axis with the oldest sample at x = 0. The
        // cursor identifies the oldest slot. Translated terms are computed
        // on the fly; the stored buffer is left untouched.
        let n = self.x.len() as i64;
        let x_offset = self.x[self.next];

        let mut sigma_x: i64 = 0;
        let mut sigma_y: i64 = 0;
        let mut sigma_xy: i64 = 0;
        let mut sigma_xx: i64 = 0;
        for i in 0..self.x.len() {
            let x = self.x[i] - x_offset;
            sigma_x += x;
            sigma_y += self.y[i];
            sigma_xy += x * self.y[i];
            sigma_xx += x * x;
        }

        let slope_divisor = n * sigma_xx - sigma_x * sigma_x;
        if slope_divisor == 0 {
            trace!(sigma_x, "degenerate window, no x-variance");
            return FitOutcome::Degenerate;
        }

        let slope = ((n * sigma_xy - sigma_x * sigma_y) * SLOPE_SCALE) / slope_divisor;
        let intercept = (sigma_y - slope * sigma_x) / n;
        FitOutcome::Fit(FitResult { slope, intercept })
    }
}

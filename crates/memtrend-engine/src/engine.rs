//! Per-node prediction engine: trend comparison and action recommendation.
//!
//! A [`PredictionEngine`] owns one [`TrendFitter`] per allocation order for
//! a single NUMA node. Each monitoring cycle the caller feeds it the
//! per-order free-page samples plus a [`CycleContext`] of thresholds and
//! throughput rates, and receives back an [`Actions`] bitmask: start
//! reclamation, start compaction, or lower the free-memory watermarks.
//!
//! The model: total free memory and each order's free memory are assumed to
//! move linearly over the lookback window. The point where an order's trend
//! line meets the aggregate trend line is 100% fragmentation for that order,
//! since beyond it no block of that order would notionally remain. The
//! engine recommends acting when consumption would win the race against
//! reclaim or compaction throughput if remediation started right now.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fitter::{FitOutcome, FitResult, TrendFitter, SLOPE_SCALE};

bitflags! {
    /// Recommended actions for one prediction cycle.
    ///
    /// Flags are independent; any subset may be set. `LOWER_WATERMARKS`
    /// never coexists with `RECLAIM` or `COMPACT`: the latter two are only
    /// reachable while the aggregate free-page trend is shrinking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Actions: u8 {
        /// Begin page reclamation now.
        const RECLAIM = 1 << 0;
        /// Begin memory compaction now.
        const COMPACT = 1 << 1;
        /// Free memory is stable or growing; watermarks can come down.
        const LOWER_WATERMARKS = 1 << 2;
    }
}

/// One order's free-page measurement for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragSample {
    /// Free pages of this order (order 0: total free pages).
    pub free_pages: i64,
    /// Wall-clock time of the measurement, milliseconds.
    pub sampled_at_ms: i64,
}

/// Read-only per-cycle inputs owned by the caller.
///
/// These replace process-wide mutable state: the external observer that
/// measures live reclaim and compaction throughput publishes a fresh
/// snapshot each cycle. A rate of 0 means "not yet estimated" and gates the
/// corresponding recommendation off (the engine fails closed rather than
/// guessing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleContext {
    /// Free-page threshold below which reclamation is due, pages.
    pub high_watermark: i64,
    /// Measured reclamation throughput, pages per millisecond.
    pub reclaim_rate: i64,
    /// Measured compaction throughput, pages per millisecond.
    pub compaction_rate: i64,
    /// Current wall-clock time, milliseconds.
    pub now_ms: i64,
}

/// Trend-intersection prediction engine for one NUMA node.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    node: u32,
    fitters: Vec<TrendFitter>,
}

impl PredictionEngine {
    /// Builds an engine with one fitter per allocation order.
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        config.validate().map_err(EngineError::from)?;
        Ok(Self {
            node: config.node,
            fitters: (0..config.order_count)
                .map(|_| TrendFitter::new(config.lookback))
                .collect(),
        })
    }

    /// Node id this engine was built for (log correlation only).
    pub fn node(&self) -> u32 {
        self.node
    }

    /// Number of allocation-order classes this engine tracks.
    pub fn order_count(&self) -> usize {
        self.fitters.len()
    }

    /// Ingests one cycle of per-order samples and recommends actions.
    ///
    /// `samples[0]` is the aggregate (total free pages); higher indices are
    /// progressively larger contiguous-block size classes. The slice length
    /// must match [`order_count`](Self::order_count).
    ///
    /// Returns the empty set whenever any order's window is still warming
    /// up or is degenerate (cross-order comparison needs every line), and
    /// whenever a needed throughput rate is still 0.
    pub fn evaluate(
        &mut self,
        samples: &[FragSample],
        ctx: &CycleContext,
    ) -> EngineResult<Actions> {
        if samples.len() != self.fitters.len() {
            return Err(EngineError::SampleCount {
                expected: self.fitters.len(),
                got: samples.len(),
            }
            .into());
        }

        // Every fitter ingests its sample even when another order's window
        // is not ready yet; warm-up must advance uniformly across orders.
        let mut fits: Vec<Option<FitResult>> = Vec::with_capacity(samples.len());
        for (order, sample) in samples.iter().enumerate() {
            let outcome = self.fitters[order].observe(sample.sampled_at_ms, sample.free_pages);
            if let FitOutcome::Degenerate = outcome {
                trace!(node = self.node, order, "degenerate window, skipping cycle");
            }
            fits.push(outcome.fit());
        }
        let fits: Option<Vec<FitResult>> = fits.into_iter().collect();
        let Some(fits) = fits else {
            // A partial prediction is worse than none.
            return Ok(Actions::empty());
        };

        let mut actions = Actions::empty();
        let total = &fits[0];
        let free_pages = samples[0].free_pages;

        if total.slope >= 0 {
            // Free memory is stable or growing: relax reclaim aggressiveness
            // and defer fragmentation analysis to the next shrinking cycle.
            debug!(
                node = self.node,
                slope = total.slope,
                "free pages trending up, lowering watermarks"
            );
            return Ok(actions | Actions::LOWER_WATERMARKS);
        }

        // Aggregate free memory is shrinking. Without a reclaim throughput
        // baseline no recommendation can be made for this cycle.
        if ctx.reclaim_rate == 0 {
            trace!(node = self.node, "reclaim rate unknown, skipping cycle");
            return Ok(Actions::empty());
        }

        if free_pages <= ctx.high_watermark {
            debug!(
                node = self.node,
                consumption_rate = total.slope.abs(),
                reclaim_rate = ctx.reclaim_rate,
                free_pages,
                high_watermark = ctx.high_watermark,
                "free pages below high watermark, reclamation recommended"
            );
            actions |= Actions::RECLAIM;
        } else {
            // Race consumption against reclamation over the same deficit:
            // reclaim must start now if it could not clear the gap before
            // consumption crosses the watermark.
            let deficit = free_pages - ctx.high_watermark;
            let time_to_breach = deficit / total.slope.abs();
            let time_to_catchup = deficit / ctx.reclaim_rate;
            if time_to_breach >= time_to_catchup {
                trace!(
                    node = self.node,
                    time_to_breach,
                    time_to_catchup,
                    "consumption outpaces reclaim throughput"
                );
                debug!(
                    node = self.node,
                    consumption_rate = total.slope.abs(),
                    reclaim_rate = ctx.reclaim_rate,
                    free_pages,
                    high_watermark = ctx.high_watermark,
                    "high consumption rate, reclamation recommended"
                );
                actions |= Actions::RECLAIM;
            }
        }

        // Fragmentation check, coarsest order first so the most urgent need
        // short-circuits the scan.
        for order in (1..fits.len()).rev() {
            let line = &fits[order];
            if total.slope == line.slope {
                // Parallel lines never intersect.
                continue;
            }
            if ctx.compaction_rate == 0 {
                // No compaction throughput baseline: the cycle's picture is
                // incomplete, so fail closed for the whole cycle. This
                // deliberately discards any RECLAIM determined above; the
                // caller re-evaluates next cycle.
                trace!(node = self.node, "compaction rate unknown, skipping cycle");
                return Ok(Actions::empty());
            }

            // Intersection of this order's trend with the aggregate trend:
            // the moment of 100% fragmentation for the order. Slopes carry
            // the ×100 scale, so the x term is multiplied back up to
            // milliseconds.
            let divisor = line.slope - total.slope;
            let x_cross = ((total.intercept - line.intercept) * SLOPE_SCALE) / divisor;
            let y_cross =
                (line.slope * total.intercept - total.slope * line.intercept) / divisor;

            // A crossing in the past (possibly before the lookback window,
            // hence negative) or already due means compaction is overdue.
            if x_cross < 0 || x_cross < ctx.now_ms {
                debug!(
                    node = self.node,
                    order, x_cross, "out of higher-order pages, compaction recommended"
                );
                actions |= Actions::COMPACT;
                break;
            }

            let time_until_crossing = x_cross - ctx.now_ms;
            let time_to_compact = (total.intercept - y_cross) / ctx.compaction_rate;
            if time_until_crossing >= time_to_compact {
                trace!(
                    node = self.node,
                    order,
                    order_slope = line.slope,
                    compaction_rate = ctx.compaction_rate,
                    time_until_crossing,
                    time_to_compact,
                    "fragmentation crossing within compaction reach"
                );
                debug!(
                    node = self.node,
                    order, "higher-order consumption rate is high, compaction recommended"
                );
                actions |= Actions::COMPACT;
                break;
            }
        }

        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    const LOOKBACK: usize = 4;

    fn engine(order_count: usize) -> PredictionEngine {
        PredictionEngine::new(
            &EngineConfig::default()
                .with_order_count(order_count)
                .with_lookback(LOOKBACK),
        )
        .expect("valid config")
    }

    fn ctx(high_watermark: i64, reclaim_rate: i64, compaction_rate: i64, now_ms: i64) -> CycleContext {
        CycleContext {
            high_watermark,
            reclaim_rate,
            compaction_rate,
            now_ms,
        }
    }

    /// Runs full warm-up plus one evaluated cycle and returns the final
    /// action set. `series[order][cycle]` are free-page counts; timestamps
    /// advance 10 ms per cycle for every order.
    fn run_cycles(
        engine: &mut PredictionEngine,
        series: &[Vec<i64>],
        ctx: &CycleContext,
    ) -> Actions {
        let cycles = series[0].len();
        let mut actions = Actions::empty();
        for cycle in 0..cycles {
            let samples: Vec<FragSample> = series
                .iter()
                .map(|per_order| FragSample {
                    free_pages: per_order[cycle],
                    sampled_at_ms: cycle as i64 * 10,
                })
                .collect();
            actions = engine.evaluate(&samples, ctx).expect("sample count matches");
            if cycle + 1 < LOOKBACK {
                assert_eq!(actions, Actions::empty(), "warm-up cycle {cycle}");
            }
        }
        actions
    }

    #[test]
    fn empty_until_every_order_is_ready() {
        let mut engine = engine(2);
        let ctx = ctx(100, 50, 10, 30);
        for cycle in 0..LOOKBACK - 1 {
            let samples = [
                FragSample {
                    free_pages: 10_000 - cycle as i64,
                    sampled_at_ms: cycle as i64 * 10,
                },
                FragSample {
                    free_pages: 500,
                    sampled_at_ms: cycle as i64 * 10,
                },
            ];
            assert_eq!(
                engine.evaluate(&samples, &ctx).expect("two samples"),
                Actions::empty()
            );
        }
    }

    #[test]
    fn degenerate_order_suppresses_the_whole_cycle() {
        let mut engine = engine(2);
        let ctx = ctx(100, 50, 10, 30);
        // Constant timestamps give order 1 no x-variance.
        for _ in 0..LOOKBACK + 2 {
            let samples = [
                FragSample {
                    free_pages: 9_000,
                    sampled_at_ms: 500,
                },
                FragSample {
                    free_pages: 400,
                    sampled_at_ms: 500,
                },
            ];
            assert_eq!(
                engine.evaluate(&samples, &ctx).expect("two samples"),
                Actions::empty()
            );
        }
    }

    #[test]
    fn sample_count_mismatch_is_a_typed_error() {
        let mut engine = engine(3);
        let samples = [FragSample {
            free_pages: 1,
            sampled_at_ms: 0,
        }];
        let err = engine
            .evaluate(&samples, &ctx(0, 1, 1, 0))
            .expect_err("one sample for three orders");
        assert!(matches!(
            err.current_context(),
            EngineError::SampleCount {
                expected: 3,
                got: 1
            }
        ));
    }

    #[test]
    fn rising_free_memory_lowers_watermarks_only() {
        // Scenario A: order 0 strictly increasing. Even with a steeply
        // falling higher order and a known compaction rate, only
        // LOWER_WATERMARKS may come back.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![100, 200, 300, 400],
                vec![5_000, 4_950, 4_900, 4_850],
            ],
            &ctx(100, 50, 10, 30),
        );
        assert_eq!(actions, Actions::LOWER_WATERMARKS);
    }

    #[test]
    fn below_watermark_recommends_reclaim() {
        // Scenario B: order 0 falling and already under the watermark.
        // Order 1 falls at the same rate, so its line is parallel and the
        // compaction scan skips it.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![1_000, 990, 980, 970],
            ],
            &ctx(20_000, 50, 10, 30),
        );
        assert_eq!(actions, Actions::RECLAIM);
    }

    #[test]
    fn unknown_reclaim_rate_fails_closed() {
        // Same shrinking series as Scenario B, but no reclaim baseline.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![1_000, 990, 980, 970],
            ],
            &ctx(20_000, 0, 10, 30),
        );
        assert_eq!(actions, Actions::empty());
    }

    #[test]
    fn consumption_outpacing_reclaim_recommends_reclaim() {
        // Above the watermark, but the deficit would be consumed (98 ms)
        // before reclaim could clear it (at 200 pages/ms: 49 ms is enough,
        // so 98 >= 49 fires).
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![1_000, 990, 980, 970],
            ],
            &ctx(100, 200, 10, 30),
        );
        assert_eq!(actions, Actions::RECLAIM);
    }

    #[test]
    fn reclaim_able_to_keep_up_stays_quiet() {
        // time_to_breach 98 < time_to_catchup 197: reclaim started now
        // would still lose, wait. Order 1 parallel so no compaction signal.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![1_000, 990, 980, 970],
            ],
            &ctx(100, 50, 10, 30),
        );
        assert_eq!(actions, Actions::empty());
    }

    #[test]
    fn past_intersection_recommends_compaction() {
        // Scenario C: order 1 falls five times faster than order 0 from a
        // lower level, so the lines crossed before the lookback window
        // (x_cross < 0) and compaction is overdue.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![500, 450, 400, 350],
            ],
            &ctx(100, 50, 10, 30),
        );
        assert_eq!(actions, Actions::COMPACT);
    }

    #[test]
    fn highest_order_is_evaluated_first() {
        // Order 2 (scanned first) already crossed; order 1 is parallel to
        // order 0 and would be skipped anyway. The scan stops at order 2.
        let mut engine = engine(3);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![1_000, 990, 980, 970],
                vec![500, 450, 400, 350],
            ],
            &ctx(100, 50, 10, 30),
        );
        assert_eq!(actions, Actions::COMPACT);
    }

    #[test]
    fn future_intersection_within_compaction_reach() {
        // Order 1 starts above order 0's intercept, so the crossing sits in
        // the future (x_cross = 235 ms) but close enough that compaction at
        // 10 pages/ms should start now.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![5_000, 4_950, 4_900, 4_850],
            ],
            &ctx(100, 50, 10, 30),
        );
        assert_eq!(actions, Actions::COMPACT);
    }

    #[test]
    fn unknown_compaction_rate_discards_the_cycle() {
        // Scenario D: a reclaim recommendation was already determined (free
        // pages under the watermark) and a non-parallel order pair is
        // present, but the missing compaction baseline fails the whole
        // cycle closed.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![500, 450, 400, 350],
            ],
            &ctx(20_000, 50, 0, 30),
        );
        assert_eq!(actions, Actions::empty());
    }

    #[test]
    fn all_orders_parallel_preserves_reclaim() {
        // The zero-rate compaction gate sits behind the parallel check: if
        // every order moves in lockstep with the aggregate, a reclaim
        // recommendation survives even without a compaction baseline.
        let mut engine = engine(2);
        let actions = run_cycles(
            &mut engine,
            &[
                vec![10_000, 9_990, 9_980, 9_970],
                vec![1_000, 990, 980, 970],
            ],
            &ctx(20_000, 50, 0, 30),
        );
        assert_eq!(actions, Actions::RECLAIM);
    }
}

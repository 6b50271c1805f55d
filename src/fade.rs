//! Fade curves
//!
//! A tagged union rather than a class hierarchy (spec §9 design note): each
//! [`FadeCurve`] variant is a shape, and [`FadeState`] drives whichever shape
//! was requested through `steps` successive [`FadeState::calc_next_value`]
//! calls, monotonically approaching the target.

/// The available fade shapes. Extension is an additional variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeCurve {
    /// Constant per-step delta.
    #[default]
    Linear,
    /// Per-step delta grows with `step^2`.
    Quadratic,
    /// Per-step delta grows with `step^3`.
    Cubic,
    /// Per-step delta grows with `step^4`.
    Quadruple,
}

impl FadeCurve {
    fn exponent(self) -> i32 {
        match self {
            FadeCurve::Linear => 1,
            FadeCurve::Quadratic => 2,
            FadeCurve::Cubic => 3,
            FadeCurve::Quadruple => 4,
        }
    }
}

/// Per-sample fade state: holds the parameters derived at
/// [`FadeState::initialize`] time and produces one new sample per
/// [`FadeState::calc_next_value`] call.
///
/// Lifetime: created per call to `Channel::set_fade`, discarded on
/// completion or cancellation.
#[derive(Debug, Clone)]
pub struct FadeState {
    curve: FadeCurve,
    start: f64,
    target: f64,
    steps: u32,
    step: u32,
    /// `(target - start) / steps^exponent`, the coefficient applied to
    /// `step^exponent` at each tick.
    coefficient: f64,
    val_current: f64,
    is_done: bool,
}

impl FadeState {
    /// Compute internal parameters so that `steps` successive
    /// [`calc_next_value`](Self::calc_next_value) calls approach `target`.
    /// `steps` must be `>= 1`.
    pub fn initialize(curve: FadeCurve, start: f64, target: f64, steps: u32) -> Self {
        debug_assert!(steps >= 1, "fade_steps must be >= 1");
        let steps = steps.max(1);
        let diff = target - start;
        let coefficient = diff / (steps as f64).powi(curve.exponent());

        FadeState {
            curve,
            start,
            target,
            steps,
            step: 0,
            coefficient,
            val_current: start,
            is_done: diff == 0.0,
        }
    }

    /// Returns the next sample and updates `is_done` once the rounded value
    /// has reached or crossed the target in the direction of motion.
    ///
    /// Calling this after `is_done` is already set is undefined behavior
    /// upstream; here it simply keeps returning `target`.
    pub fn calc_next_value(&mut self) -> f64 {
        if self.is_done {
            return self.target;
        }

        self.step += 1;
        self.val_current = if self.step >= self.steps {
            // Guarantee exact arrival at `target` on the last step rather
            // than accumulated floating point drift.
            self.target
        } else {
            self.start + self.coefficient * (self.step as f64).powi(self.curve.exponent())
        };

        let rounded = self.val_current.round();
        self.is_done = if self.target >= self.start {
            rounded >= self.target
        } else {
            rounded <= self.target
        };

        self.val_current
    }

    /// Terminal flag; once true, further [`calc_next_value`](Self::calc_next_value)
    /// calls are a no-op returning `target`.
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    /// Current (possibly unrounded) value, used by [`crate::channel_fade::ChannelBoundFade`]
    /// to seed its values buffer before the first tick.
    pub fn val_current(&self) -> f64 {
        self.val_current
    }

    /// The step budget this fade was initialized with, used by the process
    /// task's runaway-fade sanity check.
    pub(crate) fn steps(&self) -> u32 {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(curve: FadeCurve, start: f64, target: f64, steps: u32) -> Vec<f64> {
        let mut fade = FadeState::initialize(curve, start, target, steps);
        let mut out = Vec::new();
        let mut guard = 0;
        while !fade.is_done() {
            out.push(fade.calc_next_value());
            guard += 1;
            assert!(guard <= steps + 1, "fade never completed");
        }
        out
    }

    #[test]
    fn linear_reaches_target_in_exact_steps() {
        let values = run_to_completion(FadeCurve::Linear, 0.0, 10.0, 5);
        assert_eq!(values.len(), 5);
        assert_eq!(values.last().copied().map(f64::round), Some(10.0));
    }

    #[test]
    fn linear_is_monotone_ascending() {
        let mut fade = FadeState::initialize(FadeCurve::Linear, 0.0, 100.0, 10);
        let mut prev = 0.0;
        while !fade.is_done() {
            let v = fade.calc_next_value();
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn linear_is_monotone_descending() {
        let mut fade = FadeState::initialize(FadeCurve::Linear, 100.0, 0.0, 10);
        let mut prev = 100.0;
        while !fade.is_done() {
            let v = fade.calc_next_value();
            assert!(v <= prev);
            prev = v;
        }
    }

    #[test]
    fn zero_length_move_is_done_immediately() {
        let fade = FadeState::initialize(FadeCurve::Linear, 42.0, 42.0, 8);
        assert!(fade.is_done());
    }

    #[test]
    fn quadratic_never_overshoots_and_hits_target() {
        for &(start, target) in &[(0.0, 255.0), (255.0, 0.0), (10.0, 20.0)] {
            let values = run_to_completion(FadeCurve::Quadratic, start, target, 16);
            assert!((values.last().unwrap() - target).abs() < 1e-9);
            if target >= start {
                assert!(values.iter().all(|&v| v <= target + 1e-9));
            } else {
                assert!(values.iter().all(|&v| v >= target - 1e-9));
            }
        }
    }

    #[test]
    fn cubic_and_quadruple_hit_target_exactly() {
        for curve in [FadeCurve::Cubic, FadeCurve::Quadruple] {
            let values = run_to_completion(curve, 5.0, 200.0, 12);
            assert!((values.last().unwrap() - 200.0).abs() < 1e-9);
        }
    }

    #[test]
    fn single_step_fade_completes_immediately() {
        let mut fade = FadeState::initialize(FadeCurve::Linear, 0.0, 50.0, 1);
        let v = fade.calc_next_value();
        assert!((v - 50.0).abs() < 1e-9);
        assert!(fade.is_done());
    }
}

//! Synthetic eye-position/velocity generator (§6 "Eye tracker feed").
//!
//! Produces a 1 kHz stream of [`proto::eyelink::EyeSample`]s: a fixation
//! held with Gaussian jitter, punctuated by occasional saccades whose
//! peak velocity is high enough to trip `engine::trial::fixation`'s
//! saccade detector. Grounded on `uwb_physics.rs`'s `generate_epoch()` —
//! Gaussian/uniform noise via `rand`/`rand_distr`, a small per-sample
//! classifier deciding which regime the current sample belongs to.

use proto::eyelink::{EyePoint, EyeSample, RecordType};
use rand::Rng;
use rand_distr::{Distribution, Normal};

#[derive(Debug, Clone, Copy)]
pub struct EyeNoiseConfig {
    /// Std. dev. of fixational jitter, in raw AI units per sample.
    pub jitter_std: f32,
    /// Probability per tick of a saccade starting while fixating.
    pub saccade_prob: f64,
    /// Saccade duration, in ticks (at 1 kHz, ms == ticks).
    pub saccade_duration_ticks: u32,
    /// Peak saccade velocity, in raw AI units/s.
    pub saccade_peak_velocity: f32,
}

impl Default for EyeNoiseConfig {
    fn default() -> Self {
        Self {
            jitter_std: 2.0,
            saccade_prob: 0.002,
            saccade_duration_ticks: 30,
            saccade_peak_velocity: 4000.0,
        }
    }
}

enum Regime {
    Fixating,
    Saccading { ticks_left: u32, target: EyePoint, start: EyePoint },
}

/// Stateful generator: call [`Self::next_sample`] once per simulated
/// tick. Not `Send`-bounded deliberately — callers own a single instance
/// per simulated subject.
pub struct EyeNoiseGenerator {
    config: EyeNoiseConfig,
    rng: rand::rngs::ThreadRng,
    jitter: Normal<f32>,
    pos: EyePoint,
    t_ms: u64,
    regime: Regime,
}

impl EyeNoiseGenerator {
    pub fn new(config: EyeNoiseConfig) -> Self {
        let jitter = Normal::new(0.0, config.jitter_std).unwrap_or_else(|_| Normal::new(0.0, 1.0).unwrap());
        Self {
            config,
            rng: rand::thread_rng(),
            jitter,
            pos: EyePoint::default(),
            t_ms: 0,
            regime: Regime::Fixating,
        }
    }

    fn maybe_start_saccade(&mut self) {
        if self.rng.gen_bool(self.config.saccade_prob) {
            let amp_h: f32 = self.rng.gen_range(-8.0..8.0);
            let amp_v: f32 = self.rng.gen_range(-8.0..8.0);
            self.regime = Regime::Saccading {
                ticks_left: self.config.saccade_duration_ticks,
                target: EyePoint { h: self.pos.h + amp_h * 100.0, v: self.pos.v + amp_v * 100.0 },
                start: self.pos,
            };
        }
    }

    /// Advances the generator by one tick and returns the resulting
    /// sample. `dt_ms` is the simulated tick period.
    pub fn next_sample(&mut self, dt_ms: u64) -> EyeSample {
        self.t_ms += dt_ms;
        let vel;

        match &mut self.regime {
            Regime::Fixating => {
                self.pos.h += self.jitter.sample(&mut self.rng);
                self.pos.v += self.jitter.sample(&mut self.rng);
                vel = EyePoint::default();
                self.maybe_start_saccade();
            }
            Regime::Saccading { ticks_left, target, start } => {
                let total = self.config.saccade_duration_ticks.max(1) as f32;
                let done = total - *ticks_left as f32;
                let frac = (done / total).clamp(0.0, 1.0);
                let prev = self.pos;
                self.pos = EyePoint {
                    h: start.h + (target.h - start.h) * frac,
                    v: start.v + (target.v - start.v) * frac,
                };
                let dt_s = dt_ms as f32 / 1000.0;
                vel = if dt_s > 0.0 {
                    EyePoint { h: (self.pos.h - prev.h) / dt_s, v: (self.pos.v - prev.v) / dt_s }
                } else {
                    EyePoint::default()
                };
                *ticks_left = ticks_left.saturating_sub(1);
                if *ticks_left == 0 {
                    self.pos = *target;
                    self.regime = Regime::Fixating;
                }
            }
        }

        // Clamp reported velocity magnitude to the configured peak so the
        // synthetic saccade reliably exceeds typical detector thresholds
        // without diverging unboundedly near the transition frames.
        let speed = (vel.h * vel.h + vel.v * vel.v).sqrt();
        let vel = if speed > self.config.saccade_peak_velocity && speed > 0.0 {
            let scale = self.config.saccade_peak_velocity / speed;
            EyePoint { h: vel.h * scale, v: vel.v * scale }
        } else {
            vel
        };

        EyeSample {
            timestamp_ms: self.t_ms,
            record_type: RecordType::Binocular,
            left_pos: self.pos,
            left_vel: vel,
            left_has_eye: true,
            right_pos: self.pos,
            right_vel: vel,
            right_has_eye: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixating_generator_stays_near_origin_without_saccades() {
        let mut gen = EyeNoiseGenerator::new(EyeNoiseConfig { saccade_prob: 0.0, ..Default::default() });
        let mut last = EyeSample { timestamp_ms: 0, record_type: RecordType::Binocular, left_pos: EyePoint::default(), left_vel: EyePoint::default(), left_has_eye: true, right_pos: EyePoint::default(), right_vel: EyePoint::default(), right_has_eye: true };
        for _ in 0..200 {
            last = gen.next_sample(1);
        }
        assert!(last.left_pos.h.abs() < 200.0);
        assert!(last.left_pos.v.abs() < 200.0);
    }

    #[test]
    fn forced_saccade_produces_high_velocity_samples() {
        let mut gen = EyeNoiseGenerator::new(EyeNoiseConfig { saccade_prob: 1.0, saccade_duration_ticks: 10, ..Default::default() });
        let mut saw_fast = false;
        for _ in 0..20 {
            let s = gen.next_sample(1);
            if s.left_vel.h.abs() > 1000.0 || s.left_vel.v.abs() > 1000.0 {
                saw_fast = true;
            }
        }
        assert!(saw_fast, "expected at least one high-velocity sample during a forced saccade");
    }
}

//! Continuous-mode stimulus channel waveform generators (§4.8).
//!
//! Grounded on `uwb_physics.rs`'s closed-form kinematic generators (pure
//! `fn(params, t) -> (v, p)` with no hidden state) — the same shape
//! carries over unchanged from synthesizing tag trajectories to
//! synthesizing chair-stimulus waveforms.

use std::f64::consts::PI;

/// Only `Chair` drives the chair device; every other kind is accepted
/// into a stimulus run but contributes nothing (§4.8 "residual kinds are
/// inert").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelKind {
    #[default]
    Chair,
    Inert,
}

#[derive(Debug, Clone, Copy)]
pub enum Waveform {
    /// `v(tau) = amplitude * sin(2*pi*tau/period + phase)`, active for
    /// `tau` in `[0, n_cycles * period)`.
    Sine { amplitude: f64, period_s: f64, phase_rad: f64, n_cycles: f64 },
    /// Ramp up over `ramp_s`, hold `amplitude` for `hold_s`, ramp back
    /// down over `ramp_s`.
    Trapezoid { amplitude: f64, ramp_s: f64, hold_s: f64 },
}

impl Waveform {
    /// Evaluates `(v, p)` at `tau` seconds since the channel's start tick
    /// within the duty cycle, `p` integrated in closed form so it never
    /// drifts from numerical accumulation error (§4.8).
    pub fn evaluate(&self, tau: f64) -> (f64, f64) {
        match *self {
            Waveform::Sine { amplitude, period_s, phase_rad, n_cycles } => {
                let window_end = n_cycles * period_s;
                if tau < 0.0 || tau >= window_end {
                    return (0.0, 0.0);
                }
                let omega = 2.0 * PI / period_s;
                let v = amplitude * (omega * tau + phase_rad).sin();
                let p = -amplitude * period_s / (2.0 * PI) * ((omega * tau + phase_rad).cos() - phase_rad.cos());
                (v, p)
            }
            Waveform::Trapezoid { amplitude, ramp_s, hold_s } => {
                let total = 2.0 * ramp_s + hold_s;
                if tau < 0.0 {
                    return (0.0, 0.0);
                }
                if tau >= total {
                    return (0.0, amplitude * (ramp_s + hold_s));
                }
                if tau < ramp_s {
                    let v = amplitude * (tau / ramp_s);
                    let p = amplitude * tau * tau / (2.0 * ramp_s);
                    (v, p)
                } else if tau < ramp_s + hold_s {
                    let p_at_ramp_end = amplitude * ramp_s / 2.0;
                    let v = amplitude;
                    let p = p_at_ramp_end + amplitude * (tau - ramp_s);
                    (v, p)
                } else {
                    let s = tau - (ramp_s + hold_s);
                    let p_before = amplitude * ramp_s / 2.0 + amplitude * hold_s;
                    let v = amplitude * (1.0 - s / ramp_s);
                    let p = p_before + amplitude * s - amplitude * s * s / (2.0 * ramp_s);
                    (v, p)
                }
            }
        }
    }
}

/// One per-channel record in a stimulus run (§3 "Stimulus run").
#[derive(Debug, Clone, Copy)]
pub struct StimulusChannel {
    pub kind: ChannelKind,
    pub on: bool,
    pub start_tick: u64,
    pub marker_channel: Option<u16>,
    pub waveform: Waveform,
}

/// Duty-cycle-scoped collection of stimulus channels; only `Chair`
/// channels sum into the chair command (§4.8).
#[derive(Debug, Clone, Default)]
pub struct StimulusRun {
    pub period_ticks: u64,
    pub channels: Vec<StimulusChannel>,
}

impl StimulusRun {
    /// Sums every active `Chair` channel's contribution at `tick`,
    /// `dt_s` seconds per tick, relative to each channel's own start
    /// tick within the duty cycle (§4.8).
    pub fn evaluate_chair(&self, tick: u64, dt_s: f64) -> (f64, f64) {
        let mut v_sum = 0.0;
        let mut p_sum = 0.0;
        for ch in &self.channels {
            if !ch.on || ch.kind != ChannelKind::Chair {
                continue;
            }
            let tick_in_cycle = if self.period_ticks > 0 { tick % self.period_ticks } else { tick };
            if tick_in_cycle < ch.start_tick {
                continue;
            }
            let tau = (tick_in_cycle - ch.start_tick) as f64 * dt_s;
            let (v, p) = ch.waveform.evaluate(tau);
            v_sum += v;
            p_sum += p;
        }
        (v_sum, p_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_is_zero_outside_its_window() {
        let w = Waveform::Sine { amplitude: 1.0, period_s: 1.0, phase_rad: 0.0, n_cycles: 2.0 };
        let (v, p) = w.evaluate(3.0);
        assert_eq!(v, 0.0);
        assert_eq!(p, 0.0);
    }

    #[test]
    fn sine_velocity_matches_closed_form_at_origin() {
        let w = Waveform::Sine { amplitude: 2.0, period_s: 1.0, phase_rad: 0.0, n_cycles: 1.0 };
        let (v, p) = w.evaluate(0.0);
        assert!((v - 0.0).abs() < 1e-9);
        assert!((p - 0.0).abs() < 1e-9);
    }

    #[test]
    fn trapezoid_reaches_expected_total_displacement() {
        let w = Waveform::Trapezoid { amplitude: 10.0, ramp_s: 0.1, hold_s: 0.2 };
        let (v, p) = w.evaluate(0.1 + 0.2 + 0.1 + 1e-9);
        assert!(v.abs() < 1e-6);
        assert!((p - 10.0 * (0.1 + 0.2)).abs() < 1e-6);
    }

    #[test]
    fn trapezoid_holds_final_position_after_completion() {
        let w = Waveform::Trapezoid { amplitude: 5.0, ramp_s: 0.05, hold_s: 0.1 };
        let (v, p) = w.evaluate(10.0);
        assert_eq!(v, 0.0);
        assert!((p - 5.0 * (0.05 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn stimulus_run_sums_only_chair_channels() {
        let run = StimulusRun {
            period_ticks: 1000,
            channels: vec![
                StimulusChannel {
                    kind: ChannelKind::Chair,
                    on: true,
                    start_tick: 0,
                    marker_channel: None,
                    waveform: Waveform::Trapezoid { amplitude: 1.0, ramp_s: 0.01, hold_s: 0.01 },
                },
                StimulusChannel {
                    kind: ChannelKind::Inert,
                    on: true,
                    start_tick: 0,
                    marker_channel: None,
                    waveform: Waveform::Trapezoid { amplitude: 100.0, ramp_s: 0.01, hold_s: 0.01 },
                },
            ],
        };
        let (v, _p) = run.evaluate_chair(0, 0.001);
        assert!(v.abs() <= 1.0 + 1e-9);
    }
}

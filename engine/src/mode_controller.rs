//! # mode_controller
//!
//! Mode controller (§4.2, C10) and the per-trial RUN-phase state machine
//! (§4.3 "State machine (per trial)"). Ties together every other engine
//! component per the §5 "Ordering guarantees" tick sequence.
//!
//! Grounded on the teacher's `procedure_engine.rs` (`RaceState` enum +
//! one big `tick()` dispatching on it) for the outer mode machine, and on
//! `auto_director.rs`'s linear "do the next thing, bail out on the first
//! error" tick body for the inner per-tick ordering — the teacher never
//! had five collaborators to sequence in one tick, but the shape (a
//! straight-line function, no handler registry) is the same idiom scaled
//! up.

use std::sync::Arc;

use proto::eyelink::EyePoint;
use proto::mailbox::{Ack, Command, FixRewSettings, RunMode, Telemetry, TrialStartArgs};
use proto::records::result_flags;
use proto::trialcodes::{RpDistroResponseKind, SpecialOp};

use crate::config::{DutyCycle, EngineConfig};
use crate::continuous::{ContinuousEngine, ContinuousFixationConfig, ContinuousOutcome};
use crate::data_model::{FixAccuracyBox, Trajectory};
use crate::devices::ai::AiDevice;
use crate::devices::ao_chair::ChairDevice;
use crate::devices::dio::DioDevice;
use crate::devices::eyelink::EyelinkDevice;
use crate::devices::rdisplay::RemoteDisplay;
use crate::error::EngineError;
use crate::mailbox::MailboxEngineSide;
use crate::markers::{MarkerStream, SPECIAL_OP_MARKER_BIT};
use crate::recording::RecordingWriter;
use crate::scheduler::ScanClock;
use crate::trial::fixation::{
    self, normal_check_disabled, within_tolerance, FixationCheck, LostFixLatch, RpDistroAccumulator, SearchDwell,
    SearchOutcome, Selection,
};
use crate::trial::interpreter::{self, TrialAuthoredState};
use crate::trial::trajectory::{self, EyeAverager, VStabState};
use crate::trial::TrialOutcome;

/// Raw-AI-unit-to-degree conversion for eye position/velocity (§3 "Eye
/// tracker feed": "raw AI units ... fixation engine converts to
/// degrees"). No calibration authority exists in this workspace, so the
/// 1/100-degree wire scale used for trial-code positions is reused here
/// (§9 Open Question, recorded in DESIGN.md).
const AI_UNITS_PER_DEG: f32 = 100.0;

fn ai_to_deg(p: EyePoint) -> EyePoint {
    EyePoint { h: p.h / AI_UNITS_PER_DEG, v: p.v / AI_UNITS_PER_DEG }
}

/// Response-pushbutton threshold (§4.6 "2.0-V threshold"). `AiScan`
/// samples are raw 12-bit-range counts; this assumes a +/-5V, 12-bit
/// front end, matching the position/velocity scale's own 100-units-per-
/// unit convention (§9 Open Question).
const RESPONSE_THRESHOLD_VOLTS: f32 = 2.0;
const AI_VOLTS_PER_COUNT: f32 = 5.0 / 2048.0;

fn ai_to_volts(raw: i16) -> f32 {
    raw as f32 * AI_VOLTS_PER_COUNT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Test,
    Trial,
    ContinuousBetween,
    ContinuousActive,
}

impl From<Mode> for RunMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Idle => RunMode::Idle,
            Mode::Test => RunMode::Test,
            Mode::Trial => RunMode::Trial,
            Mode::ContinuousBetween => RunMode::ContinuousBetween,
            Mode::ContinuousActive => RunMode::ContinuousActive,
        }
    }
}

/// The device/channel collaborators the mode controller owns for its
/// entire lifetime (§3 "Ownership": "Device abstractions own their board
/// resources ... exactly one caller (the engine) owns each").
pub struct Devices {
    pub ai: Box<dyn AiDevice>,
    pub chair: Box<dyn ChairDevice>,
    pub dio: Box<dyn DioDevice>,
    pub eyelink: Box<dyn EyelinkDevice>,
    pub display: Box<dyn RemoteDisplay>,
}

pub struct ModeController {
    devices: Devices,
    mailbox: MailboxEngineSide,
    clock: Arc<ScanClock>,
    config: EngineConfig,
    markers: MarkerStream,
    mode: Mode,
    fix_rew: FixRewSettings,
    continuous: Option<ContinuousEngine>,
}

impl ModeController {
    pub fn new(devices: Devices, mailbox: MailboxEngineSide, clock: Arc<ScanClock>, config: EngineConfig) -> Self {
        let marker_spacing = config.marker_min_spacing_us;
        Self {
            devices,
            mailbox,
            clock,
            config,
            markers: MarkerStream::new(marker_spacing),
            mode: Mode::Idle,
            fix_rew: FixRewSettings::default(),
            continuous: None,
        }
    }

    /// Startup device check (§4.2 "Failure to find AI or DIO devices at
    /// startup is fatal and logs 'SHUTTING DOWN'"). The real device
    /// probe lives in each `Sim*`/hardware constructor; this call is the
    /// point where that probe's result is allowed to be fatal.
    pub fn probe_required_devices(&mut self) -> Result<(), EngineError> {
        self.devices
            .ai
            .configure(1, self.config.scan_interval_idle_us, None, true)
            .map_err(|e| EngineError::Fatal(format!("SHUTTING DOWN: AI device unavailable: {e}")))?;
        self.devices
            .dio
            .configure(self.config.scan_interval_idle_us, 0)
            .map_err(|e| EngineError::Fatal(format!("SHUTTING DOWN: DIO device unavailable: {e}")))?;
        Ok(())
    }

    fn enter_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.clock.set_scan_interval_us(match mode {
            Mode::Idle => self.config.scan_interval_idle_us,
            Mode::Test => self.config.scan_interval_test_us,
            Mode::Trial => self.config.scan_interval_trial_us,
            Mode::ContinuousBetween => self.config.scan_interval_between_us,
            Mode::ContinuousActive => self.config.scan_interval_continuous_us,
        });
        let _ = self.mailbox.send_telemetry(Telemetry::ModeChanged(mode.into()));
        if matches!(mode, Mode::ContinuousBetween) && self.continuous.is_none() {
            self.continuous = Some(ContinuousEngine::new(ContinuousFixationConfig::default()));
        }
    }

    fn duty_cycle(&self) -> DutyCycle {
        match self.mode {
            Mode::Idle => DutyCycle::IDLE,
            Mode::Test => DutyCycle::TEST,
            Mode::Trial => DutyCycle::TRIAL_RUNNING,
            Mode::ContinuousBetween => DutyCycle::TRIAL_BETWEEN,
            Mode::ContinuousActive => DutyCycle::CONTINUOUS,
        }
    }

    /// Top-level dispatch loop: mode transitions on `SWITCH_MODE`, trial
    /// runs on `TR_START`, one continuous tick per scan period while in
    /// `ContinuousActive` (§4.2).
    pub fn run_forever(&mut self) {
        self.enter_mode(Mode::Idle);
        loop {
            let timeout = std::time::Duration::from_micros(2 * self.clock.scan_interval_us() as u64);
            if !self.clock.wait_for_interrupt(timeout) {
                continue;
            }
            let _ = self.duty_cycle();

            match self.mailbox.poll_command() {
                Some(Command::SwitchMode(run_mode)) => {
                    self.enter_mode(match run_mode {
                        RunMode::Idle => Mode::Idle,
                        RunMode::Test => Mode::Test,
                        // SWITCH_MODE(Trial) lands in the between-trials wait;
                        // TR_START is what actually begins a trial (§4.2).
                        RunMode::Trial => Mode::ContinuousBetween,
                        RunMode::ContinuousBetween => Mode::ContinuousBetween,
                        RunMode::ContinuousActive => Mode::ContinuousActive,
                    });
                    let _ = self.mailbox.send_ack(Ack::Ok);
                }
                Some(Command::FixRewSettings(settings)) => {
                    self.fix_rew = settings;
                    let _ = self.mailbox.send_ack(Ack::Ok);
                }
                Some(Command::TrialStart(args)) => {
                    let outcome = self.run_trial(args);
                    self.enter_mode(Mode::ContinuousBetween);
                    match outcome {
                        Ok(result_flags) => {
                            let _ = self.mailbox.send_telemetry(Telemetry::TrialResult { result_flags });
                            let _ = self.mailbox.send_ack(Ack::Ok);
                        }
                        Err(e) => {
                            let _ = self.mailbox.send_ack(Ack::Error(e.to_string()));
                        }
                    }
                }
                Some(Command::ContinuousRunStart) => self.enter_mode(Mode::ContinuousActive),
                Some(Command::ContinuousRunStop) => self.enter_mode(Mode::ContinuousBetween),
                Some(_) => {
                    let _ = self.mailbox.send_ack(Ack::Unrecognized);
                }
                None => {}
            }

            if matches!(self.mode, Mode::ContinuousActive | Mode::ContinuousBetween) {
                self.continuous_tick();
            }
        }
    }

    fn continuous_tick(&mut self) {
        let dt_s = self.clock.scan_interval_us() as f64 / 1_000_000.0;
        let eye = self
            .devices
            .eyelink
            .get_next_sample(false)
            .ok()
            .flatten()
            .map(|(s, _)| ai_to_deg(s.combined_pos()))
            .unwrap_or_default();

        if let Some(continuous) = self.continuous.as_mut() {
            let (outcome, (cmd_vel, expected_pos)) = continuous.tick(dt_s, eye);
            let _ = self.devices.chair.update_chair(cmd_vel as f32, 0.0, expected_pos as f32);
            if outcome == ContinuousOutcome::FixationLost {
                let _ = self.mailbox.send_telemetry(Telemetry::TrialResult { result_flags: result_flags::LOSTFIX });
            }
        }
    }

    /// Runs one complete trial (§4.3 "State machine (per trial)"):
    /// INIT, PREPROCESS (interpret the code stream), WARMUP (prime two
    /// display frames), RUN (the per-tick loop, §5), FINALIZE (markers,
    /// recording close, result flags).
    pub fn run_trial(&mut self, args: TrialStartArgs) -> Result<u32, EngineError> {
        self.enter_mode(Mode::Trial);
        let dt_s = self.config.scan_interval_trial_us as f64 / 1_000_000.0;

        // PREPROCESS
        let mut authored = match interpreter::interpret(&args.codes, args.n_targets as usize) {
            Ok(a) => a,
            Err(e) => return self.finalize_failed_trial(&args, TrialOutcome::Error, e),
        };

        let n_targets = authored.n_targets;
        let mut trajectories = vec![Trajectory::default(); n_targets];
        let mut vstab_states: Vec<VStabState> = (0..n_targets).map(|_| VStabState { first_tick_on: true }).collect();
        let mut eye_avg = EyeAverager::new(self.config.eye_smoothing_window);
        let mut eye_avg_last = EyePoint::default();
        let mut lost_latch = LostFixLatch::default();
        let mut rp_accum = RpDistroAccumulator::default();
        let mut search_dwell = SearchDwell::default();
        let mut skip_on_saccade_latched = false;
        let mut saw_saccade_last_tick = false;
        let mut targets_selected_off = vec![false; n_targets];
        let mut mtr_countdown: i32 = authored.reward.mid_trial_reward_interval_ticks;
        let mut switch_fix_initial: Option<Selection> = None;
        let mut duration_adjusted = false;
        let mut selected_fix: Option<Selection> = None;
        let mut end_select = false;
        let mut response_detected = false;
        let mut respok = true;
        let mut check_respon_active = true;
        let mut last_eye_pos = EyePoint::default();

        let mut writer = RecordingWriter::open(
            self.recording_path(&args),
            (0..n_targets as u16).collect(),
            self.config.scan_interval_trial_us,
            false,
            self.config.recording_queue_depth,
        )
        .ok();

        self.markers.emit_start(&mut *self.devices.dio, args.file_name.as_deref()).ok();

        // WARMUP: prime the display with the first two frames of segment 0.
        let period_s = self
            .devices
            .display
            .get_geometry()
            .map(|g| g.frame_period_s())
            .unwrap_or(1.0 / 60.0);
        let mut pipeline = crate::trial::display_pipeline::DisplayPipeline::new(
            n_targets,
            period_s,
            self.config.scan_interval_trial_us as f64 / 1000.0,
            self.config.duplicate_frame_tolerance,
        );
        let _ = self.devices.ai.start();
        let _ = self.devices.dio.start();

        let mut cur_seg = 0usize;
        for (idx, t) in trajectories.iter_mut().enumerate() {
            trajectory::apply_segment_entry(t, &authored.segments[0].targets[idx], false);
        }
        if pipeline.start(&mut *self.devices.display, false).is_err() {
            return self.finalize_failed_trial(&args, TrialOutcome::Error, EngineError::RuntimeAbort("display start failed".into()));
        }

        // RUN
        let mut trial_end_tick = authored.segments.last().map(|s| s.start_tick).unwrap_or(0) + 1;
        let mut tick: u64 = 0;
        let outcome = 'run: loop {
            let timeout = std::time::Duration::from_micros(2 * self.clock.scan_interval_us() as u64);
            if !self.clock.wait_for_interrupt(timeout) {
                break 'run TrialOutcome::Error;
            }
            if self.clock.take_delayed_isr() {
                break 'run TrialOutcome::Error;
            }

            let scan = match self.devices.ai.unload(true) {
                Ok(s) => s,
                Err(e) => break 'run self.map_device_failure(e),
            };
            if let Some(w) = writer.as_mut() {
                w.stream_analog(&scan.slow);
                if !scan.fast.is_empty() {
                    w.stream_spike(&scan.fast);
                }
                if let Ok(events) = self.devices.dio.unload_events(64) {
                    if !events.is_empty() {
                        w.stream_events(&events);
                    }
                }
            }

            let eye_sample = match self.devices.eyelink.get_next_sample(false) {
                Ok(s) => s,
                Err(e) => break 'run self.map_device_failure(e),
            };
            let (eye_pos, eye_vel) = eye_sample
                .map(|(s, _)| (ai_to_deg(s.combined_pos()), ai_to_deg(s.combined_vel())))
                .unwrap_or((EyePoint::default(), EyePoint::default()));
            let eye_avg_prev = eye_avg_last;
            let eye_avg_now = eye_avg.push(eye_pos);
            eye_avg_last = eye_avg_now;

            // Optional delayed skip-on-saccade time warp (§4.5, §4.6).
            if skip_on_saccade_latched {
                skip_on_saccade_latched = false;
                if let Some(next_seg) = authored.segments.get(cur_seg + 1) {
                    let delta_ticks = next_seg.start_tick.saturating_sub(tick);
                    let delta_ms = delta_ticks as f64 * dt_s * 1000.0;
                    pipeline.warp_forward(delta_ms);
                    for t in trajectories.iter_mut() {
                        trajectory::step(t, delta_ticks as f64 * dt_s);
                    }
                    tick = next_seg.start_tick;
                }
                self.markers.pulse(&mut *self.devices.dio, SPECIAL_OP_MARKER_BIT).ok();
            }

            // Segment-boundary work.
            if let Some(next_seg) = authored.segments.get(cur_seg + 1) {
                if tick >= next_seg.start_tick {
                    // switch-fix decides its "initially fixated" target the instant the
                    // special segment ends (§4.6 "switch-fix").
                    if authored.special_op == SpecialOp::SwitchFix
                        && authored.special_segment == Some(cur_seg)
                        && switch_fix_initial.is_none()
                    {
                        let old = &authored.segments[cur_seg];
                        if let (Some(f1), Some(f2)) = (old.fix1, old.fix2) {
                            let p1 = EyePoint { h: trajectories[f1].p_h as f32, v: trajectories[f1].p_v as f32 };
                            let p2 = EyePoint { h: trajectories[f2].p_h as f32, v: trajectories[f2].p_v as f32 };
                            switch_fix_initial = Some(crate::trial::fixation::select_closer(eye_pos, p1, p2));
                        }
                    }
                    // §4.6: if select-by-fix/-2/select-duration-by-fix reached
                    // segment end with nothing selected, the nearest target is
                    // chosen by the same rule and `endSel` is set.
                    if matches!(
                        authored.special_op,
                        SpecialOp::SelectByFix | SpecialOp::SelectByFix2 | SpecialOp::SelectDurationByFix
                    ) && authored.special_segment == Some(cur_seg)
                        && selected_fix.is_none()
                    {
                        let old = &authored.segments[cur_seg];
                        if let (Some(f1), Some(f2)) = (old.fix1, old.fix2) {
                            let p1 = EyePoint { h: trajectories[f1].p_h as f32, v: trajectories[f1].p_v as f32 };
                            let p2 = EyePoint { h: trajectories[f2].p_h as f32, v: trajectories[f2].p_v as f32 };
                            let sel = crate::trial::fixation::select_closer(eye_pos, p1, p2);
                            if matches!(authored.special_op, SpecialOp::SelectByFix | SpecialOp::SelectByFix2) {
                                let off_idx = if sel == Selection::Fix1 { f2 } else { f1 };
                                targets_selected_off[off_idx] = true;
                            }
                            selected_fix = Some(sel);
                            end_select = true;
                        }
                    }
                    cur_seg += 1;
                    for (idx, t) in trajectories.iter_mut().enumerate() {
                        if let Some(st) = authored.segments[cur_seg].targets.get(idx) {
                            trajectory::apply_segment_entry(t, st, false);
                        }
                    }
                    if let Some(ch) = authored.segments[cur_seg].marker_channel {
                        self.markers.pulse(&mut *self.devices.dio, ch).ok();
                    }
                }
            }

            let is_special_segment = authored.special_segment == Some(cur_seg);
            let seg_fix1 = authored.segments[cur_seg].fix1;
            let seg_fix2 = authored.segments[cur_seg].fix2;
            let seg_fix_accuracy = authored.segments[cur_seg].fix_accuracy;
            let seg_grace_ticks = authored.segments[cur_seg].grace_ticks;
            let seg_mid_trial_reward = authored.segments[cur_seg].mid_trial_reward;
            let seg_check_respon = authored.segments[cur_seg].check_respon;
            let seg_respon_correct_ch = authored.segments[cur_seg].respon_correct_ch;
            let seg_respon_incorrect_ch = authored.segments[cur_seg].respon_incorrect_ch;

            // Trajectory step for every target, with one-tick perturbations.
            for (idx, t) in trajectories.iter_mut().enumerate() {
                trajectory::step(t, dt_s);
                if let Some(p) = authored.perturbations.iter().find(|p| p.target == idx) {
                    if p.period_ticks > 0 && tick % p.period_ticks as u64 == p.phase_ticks as u64 {
                        let (dv_h, dv_v, dvp_h, dvp_v) = if p.applies_to_pattern {
                            (0.0, 0.0, p.amplitude, 0.0)
                        } else {
                            (p.amplitude, 0.0, 0.0, 0.0)
                        };
                        trajectory::apply_perturbation(t, dv_h, dv_v, dvp_h, dvp_v);
                    }
                }
                if t.vstab.on {
                    trajectory::apply_vstab(t, &mut vstab_states[idx], eye_avg_prev, eye_avg_now);
                }
            }

            // Publish the pending display frame if due.
            for (idx, t) in trajectories.iter().enumerate() {
                pipeline.accumulate(idx, t.on && !targets_selected_off[idx], t.pending_win_h, t.pending_win_v, t.pending_pat_h, t.pending_pat_v);
            }
            match pipeline.tick(&mut *self.devices.display) {
                Ok(crate::trial::display_pipeline::DisplayEvent::DuplicateFrameExceeded) => break 'run TrialOutcome::DupFrame,
                Ok(_) => {}
                Err(e) => break 'run self.map_device_failure(e),
            }
            for t in trajectories.iter_mut() {
                t.pending_win_h = 0.0;
                t.pending_win_v = 0.0;
                t.pending_pat_h = 0.0;
                t.pending_pat_v = 0.0;
                if p_is_active(t) {
                    trajectory::undo_perturbation(t);
                }
            }

            // Fixation check and special-op handling.
            let saccade_now = fixation::saccade_present(eye_vel, authored.saccade_threshold);
            if !normal_check_disabled(authored.special_op, is_special_segment) {
                let check = if authored.special_op == SpecialOp::SwitchFix
                    && authored.special_segment.map_or(false, |ss| cur_seg >= ss)
                {
                    let p1 = seg_fix1.map(|i| EyePoint { h: trajectories[i].p_h as f32, v: trajectories[i].p_v as f32 });
                    let p2 = seg_fix2.map(|i| EyePoint { h: trajectories[i].p_h as f32, v: trajectories[i].p_v as f32 });
                    crate::trial::fixation::switch_fix_check(eye_pos, p1, p2, seg_fix_accuracy)
                } else {
                    match seg_fix1 {
                        Some(fix1_idx) => {
                            let target_pos = EyePoint { h: trajectories[fix1_idx].p_h as f32, v: trajectories[fix1_idx].p_v as f32 };
                            if within_tolerance(eye_pos, target_pos, seg_fix_accuracy) {
                                FixationCheck::Ok
                            } else {
                                FixationCheck::Violated
                            }
                        }
                        None => FixationCheck::Disabled,
                    }
                };
                if lost_latch.observe(check) {
                    break 'run TrialOutcome::LostFix;
                }
            }

            if is_special_segment {
                match authored.special_op {
                    SpecialOp::SkipOnSaccade => {
                        if saccade_now && !saw_saccade_last_tick {
                            skip_on_saccade_latched = true;
                        }
                    }
                    SpecialOp::SelectByFix | SpecialOp::SelectByFix2 => {
                        if saw_saccade_last_tick && !saccade_now {
                            if let (Some(f1), Some(f2)) = (seg_fix1, seg_fix2) {
                                let p1 = EyePoint { h: trajectories[f1].p_h as f32, v: trajectories[f1].p_v as f32 };
                                let p2 = EyePoint { h: trajectories[f2].p_h as f32, v: trajectories[f2].p_v as f32 };
                                let sel = crate::trial::fixation::select_closer(eye_pos, p1, p2);
                                let off_idx = if sel == Selection::Fix1 { f2 } else { f1 };
                                targets_selected_off[off_idx] = true;
                                selected_fix = Some(sel);
                                self.markers.pulse(&mut *self.devices.dio, SPECIAL_OP_MARKER_BIT).ok();
                            }
                        }
                    }
                    SpecialOp::SelectDurationByFix => {
                        if saw_saccade_last_tick && !saccade_now && !duration_adjusted {
                            if let (Some(f1), Some(f2)) = (seg_fix1, seg_fix2) {
                                let p1 = EyePoint { h: trajectories[f1].p_h as f32, v: trajectories[f1].p_v as f32 };
                                let p2 = EyePoint { h: trajectories[f2].p_h as f32, v: trajectories[f2].p_v as f32 };
                                let sel = crate::trial::fixation::select_closer(eye_pos, p1, p2);
                                duration_adjusted = true;
                                selected_fix = Some(sel);
                                let delta = crate::trial::fixation::select_duration_delta(sel, authored.seg_dur_min_ticks, authored.seg_dur_max_ticks);
                                {
                                    if delta > 0 {
                                        trial_end_tick = trial_end_tick.saturating_sub(delta);
                                        if let Some(ss) = authored.special_segment {
                                            for s in authored.segments.iter_mut().skip(ss + 2) {
                                                s.start_tick = s.start_tick.saturating_sub(delta);
                                            }
                                        }
                                    }
                                }
                                self.markers.pulse(&mut *self.devices.dio, SPECIAL_OP_MARKER_BIT).ok();
                            }
                        }
                    }
                    SpecialOp::ChooseFix1 | SpecialOp::ChooseFix2 => {
                        let correct_idx = if authored.special_op == SpecialOp::ChooseFix1 { seg_fix1 } else { seg_fix2 };
                        if let Some(idx) = correct_idx {
                            let p = EyePoint { h: trajectories[idx].p_h as f32, v: trajectories[idx].p_v as f32 };
                            if within_tolerance(eye_pos, p, seg_fix_accuracy) {
                                self.devices.dio.deliver_reward(self.fix_rew.withhold_variable_ratio, self.fix_rew.reward_pulse_len_ms[1], self.fix_rew.audio_pulse_len_ms).ok();
                                let other = if correct_idx == seg_fix1 { seg_fix2 } else { seg_fix1 };
                                if let Some(o) = other {
                                    targets_selected_off[o] = true;
                                }
                                self.markers.pulse(&mut *self.devices.dio, SPECIAL_OP_MARKER_BIT).ok();
                            }
                        }
                    }
                    SpecialOp::RpDistro => {
                        let value = match authored.rp_distro_kind {
                            RpDistroResponseKind::VectorSpeed => ((eye_vel.h as f64).powi(2) + (eye_vel.v as f64).powi(2)).sqrt(),
                            RpDistroResponseKind::HVelocity => eye_vel.h as f64,
                            RpDistroResponseKind::VVelocity => eye_vel.v as f64,
                            RpDistroResponseKind::Direction => (eye_vel.v as f64).atan2(eye_vel.h as f64),
                        };
                        rp_accum.observe(value);
                    }
                    SpecialOp::Search => {
                        let candidates: Vec<(usize, EyePoint, FixAccuracyBox)> = [seg_fix1, seg_fix2]
                            .into_iter()
                            .flatten()
                            .map(|i| (i, EyePoint { h: trajectories[i].p_h as f32, v: trajectories[i].p_v as f32 }, seg_fix_accuracy))
                            .collect();
                        match search_dwell.observe(eye_pos, &candidates, 20.0, 15.0, seg_grace_ticks) {
                            SearchOutcome::Selected(_) => break 'run TrialOutcome::Completed,
                            SearchOutcome::ExitedBounds => break 'run TrialOutcome::LostFix,
                            SearchOutcome::StillSearching => {}
                        }
                    }
                    SpecialOp::SwitchFix | SpecialOp::None => {}
                }
            }
            saw_saccade_last_tick = saccade_now;
            last_eye_pos = eye_pos;

            // Mid-trial reward.
            if seg_mid_trial_reward {
                if authored.reward.mid_trial_reward_interval_ticks > 0 {
                    mtr_countdown -= 1;
                    if mtr_countdown <= 0 {
                        self.devices.dio.deliver_reward(self.fix_rew.withhold_variable_ratio, authored.reward.reward_len_ms[0], self.fix_rew.audio_pulse_len_ms).ok();
                        mtr_countdown = authored.reward.mid_trial_reward_interval_ticks;
                    }
                } else if authored.segments.get(cur_seg + 1).map(|s| s.start_tick) == Some(tick + 1) {
                    self.devices.dio.deliver_reward(self.fix_rew.withhold_variable_ratio, authored.reward.reward_len_ms[0], self.fix_rew.audio_pulse_len_ms).ok();
                }
            }

            // GUI plot/trace push.
            let _ = self.mailbox.send_telemetry(Telemetry::EyeSample(proto::eyelink::EyeSample {
                timestamp_ms: tick * (self.config.scan_interval_trial_us as u64 / 1000).max(1),
                record_type: proto::eyelink::RecordType::Binocular,
                left_pos: eye_pos,
                left_vel: eye_vel,
                left_has_eye: true,
                right_pos: eye_pos,
                right_vel: eye_vel,
                right_has_eye: true,
            }));

            // Response check (§4.6 "Response pushbuttons").
            if seg_check_respon && check_respon_active {
                if let Some(&raw) = scan.slow.get(seg_respon_correct_ch as usize) {
                    if ai_to_volts(raw) > RESPONSE_THRESHOLD_VOLTS {
                        response_detected = true;
                    }
                }
                if let Some(&raw) = scan.slow.get(seg_respon_incorrect_ch as usize) {
                    if ai_to_volts(raw) > RESPONSE_THRESHOLD_VOLTS {
                        check_respon_active = false;
                        respok = false;
                    }
                }
            }

            // IPC command poll.
            match self.mailbox.poll_command() {
                Some(Command::TrialAbort) => break 'run TrialOutcome::AbortedByUser,
                Some(Command::SwitchMode(_)) => break 'run TrialOutcome::AbortedByUser,
                _ => {}
            }

            tick += 1;
            if tick >= trial_end_tick {
                break 'run TrialOutcome::Completed;
            }
        };

        // §4.6 fallback selection when the special segment is the trial's
        // final segment, so no segment-boundary transition ever ran it.
        if outcome == TrialOutcome::Completed
            && matches!(
                authored.special_op,
                SpecialOp::SelectByFix | SpecialOp::SelectByFix2 | SpecialOp::SelectDurationByFix
            )
            && selected_fix.is_none()
        {
            if let Some(ss) = authored.special_segment {
                let seg = &authored.segments[ss];
                if let (Some(f1), Some(f2)) = (seg.fix1, seg.fix2) {
                    let p1 = EyePoint { h: trajectories[f1].p_h as f32, v: trajectories[f1].p_v as f32 };
                    let p2 = EyePoint { h: trajectories[f2].p_h as f32, v: trajectories[f2].p_v as f32 };
                    let sel = crate::trial::fixation::select_closer(last_eye_pos, p1, p2);
                    if matches!(authored.special_op, SpecialOp::SelectByFix | SpecialOp::SelectByFix2) {
                        let off_idx = if sel == Selection::Fix1 { f2 } else { f1 };
                        targets_selected_off[off_idx] = true;
                    }
                    selected_fix = Some(sel);
                    end_select = true;
                }
            }
        }

        let _ = self.devices.ai.stop();
        let _ = self.devices.dio.stop();
        let _ = self.devices.display.stop_animation();

        if outcome == TrialOutcome::LostFix {
            self.markers.emit_lostfix(&mut *self.devices.dio).ok();
        }
        if outcome == TrialOutcome::AbortedByUser {
            self.markers.emit_abort(&mut *self.devices.dio).ok();
        }
        if matches!(outcome, TrialOutcome::DupFrame | TrialOutcome::Error) {
            self.markers.emit_abort(&mut *self.devices.dio).ok();
        }

        let retains = outcome.retains_data_and_reward();
        if retains {
            self.markers.emit_datasaved(&mut *self.devices.dio).ok();
        }
        self.markers.emit_stop(&mut *self.devices.dio).ok();

        // switch-fix withholds the trial-end reward unless the eye ended in
        // the target *not* initially fixated at the end of the special
        // segment (§4.6 "switch-fix").
        let reward_eligible = match (authored.special_op, switch_fix_initial, authored.special_segment) {
            (SpecialOp::SwitchFix, Some(initial), Some(ss)) => {
                let seg = &authored.segments[ss];
                let other = match initial {
                    Selection::Fix1 => seg.fix2,
                    Selection::Fix2 => seg.fix1,
                };
                match other {
                    Some(idx) => {
                        let p = EyePoint { h: trajectories[idx].p_h as f32, v: trajectories[idx].p_v as f32 };
                        within_tolerance(last_eye_pos, p, seg.fix_accuracy)
                    }
                    None => true,
                }
            }
            _ => true,
        };

        let mut flags = outcome.result_flag_bits();
        match selected_fix {
            Some(Selection::Fix1) => flags |= result_flags::FIX1_SELECTED,
            Some(Selection::Fix2) => flags |= result_flags::FIX2_SELECTED,
            None => {}
        }
        if end_select {
            flags |= result_flags::END_SELECT;
        }
        if response_detected {
            flags |= result_flags::RESPONSE_DETECTED;
        }
        if respok {
            flags |= result_flags::RESPOK;
        }
        if retains && reward_eligible {
            flags |= result_flags::REWARD_EARNED;
            self.devices.dio.deliver_reward(self.fix_rew.withhold_variable_ratio, self.fix_rew.reward_pulse_len_ms[0], self.fix_rew.audio_pulse_len_ms).ok();
            flags |= result_flags::REWARD_GIVEN;
        }

        if let Some(mut w) = writer.take() {
            w.set_result_flags(flags);
            let _ = w.close(retains);
        }

        Ok(flags)
    }

    fn finalize_failed_trial(&mut self, _args: &TrialStartArgs, outcome: TrialOutcome, err: EngineError) -> Result<u32, EngineError> {
        self.markers.emit_failure_sequence(&mut *self.devices.dio, false, true).ok();
        let _ = outcome;
        Err(err)
    }

    fn map_device_failure(&self, err: proto::error::DeviceError) -> TrialOutcome {
        use proto::error::DeviceError::*;
        match err {
            NotReady | Timeout | LinkDown | DeviceFault | InvalidBuffer | OutOfRange => TrialOutcome::Error,
        }
    }

    fn recording_path(&self, args: &TrialStartArgs) -> std::path::PathBuf {
        match &args.file_name {
            Some(name) => std::path::PathBuf::from(name),
            None => std::env::temp_dir().join(format!("{}_{}_notfiled.dat", args.protocol_name, args.set_name)),
        }
    }
}

fn p_is_active(t: &Trajectory) -> bool {
    t.perturb_v_h != 0.0 || t.perturb_v_v != 0.0 || t.perturb_vp_h != 0.0 || t.perturb_vp_v != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ai::SimAiDevice;
    use crate::devices::ao_chair::SimChairDevice;
    use crate::devices::dio::SimDioDevice;
    use crate::devices::eyelink::SimEyelinkDevice;
    use crate::devices::rdisplay::SimRemoteDisplay;
    use crate::scheduler::ScanTimer;
    use proto::trialcodes::{CodePair, TrialCode};

    fn controller() -> (ModeController, ScanTimer) {
        let (engine_side, _peer_side) = crate::mailbox::channel(8);
        let clock = ScanClock::new(1000);
        let timer = ScanTimer::start(clock.clone());
        let devices = Devices {
            ai: Box::new(SimAiDevice::new()),
            chair: Box::new(SimChairDevice::new()),
            dio: Box::new(SimDioDevice::new()),
            eyelink: Box::new(SimEyelinkDevice::new()),
            display: Box::new(SimRemoteDisplay::new()),
        };
        (ModeController::new(devices, engine_side, clock, EngineConfig::default()), timer)
    }

    fn pair(code: u16, time_ms: u32) -> CodePair {
        CodePair { code, time_ms }
    }

    #[test]
    fn probe_required_devices_succeeds_with_sim_devices() {
        let (mut controller, _timer) = controller();
        assert!(controller.probe_required_devices().is_ok());
    }

    #[test]
    fn minimal_trial_completes_and_retains_reward() {
        let (mut controller, _timer) = controller();
        controller.devices.ai.start().ok();
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(TrialCode::EndTrial as u16, 2),
        ];
        let args = TrialStartArgs {
            protocol_name: "p".into(),
            set_name: "s".into(),
            subset_name: "ss".into(),
            file_name: None,
            codes,
            n_targets: 1,
        };
        let path = controller.recording_path(&TrialStartArgs {
            protocol_name: "p".into(),
            set_name: "s".into(),
            subset_name: "ss".into(),
            file_name: None,
            codes: vec![],
            n_targets: 1,
        });
        let flags = controller.run_trial(args).unwrap();
        assert_ne!(flags & result_flags::DONE, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_trial_returns_protocol_error() {
        let (mut controller, _timer) = controller();
        let args = TrialStartArgs {
            protocol_name: "p".into(),
            set_name: "s".into(),
            subset_name: "ss".into(),
            file_name: None,
            codes: vec![pair(TrialCode::StartTrial as u16, 0)],
            n_targets: 1,
        };
        let err = controller.run_trial(args).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }
}

//! Continuous-mode active-target list (§3 "Active target", §4.8
//! "Active-target list edits").
//!
//! Grounded on `state.rs`'s flat `Vec<T>`-backed roster with bounds
//! checked at the edit boundary rather than the read boundary.

use crate::data_model::{ActiveTarget, A_MAX};

/// Why a list edit was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTargetError {
    /// Wholesale replacement while the session is recording, fixating,
    /// or stimulating (§4.8).
    ListLocked,
    IndexOutOfRange,
    TooManyTargets,
}

/// Whether a wholesale list replacement is currently permitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockState {
    pub recording: bool,
    pub fixating: bool,
    pub stimulating: bool,
}

impl LockState {
    fn locked(self) -> bool {
        self.recording || self.fixating || self.stimulating
    }
}

/// One edit to a single existing slot; any subset of fields may change
/// (§4.8 "Single-target edits ... are accepted at any time").
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveTargetEdit {
    pub on: Option<bool>,
    pub pos_h: Option<f64>,
    pub pos_v: Option<f64>,
    pub pattern_speed: Option<f64>,
    pub pattern_dir_deg: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ActiveTargetList {
    targets: Vec<ActiveTarget>,
    /// Set by [`ActiveTargetList::replace`]; the mode controller consumes
    /// this to trigger a display target reload and animation restart
    /// (§4.8 "Wholesale replacement triggers display target (re)load and
    /// a restart of the animation timeline").
    reload_pending: bool,
}

impl ActiveTargetList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets(&self) -> &[ActiveTarget] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [ActiveTarget] {
        &mut self.targets
    }

    /// Replaces the entire list, rejected outright while `lock` reports
    /// any of recording/fixating/stimulating (§4.8).
    pub fn replace(&mut self, new_targets: Vec<ActiveTarget>, lock: LockState) -> Result<(), ActiveTargetError> {
        if lock.locked() {
            return Err(ActiveTargetError::ListLocked);
        }
        if new_targets.len() > A_MAX {
            return Err(ActiveTargetError::TooManyTargets);
        }
        self.targets = new_targets;
        self.reload_pending = true;
        Ok(())
    }

    /// Applies a single-slot edit; always accepted regardless of lock
    /// state (§4.8).
    pub fn edit(&mut self, index: usize, edit: ActiveTargetEdit) -> Result<(), ActiveTargetError> {
        let t = self.targets.get_mut(index).ok_or(ActiveTargetError::IndexOutOfRange)?;
        if let Some(on) = edit.on {
            t.on = on;
        }
        if let Some(h) = edit.pos_h {
            t.pos_h = h;
        }
        if let Some(v) = edit.pos_v {
            t.pos_v = v;
        }
        if let Some(speed) = edit.pattern_speed {
            t.pattern_speed = speed;
        }
        if let Some(dir) = edit.pattern_dir_deg {
            t.pattern_dir_deg = dir;
        }
        Ok(())
    }

    /// Consumes the reload-pending flag set by the last [`replace`].
    ///
    /// [`replace`]: ActiveTargetList::replace
    pub fn take_reload_pending(&mut self) -> bool {
        std::mem::replace(&mut self.reload_pending, false)
    }

    pub fn fix1_index(&self) -> Option<usize> {
        self.targets.iter().position(|t| t.is_fix1)
    }

    pub fn fix2_index(&self) -> Option<usize> {
        self.targets.iter().position(|t| t.is_fix2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wholesale_replace_rejected_while_locked() {
        let mut list = ActiveTargetList::new();
        let lock = LockState { recording: true, ..Default::default() };
        let err = list.replace(vec![ActiveTarget::default()], lock).unwrap_err();
        assert_eq!(err, ActiveTargetError::ListLocked);
    }

    #[test]
    fn wholesale_replace_accepted_when_unlocked_and_sets_reload_flag() {
        let mut list = ActiveTargetList::new();
        list.replace(vec![ActiveTarget::default(); 3], LockState::default()).unwrap();
        assert_eq!(list.targets().len(), 3);
        assert!(list.take_reload_pending());
        assert!(!list.take_reload_pending());
    }

    #[test]
    fn single_target_edit_accepted_even_while_locked() {
        let mut list = ActiveTargetList::new();
        list.replace(vec![ActiveTarget::default()], LockState::default()).unwrap();
        let lock = LockState { stimulating: true, ..Default::default() };
        let _ = lock;
        list.edit(0, ActiveTargetEdit { pos_h: Some(3.0), ..Default::default() }).unwrap();
        assert_eq!(list.targets()[0].pos_h, 3.0);
    }

    #[test]
    fn replace_beyond_a_max_is_rejected() {
        let mut list = ActiveTargetList::new();
        let too_many = vec![ActiveTarget::default(); A_MAX + 1];
        let err = list.replace(too_many, LockState::default()).unwrap_err();
        assert_eq!(err, ActiveTargetError::TooManyTargets);
    }
}

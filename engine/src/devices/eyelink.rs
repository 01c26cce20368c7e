//! Eye-tracker feed contract (§6 "Eye tracker feed").
//!
//! Samples arrive over the IPC mailbox in production; this trait exists
//! so `trial::fixation`/`trial::trajectory` don't need to know whether a
//! sample came from the mailbox, a replay file, or `devsim::eye_noise`.

use proto::error::DeviceError;
use proto::eyelink::EyeSample;

pub trait EyelinkDevice: Send {
    /// Returns the next sample, or `None` if none is queued yet. `flush`
    /// discards any backlog and returns only the freshest sample.
    /// `is_repeat` in the Ok variant signals the caller received the same
    /// sample as last call (used to detect tracker stalls).
    fn get_next_sample(&mut self, flush: bool) -> Result<Option<(EyeSample, bool)>, DeviceError>;
}

pub struct SimEyelinkDevice {
    queue: std::collections::VecDeque<EyeSample>,
    last: Option<EyeSample>,
}

impl SimEyelinkDevice {
    pub fn new() -> Self {
        Self { queue: std::collections::VecDeque::new(), last: None }
    }

    pub fn push_sample(&mut self, sample: EyeSample) {
        self.queue.push_back(sample);
    }
}

impl Default for SimEyelinkDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl EyelinkDevice for SimEyelinkDevice {
    fn get_next_sample(&mut self, flush: bool) -> Result<Option<(EyeSample, bool)>, DeviceError> {
        if flush {
            if let Some(last) = self.queue.pop_back() {
                self.queue.clear();
                self.last = Some(last);
                return Ok(Some((last, false)));
            }
        }
        match self.queue.pop_front() {
            Some(s) => {
                self.last = Some(s);
                Ok(Some((s, false)))
            }
            None => Ok(self.last.map(|s| (s, true))),
        }
    }
}

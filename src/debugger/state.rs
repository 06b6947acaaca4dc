use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::stack::StackFrame;

/// Locks `mutex`, carrying on with the inner value if a previous holder
/// panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything that describes the current stop. Stop flag, snapshot and
/// location change together so no reader sees a half-cleared stop.
#[derive(Debug)]
pub struct StopState<E> {
    stopped: bool,
    frames: Vec<StackFrame<E>>,
    active_frame: usize,
    break_file: Option<String>,
    break_line: usize,
    step_pending: bool,
    generation: u64,
}

impl<E> Default for StopState<E> {
    fn default() -> Self {
        Self {
            stopped: false,
            frames: Vec::new(),
            active_frame: 0,
            break_file: None,
            break_line: 0,
            step_pending: false,
            generation: 0,
        }
    }
}

impl<E> StopState<E> {
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Generation of the stop being published or already live.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn publish(&mut self, location: Option<(&str, usize)>, frames: Vec<StackFrame<E>>) {
        self.stopped = true;
        self.frames = frames;
        self.active_frame = 0;
        match location {
            Some((file, line)) => {
                self.break_file = Some(file.to_string());
                self.break_line = line;
            }
            None => {
                self.break_file = None;
                self.break_line = 0;
            }
        }
    }

    /// Ends the current stop. Handles captured before this call stop
    /// resolving. `step_pending` survives.
    pub fn clear(&mut self) {
        self.stopped = false;
        self.frames.clear();
        self.active_frame = 0;
        self.break_file = None;
        self.break_line = 0;
        self.generation += 1;
    }

    /// Clears leftovers of an earlier stop, if any.
    pub fn clear_stale(&mut self) {
        if self.stopped || !self.frames.is_empty() || self.break_file.is_some() {
            self.clear();
        }
    }

    pub fn request_step(&mut self) {
        self.step_pending = true;
    }

    /// Consumes a pending step request.
    pub fn take_step(&mut self) -> bool {
        std::mem::take(&mut self.step_pending)
    }

    pub fn step_pending(&self) -> bool {
        self.step_pending
    }

    pub fn frames(&self) -> &[StackFrame<E>] {
        &self.frames
    }

    pub fn active_frame(&self) -> usize {
        self.active_frame
    }

    /// Environment of the active frame, only while stopped and only for
    /// handles of the current generation.
    pub fn active_env(&self) -> Option<&E> {
        if !self.stopped {
            return None;
        }
        self.frames
            .get(self.active_frame)
            .and_then(|frame| frame.env.get(self.generation))
    }

    /// Moves the active frame one level outward (`up`) or inward.
    pub fn shift_active_frame(&mut self, up: bool) {
        if !self.stopped {
            return;
        }
        if up {
            if self.active_frame + 1 < self.frames.len() {
                self.active_frame += 1;
            }
        } else if self.active_frame > 0 {
            self.active_frame -= 1;
        }
    }

    pub fn break_file(&self) -> Option<&str> {
        self.break_file.as_deref()
    }

    pub fn break_line(&self) -> usize {
        self.break_line
    }
}

/// The one place the interpreter thread sleeps: a "may continue" flag under
/// its own mutex plus a condition variable.
#[derive(Debug, Default)]
pub struct ResumeSignal {
    may_continue: Mutex<bool>,
    cv: Condvar,
}

impl ResumeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the flag. Must happen before the stop becomes visible to the UI
    /// so an early release is not overwritten.
    pub fn arm(&self) {
        *lock(&self.may_continue) = false;
    }

    pub fn release(&self) {
        *lock(&self.may_continue) = true;
        self.cv.notify_all();
    }

    /// Blocks until `release` has been called since the last `arm`.
    pub fn wait(&self) {
        let mut may_continue = lock(&self.may_continue);
        while !*may_continue {
            may_continue = self
                .cv
                .wait(may_continue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

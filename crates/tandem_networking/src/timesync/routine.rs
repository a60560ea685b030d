//! # Routine Scheduler
//!
//! Cooperative, single-threaded step functions driven by an external clock.
//!
//! A routine runs one step per resume and answers with how long to sleep.
//! The scheduler owns no thread: whoever owns it calls [`RoutineScheduler::advance`]
//! with elapsed time, and every routine that came due is resumed, catching up
//! missed steps one interval at a time.

/// What a routine wants after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutineStep {
    /// Resume after this many time units.
    Wait(u32),
    /// Finished; drop the routine.
    Done,
}

/// A resumable step function.
///
/// `C` is the context lent to each step.
pub trait Routine<C: ?Sized>: Send {
    /// Runs one step.
    fn resume(&mut self, context: &C) -> RoutineStep;
}

struct Scheduled<C: ?Sized> {
    due: u64,
    routine: Box<dyn Routine<C>>,
}

/// Runs routines against a monotonic time counter.
pub struct RoutineScheduler<C: ?Sized> {
    now: u64,
    routines: Vec<Scheduled<C>>,
}

impl<C: ?Sized> RoutineScheduler<C> {
    /// Empty scheduler at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: 0,
            routines: Vec::new(),
        }
    }

    /// Current scheduler time.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Live routines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routines.len()
    }

    /// Returns true if no routine is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    /// Time until the earliest routine is due, if any.
    #[must_use]
    pub fn next_due_in(&self) -> Option<u64> {
        self.routines.iter().map(|r| r.due.saturating_sub(self.now)).min()
    }

    /// Adds a routine; its first step runs on the next [`Self::advance`].
    pub fn start(&mut self, routine: Box<dyn Routine<C>>) {
        self.routines.push(Scheduled { due: self.now, routine });
    }

    /// Moves time forward by `delta` and resumes every routine that came due.
    pub fn advance(&mut self, delta: u64, context: &C) {
        self.now += delta;
        let now = self.now;
        self.routines.retain_mut(|scheduled| {
            while scheduled.due <= now {
                match scheduled.routine.resume(context) {
                    RoutineStep::Wait(units) => scheduled.due += u64::from(units.max(1)),
                    RoutineStep::Done => return false,
                }
            }
            true
        });
    }
}

impl<C: ?Sized> Default for RoutineScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

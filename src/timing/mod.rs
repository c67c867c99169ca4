//! Timing: clocks, the per-token delay model and the scheduler.

pub mod clock;
pub mod delay;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delay::DelayModel;
pub use scheduler::Scheduler;

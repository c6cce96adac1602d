mod clock;
mod driver;
mod engine;
mod phase;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use driver::{SharedEngine, TimerDriver};
pub use engine::{format_title, rescale_remaining, TimerEngine};
pub use phase::Phase;

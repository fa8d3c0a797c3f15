mod engine;
mod service;
mod session;

pub use engine::{TimerState, ViewingState, ViewingTimer};
pub use service::{TimerService, TimerServiceBuilder};
pub use session::{SessionRecord, SessionStore};

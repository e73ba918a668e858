mod session;
pub mod terminator;

pub use session::{PtySession, ReadEvent};
pub use terminator::TerminateOutcome;

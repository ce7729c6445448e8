//! Session lifecycle: the readiness-driven encode loop, its one-shot completion, and the
//! controller that owns the serial queue they run on.

pub mod cleanup;
pub mod continuation;
pub mod controller;
pub mod encode_loop;

pub use continuation::Completion;
pub use controller::{SessionController, run_session};
pub use encode_loop::{EncodeLoop, LoopState};

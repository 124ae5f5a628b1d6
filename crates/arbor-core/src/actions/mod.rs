//! Builtin action implementations.

mod delay;
mod subroutine;
mod summary;

pub use delay::{DelayAction, DelayInput};
pub use subroutine::{SubroutineAction, SubroutineInput};
pub use summary::SummaryAction;

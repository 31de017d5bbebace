//! Branching operators.
//!
//! [`ForkOperator`] fans a workpiece out to every branch concurrently;
//! [`SwitchOperator`] and [`AsyncSwitchOperator`] route it to exactly one.

mod fork;
mod switch;

pub use fork::{fork_same, ForkOperator};
pub use switch::{AsyncSwitchOperator, Switch, SwitchOperator};

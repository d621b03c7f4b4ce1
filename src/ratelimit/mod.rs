//! Rate limiting
//!
//! Two budgets constrain the client: how many sessions it may start
//! ([`SessionGovernor`]) and how many frames each connection may send
//! ([`SendLimiter`]). Neither is ever an error, only a delay.

mod governor;
mod limiter;

pub use governor::{GovernorStep, SessionGovernor};
pub use limiter::{Drain, Priority, SendBudget, SendLimiter};

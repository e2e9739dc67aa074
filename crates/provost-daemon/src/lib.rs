//! provost-daemon - Workers that turn ledger state into external effects.
//!
//! The daemon is a set of cooperating tasks around the `provost-core`
//! ledger:
//!
//! - [`observer`]: scan-rule workers that find artifacts due for work,
//!   claim them and enqueue jobs
//! - [`queue`]: dispatch queues between observers and proxies
//! - [`proxy`]: single-consumer effect proxies (confirmation email,
//!   directory writes)
//!
//! The binary (`provostd`) wires these together from configuration.

pub mod observer;
pub mod proxy;
pub mod queue;

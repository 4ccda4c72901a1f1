//! vigil observe - element waiting and visibility
//!
//! The two leaf services of the observation core: deciding whether an
//! element is the effective on-screen element at its location, and waiting
//! for elements to appear over one shared structural-change subscription
//! instead of one subscription per caller.

mod deadline;
mod profile;
mod visibility;
mod waiter;

pub use deadline::{Deadline, WaitTimeout, bounded_wait, deadline};
pub use profile::HostProfile;
pub use visibility::Visibility;
pub use waiter::{ElementWait, ElementWaiter, WaitCallback};

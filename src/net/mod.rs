//! Network-facing collaborators: the page-visit driver and the public IP
//! probe.
//!
//! Both are traits so the scheduler and the rotation controller can be
//! exercised with scripted implementations; the `Http*`/`Ipify*` types are
//! the reqwest-backed defaults used by the binary.

pub mod driver;
pub mod probe;

pub use driver::{HttpVisitDriver, PageVisitDriver, VisitResult};
pub use probe::{IpifyProbe, PublicIpProbe};

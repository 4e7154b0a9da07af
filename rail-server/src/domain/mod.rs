//! Domain types for the French rail network.
//!
//! Validated codes and classifications used by the route handlers. These
//! types are independent of any upstream API representation.

mod mode;
mod territory;
mod uic;

pub use mode::{AlertSeverity, TransportMode};
pub use territory::{DEPARTEMENTS, Departement, REGIONS, Region, region};
pub use uic::{InvalidUic, UicCode};

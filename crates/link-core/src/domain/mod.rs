//! Domain vocabulary for link control.
//!
//! This module contains pure types with no infrastructure dependencies: the
//! two status state spaces a device can be in, and the human rendering of a
//! device's connected time.
//!
//! # Why closed enums? (for beginners)
//!
//! A status arrives on the wire as free text.  Parsing it into an `enum`
//! once, at the edge, means the rest of the program can never hold an
//! invalid status: there is no "status 7" to range-check later.

/// Device status and client status.
pub mod status;

/// Connected-time formatting for display.
pub mod timespan;

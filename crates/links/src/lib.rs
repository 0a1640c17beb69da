//! Request-string parsing, URL normalization and source classification.
//!
//! Everything here is pure: no I/O, deterministic, and total over arbitrary
//! input strings.

pub mod policy;
pub mod source;
pub mod normalize;

pub use policy::*;
pub use source::*;
pub use normalize::*;

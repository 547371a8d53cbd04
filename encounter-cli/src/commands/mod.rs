//! CLI command implementations.

pub mod check;
pub mod compare;
pub mod convert;
pub mod crop;
pub mod fetch;
pub mod hash;
pub mod index;
pub mod recognize;
pub mod split;

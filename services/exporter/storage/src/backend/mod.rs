//! Queue backend implementations

pub mod mem;

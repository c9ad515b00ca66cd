//! Request coalescing.
//!
//! Each access pattern of the data model (occurrence by id, chain position,
//! commit by oid, ...) is fronted by one [`RequestCoalescer`]. Coalescers of
//! one logical operation share a [`BatchScope`], which owns the collection
//! delay and bounds the number of bulk calls in flight.

mod coalescer;
mod scope;

pub use coalescer::{BatchLoad, Phase, RequestCoalescer};
pub use scope::BatchScope;

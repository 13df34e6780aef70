//! Ready-made primitives built on the stub dispatcher.

pub mod counter;
pub mod map;

pub use counter::{AtomicCounter, COUNTER_TYPE, CounterOperation, CounterService};
pub use map::{
    DistributedMap, MAP_CHANGE_EVENT, MAP_TYPE, MapEvent, MapEventKind, MapEvents, MapOperation,
    MapService,
};

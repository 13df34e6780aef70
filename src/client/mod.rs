pub mod aggregate;
pub mod backend;
pub mod fsm;

pub use aggregate::AggregateClient;
pub use backend::{PrimitiveBackend, build_sessions};
pub use fsm::AggregateState;

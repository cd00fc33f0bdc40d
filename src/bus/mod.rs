//! 消息总线：信封、优先级路由器与 worker 池

pub mod envelope;
pub mod pool;
pub mod router;

pub use envelope::{
    EnvelopeContent, MessageEnvelope, MessageProtocol, NegotiationStatus, Priority, RoutingStrategy, WorkerId,
};
pub use pool::{BusWorker, DispatchWorker, PoolError, RoutedWorkers, WorkerPool};
pub use router::{FailureOutcome, MessageRouter, QueueStatus, RouteError, RouteReceipt, RouterStats, WorkerInfo};

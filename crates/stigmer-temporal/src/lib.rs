// Durable workflow engine boundary.
//
// The engine itself (scheduling, persistence, replay) is an external
// collaborator. This crate defines the surface the daemon programs
// against:
//
// - `EngineClient`: start workflows, complete activities by task token,
//   health checks, worker registration
// - `WorkflowContext`: what orchestration workflow code may do (read
//   memos, execute routed/local activities)
// - `ActivityOptions` / `RetryPolicy`: per-call routing, timeouts, retries
// - `MemoryEngine`: an embedded engine for dev mode and tests
//
// Workers register only what they implement; every remote activity call
// names its target task queue explicitly.

pub mod activity;
pub mod client;
pub mod memory;
pub mod retry;
pub mod worker;
pub mod workflow;

pub use activity::{ActivityContext, ActivityError, ActivityOptions, TimeoutKind};
pub use client::{EngineClient, EngineDialer, EngineError, Payload, WorkflowHandle, WorkflowOptions};
pub use memory::{MemoryEngine, MemoryEngineDialer};
pub use retry::RetryPolicy;
pub use worker::{WorkerHandle, WorkerRegistration};
pub use workflow::{WorkflowContext, WorkflowError, WorkflowFn};

// Resource controllers, one per kind, plus the shared handler glue and
// the in-process client set.

pub mod agent;
pub mod agent_execution;
pub mod agent_instance;
pub mod clients;
pub mod common;
pub mod environment;
pub mod execution_context;
pub mod execution_steps;
pub mod session;
pub mod skill;
pub mod standard;
pub mod workflow;
pub mod workflow_execution;
pub mod workflow_instance;

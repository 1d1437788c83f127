//! A parallel-DEVS discrete-event simulation kernel.
//!
//! The public surface is small: build a model tree with
//! [`model::AtomicSpec`]/[`model::CoupledSpec`], register any
//! [`views::View`]s, then drive it to completion with [`root::Root`].
//! Everything else (the scheduler, the coordinator, the worker pool, the
//! executive bridge) is exposed for embedding applications that need
//! finer-grained control than `Root` gives them, but `Root` is the
//! intended entry point.

pub mod config;
pub mod coordinator;
pub mod dynamics;
pub mod error;
pub mod executive;
pub mod model;
pub mod root;
pub mod scheduler;
pub mod simulator;
pub mod time;
pub mod value;
pub mod views;
pub mod worker_pool;

pub use config::EngineConfig;
pub use coordinator::{Artifacts, Coordinator};
pub use dynamics::{Dynamics, Executive, ExternalEvent, GraphMutation, OutputEvent};
pub use error::{EngineError, Fault, Result};
pub use model::{AtomicSpec, CoupledSpec, DynamicsFactory, ModelNode};
pub use root::Root;
pub use time::{Duration, Time};
pub use value::Value;
pub use views::{Sink, View, ViewKind};

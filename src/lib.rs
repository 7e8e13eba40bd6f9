//! # KyroAlert - Event-Driven Trigger Engine
//!
//! Producers submit typed **events**; operators register **triggers**, each a
//! standing query plus a job template. When an incoming event satisfies a
//! trigger's query the engine instantiates the job, dispatches it to a job
//! queue and records an **alert** as proof of firing.
//!
//! ## Core Concepts
//!
//! - **EventType**: a named [`Mapping`] governing which fields an event may carry
//! - **Trigger**: a [`Query`] over one or more event types plus a job template
//! - **Percolation**: triggers are registered in the [`ContentStore`] as standing
//!   queries; each event is submitted against them to find its matches
//! - **Alert**: the durable (trigger, event, job) record of one firing
//! - **Repeating event**: an event re-ingested on a cron schedule
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kyroalert::*;
//! use serde_json::json;
//!
//! let (engine, _) = AlertEngine::bootstrap(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryContentStore::new()),
//!     Arc::new(InMemoryJobQueue::new()),
//!     Arc::new(ThreadScheduler::new()),
//! )?;
//!
//! let et = engine.create_event_type("reading", Mapping::from_json(&json!({"num": "integer"}))?, "ops")?;
//! engine.create_trigger(NewTrigger::new(
//!     "seventeen",
//!     Condition::single(et.id, Query::term("num", 17)),
//!     json!({"image": "notify", "value": "$num"}),
//! ))?;
//! engine.create_event(NewEvent::new(et.id, json!({"num": 17})))?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Schema and matching
pub mod error;
pub mod id;
pub mod query;
pub mod schema;

// Collaborators
pub mod queue;
pub mod store;

// Records and registries
pub mod alert;
pub mod event;
pub mod event_type;
pub mod job;
pub mod trigger;

// Pipeline
pub mod cron;
pub mod ingest;

// Engine surface
pub mod api;
pub mod config;
pub mod engine;
pub mod stats;

pub use alert::{Alert, AlertLog};
pub use api::{ErrorResponse, IdResponse, StatsResponse};
pub use config::{ConfigError, EngineConfig};
pub use self::cron::{
    parse_schedule, CronEntry, CronScheduler, ManualScheduler, RecoveryReport, Runnable, Scheduler,
    ThreadScheduler,
};
pub use engine::AlertEngine;
pub use error::{AlertError, AlertResult, RecordKind, ValidationError};
pub use event::{Event, NewEvent};
pub use event_type::{EventType, EventTypeRegistry};
pub use id::{AlertId, EventId, EventTypeId, JobId, TriggerId};
pub use ingest::{EventIngestor, FireContext, FireFailure, FireOutcome, FireTask, IngestReport};
pub use query::{BoolQuery, Query, RangeBounds};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueuedMessage};
pub use schema::{compile, validate, CompiledSchema, FieldType, Mapping, MappingNode, SchemaNode};
pub use stats::{Counter, StatsCounter, StatsSnapshot};
pub use store::{ContentStore, InMemoryContentStore, Page, Paged, SearchHits, StorageError};
pub use trigger::{Condition, NewTrigger, Trigger, TriggerRegistry, TriggerUpdate};

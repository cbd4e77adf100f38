//! # Corekit
//!
//! A small in-process runtime for composable services: a dependency
//! container with lifecycle-scoped instances, and an event service that runs
//! ordered, short-circuitable handler chains over a shared payload.
//!
//! ## Core Concepts
//!
//! - [`ServiceContainer`] = who builds what (registration, resolution, sessions)
//! - [`Context`] = the narrow handle services get instead of the container
//! - [`EventService`] = named events and their ordered dispatch chains
//! - [`App`] = bootstrap glue (built-in services, init callbacks, shutdown)
//!
//! ## Lifecycles
//!
//! | Lifecycle   | Instances                 | Needs a session? |
//! |-------------|---------------------------|------------------|
//! | `Singleton` | one per container         | no               |
//! | `Transient` | one per resolution        | no               |
//! | `Scoped`    | one per session           | yes              |
//!
//! ## Architecture
//!
//! ```text
//! App.init()
//!     │
//!     ├─► register EventService
//!     │
//!     └─► init callbacks(Context)
//!             │
//!             ├─► ctx.register::<T>()
//!             │
//!             └─► ctx.resolve(name, session?)
//!                     │
//!                     ▼
//!              ServiceContainer ──► dependencies, in declared order
//!                     │                  (Context | singleton | transient | scoped)
//!                     ▼
//!              Initialize::init()
//!
//! EventService.trigger(event, payload)
//!     │
//!     ├─► ctx.begin_session()
//!     ├─► handler 1 ─► handler 2 ─► ... (until stop_processing)
//!     └─► ctx.end_session()
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Names are unique** - a second registration under the same name is rejected
//! 2. **Dependencies resolve in declared order** - one at a time, never in parallel
//! 3. **Scoped means session** - scoped services never resolve outside a session,
//!    and never leak into singletons
//! 4. **Soft failures** - misuse is logged and yields `None`; the `try_*` surface
//!    returns the same failure as a value
//! 5. **Chains run strictly in ascending order** - a stopped chain always carries
//!    an error
//!
//! ## Example
//!
//! ```ignore
//! use corekit::{App, Component, Config, Dependencies, Lifecycle, Service};
//!
//! struct Greeter;
//! impl Component for Greeter {}
//! impl Service for Greeter {
//!     fn lifecycle() -> Lifecycle {
//!         Lifecycle::Singleton
//!     }
//!
//!     fn construct(_deps: &mut Dependencies) -> Self {
//!         Greeter
//!     }
//! }
//!
//! let mut app = App::new(Config::from_env()?).with_init(|ctx| async move {
//!     ctx.register::<Greeter>();
//!     Ok(())
//! });
//! app.init().await?;
//!
//! let greeter = app.container().resolve_as::<Greeter>(None).await;
//! app.shutdown().await;
//! ```

// Core modules
mod container;
mod context;
mod error;
mod events;
mod payload;
mod registry;
mod service;

// Bootstrap
mod app;
mod config;

// Built-in collaborator services
pub mod cache;


// Re-export registry types
pub use registry::{Dependency, Lifecycle, SessionId};

// Re-export service declaration types
pub use service::{
    Component, Dependencies, Dispose, Initialize, Instance, Service, ServiceDescriptor,
};

// Re-export container types
pub use container::ServiceContainer;
pub use context::Context;

// Re-export event types
pub use events::{handler_fn, EventHandler, EventRecord, EventService, Subscriber};
pub use payload::{HandlerError, HandlerPayload, EVENT_HANDLER_FAILED, EVENT_PROCESSING_STOPPED};

// Re-export error types
pub use error::{CacheError, ContainerError, EventError};

// Re-export bootstrap types
pub use app::App;
pub use config::Config;

// Re-export commonly used external types
pub use async_trait::async_trait;

//! Structured error types for the container, the event service and the cache.
//!
//! Every variant here is pattern-matchable instead of a generic `anyhow::Error`.
//!
//! # The Soft Failure Rule
//!
//! > **Misuse of the container or the event service never aborts the caller.**
//!
//! The plain surface (`resolve`, `register`, `add_subscriber`, ...) logs the
//! error and yields an absent or no-op result. The `try_*` surface returns the
//! same error as a value so callers and tests can match on it.
//!
//! ```ignore
//! use corekit::{ContainerError, ServiceContainer};
//!
//! match container.try_resolve("Mailer", None).await {
//!     Ok(instance) => { /* use it */ }
//!     Err(ContainerError::NotRegistered { service }) => {
//!         eprintln!("nobody registered {service}");
//!     }
//!     Err(other) => eprintln!("resolution failed: {other}"),
//! }
//! ```
//!
//! `anyhow` stays the transport for user code: initialization and disposal
//! hooks, event handlers and init callbacks all return `anyhow::Result`.

use thiserror::Error;
use tracing::{error, warn};

use crate::registry::SessionId;

// =============================================================================
// Container Error
// =============================================================================

/// Failure modes of registration and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// A descriptor without a name was offered for registration.
    #[error("service registration metadata is missing; a service needs a name")]
    MissingMetadata,

    /// A service with the same name is already registered.
    #[error("service {service} is already registered")]
    AlreadyRegistered {
        /// Name of the rejected registration.
        service: String,
    },

    /// No registration exists for the requested name.
    #[error("service {service} is not registered")]
    NotRegistered {
        /// Requested name.
        service: String,
    },

    /// A session was given, but the service is not scoped.
    #[error("service {service} is not scoped and cannot be resolved inside a session")]
    NotScoped {
        /// Requested name.
        service: String,
    },

    /// A scoped service was requested without a session.
    #[error("service {service} is scoped and requires a session to resolve")]
    SessionRequired {
        /// Requested name.
        service: String,
    },

    /// The session token is unknown (never begun, or already ended).
    #[error("session {session} does not exist")]
    SessionNotFound {
        /// The unknown token.
        session: SessionId,
    },

    /// A dependency is already being constructed further up the chain.
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependency {
        /// Construction path, ending with the repeated service.
        path: Vec<String>,
    },

    /// The service's initialization hook returned an error.
    #[error("service {service} failed to initialize: {message}")]
    InitFailed {
        /// Service being constructed.
        service: String,
        /// Rendered error chain of the hook failure.
        message: String,
    },

    /// A context outlived the container it was derived from.
    #[error("service container has been dropped")]
    ContainerDropped,
}

impl ContainerError {
    /// Returns true for ordinary misuse (unknown name, wrong lifecycle,
    /// unknown session, duplicates).
    ///
    /// The remaining variants usually point at a programming mistake in how
    /// services are declared and are logged at error level.
    pub fn is_soft(&self) -> bool {
        !matches!(
            self,
            ContainerError::MissingMetadata
                | ContainerError::CircularDependency { .. }
                | ContainerError::InitFailed { .. }
                | ContainerError::ContainerDropped
        )
    }

    /// Log this error once, at a level matching its severity.
    pub(crate) fn report(&self) {
        if self.is_soft() {
            warn!(error = %self, "service container request failed");
        } else {
            error!(error = %self, "service container request failed");
        }
    }
}

// =============================================================================
// Event Error
// =============================================================================

/// Failure modes of event and subscriber registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Events need a non-empty name.
    #[error("event name is required")]
    EmptyName,

    /// An event with this name is already registered.
    #[error("event {event} already exists")]
    AlreadyExists {
        /// The duplicated event name.
        event: String,
    },

    /// The same handler is already subscribed to this event.
    #[error("subscriber already exists for event {event}")]
    DuplicateSubscriber {
        /// Event the handler was offered to.
        event: String,
    },
}

impl EventError {
    /// Duplicates are ordinary misuse; an empty name is a declaration mistake.
    pub fn is_soft(&self) -> bool {
        !matches!(self, EventError::EmptyName)
    }

    /// Log this error once, at a level matching its severity.
    pub(crate) fn report(&self) {
        if self.is_soft() {
            warn!(error = %self, "event service request failed");
        } else {
            error!(error = %self, "event service request failed");
        }
    }
}

// =============================================================================
// Cache Error
// =============================================================================

/// Failure modes of the in-memory cache service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The namespace was never created.
    #[error("namespace {namespace} does not exist")]
    NamespaceNotFound {
        /// Requested namespace.
        namespace: String,
    },

    /// `create_namespace` was called twice with the same name.
    #[error("namespace {namespace} already exists")]
    NamespaceExists {
        /// Duplicated namespace.
        namespace: String,
    },
}

//! Registry records: lifecycles, session tokens, dependency declarations,
//! and the registration/session entries the container keeps.
//!
//! These are passive records. All behavior lives in the container.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::service::{Instance, Service, ServiceDescriptor};

// =============================================================================
// Lifecycle
// =============================================================================

/// Sharing policy of a constructed instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// One instance per container, built on first resolution.
    Singleton,
    /// A new instance on every resolution.
    #[default]
    Transient,
    /// One instance per session; only resolvable with a session token.
    Scoped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Singleton => write!(f, "singleton"),
            Lifecycle::Transient => write!(f, "transient"),
            Lifecycle::Scoped => write!(f, "scoped"),
        }
    }
}

// =============================================================================
// Session Id
// =============================================================================

/// Token identifying a session.
///
/// Generated by [`ServiceContainer::begin_session`](crate::ServiceContainer::begin_session);
/// serializes as a plain UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Random v4 token. Uniqueness against live sessions is checked by the container.
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SessionId> for Uuid {
    fn from(id: SessionId) -> Uuid {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Dependency
// =============================================================================

/// One declared constructor dependency.
///
/// Services list their dependencies in constructor order; the container
/// resolves them in that order and hands them over as [`Dependencies`](crate::Dependencies).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The container's [`Context`](crate::Context) capability.
    Context,
    /// A registered service, by name.
    Service(Cow<'static, str>),
}

impl Dependency {
    /// Depend on a service type, using its registration name.
    pub fn on<T: Service>() -> Self {
        Dependency::Service(Cow::Borrowed(T::name()))
    }

    /// Depend on a service by registration name.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Dependency::Service(name.into())
    }

    /// Registration name, or `None` for the context.
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Dependency::Context => None,
            Dependency::Service(name) => Some(name),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Context => write!(f, "Context"),
            Dependency::Service(name) => write!(f, "{name}"),
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// A registered service: its descriptor plus the lazily built singleton slot.
///
/// Cloning shares the slot, so a clone taken out of the registry map still
/// observes (and fills) the same singleton.
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) descriptor: Arc<ServiceDescriptor>,
    /// Insertion sequence, used to order teardown.
    pub(crate) seq: u64,
    pub(crate) singleton: Arc<OnceCell<Instance>>,
}

impl Registration {
    pub(crate) fn new(descriptor: ServiceDescriptor, seq: u64) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            seq,
            singleton: Arc::new(OnceCell::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.descriptor.lifecycle()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name())
            .field("lifecycle", &self.lifecycle())
            .field("seq", &self.seq)
            .field("constructed", &self.singleton.initialized())
            .finish()
    }
}

// =============================================================================
// Session
// =============================================================================

/// Scoped instances of one session, keyed by service name.
///
/// Each slot is built at most once; concurrent resolutions of the same name
/// inside a session wait for the first construction.
pub(crate) struct Session {
    pub(crate) started_at: DateTime<Utc>,
    services: DashMap<String, Arc<OnceCell<Instance>>>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Utc::now(),
            services: DashMap::new(),
        }
    }

    /// Already constructed scoped instance for `name`, if any.
    pub(crate) fn instance(&self, name: &str) -> Option<Instance> {
        self.services
            .get(name)
            .and_then(|slot| slot.value().get().cloned())
    }

    /// Slot for `name`, created empty on first access.
    pub(crate) fn slot(&self, name: &str) -> Arc<OnceCell<Instance>> {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.services.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("started_at", &self.started_at)
            .field("services", &self.len())
            .finish()
    }
}

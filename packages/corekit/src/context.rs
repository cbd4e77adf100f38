//! Narrow capability handed to services that need the container.
//!
//! A service that declares [`Dependency::Context`](crate::Dependency::Context)
//! receives a [`Context`] instead of the container itself. It can open and
//! close sessions, resolve services and register new ones, nothing else.
//!
//! The context holds a weak reference. Services that keep a context therefore
//! do not keep the container alive; once the container is dropped every
//! operation fails softly with [`ContainerError::ContainerDropped`].

use std::fmt;
use std::sync::{Arc, Weak};

use crate::container::ContainerInner;
use crate::error::ContainerError;
use crate::registry::SessionId;
use crate::service::{Instance, Service, ServiceDescriptor};

/// Container capability: sessions, resolution and registration.
///
/// Two contexts compare equal when they are bound to the same container.
#[derive(Clone)]
pub struct Context {
    container: Weak<ContainerInner>,
}

impl Context {
    pub(crate) fn new(container: Weak<ContainerInner>) -> Self {
        Self { container }
    }

    fn container(&self) -> Result<Arc<ContainerInner>, ContainerError> {
        self.container
            .upgrade()
            .ok_or(ContainerError::ContainerDropped)
    }

    /// Start a session on the bound container.
    ///
    /// `None` only when the container no longer exists.
    pub fn begin_session(&self) -> Option<SessionId> {
        self.container()
            .map(|container| container.begin_session())
            .map_err(|err| err.report())
            .ok()
    }

    /// End a session on the bound container. Unknown tokens are ignored.
    pub fn end_session(&self, id: SessionId) {
        match self.container() {
            Ok(container) => container.end_session(id),
            Err(err) => err.report(),
        }
    }

    /// Resolve a service by name; `None` (and a log line) on any failure.
    pub async fn resolve(&self, name: &str, session: Option<SessionId>) -> Option<Instance> {
        self.try_resolve(name, session)
            .await
            .map_err(|err| err.report())
            .ok()
    }

    /// Resolve a service by name, returning the failure as a value.
    pub async fn try_resolve(
        &self,
        name: &str,
        session: Option<SessionId>,
    ) -> Result<Instance, ContainerError> {
        let container = self.container()?;
        container.resolve(name, session).await
    }

    /// Resolve a service by type.
    pub async fn get<T: Service>(&self, session: Option<SessionId>) -> Option<Arc<T>> {
        self.resolve(T::name(), session)
            .await
            .and_then(|instance| instance.downcast::<T>())
    }

    /// Register a service type on the bound container.
    pub fn register<T: Service>(&self) {
        self.register_descriptor(ServiceDescriptor::of::<T>());
    }

    /// Register a runtime descriptor on the bound container.
    pub fn register_descriptor(&self, descriptor: ServiceDescriptor) {
        if let Err(err) = self.try_register_descriptor(descriptor) {
            err.report();
        }
    }

    /// Register a runtime descriptor, reporting why it was rejected.
    pub fn try_register_descriptor(
        &self,
        descriptor: ServiceDescriptor,
    ) -> Result<(), ContainerError> {
        self.container()?.register(descriptor)
    }

    /// Whether the bound container still exists.
    pub fn is_attached(&self) -> bool {
        self.container.strong_count() > 0
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.container, &other.container)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("attached", &self.is_attached())
            .finish()
    }
}

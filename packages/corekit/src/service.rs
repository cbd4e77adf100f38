//! Service declarations and the type-erased instances the container hands out.
//!
//! A service type is declared in three layers:
//!
//! - [`Component`]: anything the container can hold. It answers capability
//!   queries for the optional [`Initialize`] and [`Dispose`] hooks.
//! - [`Service`]: registration metadata (name, lifecycle, dependency list)
//!   plus a constructor that receives the resolved [`Dependencies`].
//! - [`ServiceDescriptor`]: the runtime form the container stores. Build one
//!   from a `Service` with [`ServiceDescriptor::of`], or by hand with
//!   [`ServiceDescriptor::new`].
//!
//! # Example
//!
//! ```ignore
//! use corekit::{Component, Dependencies, Dependency, Initialize, Lifecycle, Service};
//!
//! struct Mailer { transport: Option<Arc<SmtpTransport>> }
//!
//! #[async_trait]
//! impl Initialize for Mailer {
//!     async fn init(&self) -> anyhow::Result<()> {
//!         // connect, warm up, ...
//!         Ok(())
//!     }
//! }
//!
//! impl Component for Mailer {
//!     fn as_initialize(&self) -> Option<&dyn Initialize> {
//!         Some(self)
//!     }
//! }
//!
//! impl Service for Mailer {
//!     fn lifecycle() -> Lifecycle {
//!         Lifecycle::Singleton
//!     }
//!
//!     fn dependencies() -> Vec<Dependency> {
//!         vec![Dependency::on::<SmtpTransport>()]
//!     }
//!
//!     fn construct(deps: &mut Dependencies) -> Self {
//!         Self { transport: deps.service() }
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::Context;
use crate::registry::{Dependency, Lifecycle};

// =============================================================================
// Capabilities
// =============================================================================

/// Initialization hook, run once per constructed instance before the
/// instance is handed to anyone.
#[async_trait]
pub trait Initialize: Send + Sync {
    /// Finish construction. An error aborts the resolution that built the instance.
    async fn init(&self) -> Result<()>;
}

/// Disposal hook. The container never calls it; the bootstrap does at shutdown.
#[async_trait]
pub trait Dispose: Send + Sync {
    /// Release resources held by the instance.
    async fn dispose(&self) -> Result<()>;
}

/// Anything the container can hold.
///
/// Override the capability queries to expose hooks:
///
/// ```ignore
/// impl Component for Pool {
///     fn as_initialize(&self) -> Option<&dyn Initialize> { Some(self) }
///     fn as_dispose(&self) -> Option<&dyn Dispose> { Some(self) }
/// }
/// ```
pub trait Component: Send + Sync + 'static {
    /// The initialization capability, if this type has one.
    fn as_initialize(&self) -> Option<&dyn Initialize> {
        None
    }

    /// The disposal capability, if this type has one.
    fn as_dispose(&self) -> Option<&dyn Dispose> {
        None
    }
}

/// Registration metadata and constructor of a service type.
pub trait Service: Component + Sized {
    /// Registration name. Defaults to the bare type name (`Mailer` for `app::mail::Mailer`).
    fn name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Sharing policy. Defaults to transient.
    fn lifecycle() -> Lifecycle {
        Lifecycle::Transient
    }

    /// Constructor dependencies, in the order `construct` consumes them.
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Build the service from its resolved dependencies.
    fn construct(deps: &mut Dependencies) -> Self;
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// =============================================================================
// Instance
// =============================================================================

/// Object-safe view of a component, used only behind [`Instance`].
trait ErasedComponent: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn dispose_hook(&self) -> Option<&dyn Dispose>;
    fn type_name(&self) -> &'static str;
}

impl<T: Component> ErasedComponent for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dispose_hook(&self) -> Option<&dyn Dispose> {
        self.as_dispose()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A constructed service, shared by reference count.
///
/// Cloning an `Instance` never clones the service; [`Instance::ptr_eq`]
/// tells whether two handles point at the same object.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<dyn ErasedComponent>,
}

impl Instance {
    /// Wrap an already shared component.
    pub fn new<T: Component>(component: Arc<T>) -> Self {
        Self { inner: component }
    }

    /// Typed handle to the service, or `None` if it is not a `T`.
    pub fn downcast<T: Component>(&self) -> Option<Arc<T>> {
        self.inner.clone().into_any().downcast::<T>().ok()
    }

    /// Whether the service is a `T`.
    pub fn is<T: Component>(&self) -> bool {
        self.downcast::<T>().is_some()
    }

    /// Full type name of the service.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    /// Whether both handles point at the same service object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }

    /// Whether the service exposes the [`Dispose`] capability.
    pub fn is_disposable(&self) -> bool {
        self.inner.dispose_hook().is_some()
    }

    /// Run the service's disposal hook; a no-op without one.
    pub async fn dispose(&self) -> Result<()> {
        match self.inner.dispose_hook() {
            Some(hook) => hook.dispose().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Dependencies
// =============================================================================

/// One resolved dependency slot.
pub(crate) enum Injected {
    Context(Context),
    Service(Instance),
    /// Unregistered, incompatible or failed dependency.
    Missing,
}

/// Resolved constructor dependencies, consumed in declared order.
///
/// Every accessor takes the next slot. A slot that was declared but could
/// not be resolved reads as `None`; construction still proceeds.
pub struct Dependencies {
    slots: std::vec::IntoIter<Injected>,
}

impl Dependencies {
    pub(crate) fn new(slots: Vec<Injected>) -> Self {
        Self {
            slots: slots.into_iter(),
        }
    }

    /// No dependencies at all. Handy for building services by hand in tests.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of slots not consumed yet.
    pub fn remaining(&self) -> usize {
        self.slots.len()
    }

    /// Take the next slot as the container context.
    pub fn context(&mut self) -> Option<Context> {
        match self.slots.next() {
            Some(Injected::Context(context)) => Some(context),
            _ => None,
        }
    }

    /// Take the next slot as an untyped instance.
    pub fn instance(&mut self) -> Option<Instance> {
        match self.slots.next() {
            Some(Injected::Service(instance)) => Some(instance),
            _ => None,
        }
    }

    /// Take the next slot as a `T`.
    pub fn service<T: Component>(&mut self) -> Option<Arc<T>> {
        self.instance().and_then(|instance| instance.downcast::<T>())
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("remaining", &self.remaining())
            .finish()
    }
}

// =============================================================================
// Service Descriptor
// =============================================================================

type Factory = Arc<dyn Fn(Dependencies) -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

/// Everything the container needs to register and build one service.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    lifecycle: Lifecycle,
    dependencies: Vec<Dependency>,
    factory: Factory,
}

impl ServiceDescriptor {
    /// Descriptor from a type's [`Service`] metadata.
    pub fn of<T: Service>() -> Self {
        Self::new(T::name(), T::lifecycle(), T::dependencies(), T::construct)
    }

    /// Descriptor assembled at runtime.
    ///
    /// An empty `name` stands for missing metadata and is rejected at
    /// registration.
    pub fn new<T, F>(
        name: impl Into<String>,
        lifecycle: Lifecycle,
        dependencies: Vec<Dependency>,
        construct: F,
    ) -> Self
    where
        T: Component,
        F: Fn(&mut Dependencies) -> T + Send + Sync + 'static,
    {
        let construct = Arc::new(construct);
        let factory: Factory = Arc::new(move |mut deps: Dependencies| {
            let construct = Arc::clone(&construct);
            async move {
                let component = Arc::new((*construct)(&mut deps));
                if let Some(hook) = component.as_initialize() {
                    hook.init().await?;
                }
                Ok(Instance::new(component))
            }
            .boxed()
        });

        Self {
            name: name.into(),
            lifecycle,
            dependencies,
            factory,
        }
    }

    /// Registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sharing policy.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Declared dependencies, in constructor order.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Construct and initialize one instance.
    pub(crate) fn build(&self, deps: Dependencies) -> BoxFuture<'static, Result<Instance>> {
        (self.factory)(deps)
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

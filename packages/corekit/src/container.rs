//! Service container: registration, recursive dependency resolution and
//! session-scoped instances.
//!
//! # Resolution
//!
//! ```text
//! resolve(name, session?)
//!     │
//!     ├─ session given ──► session exists? ──► scoped instance cached? ──► return it
//!     │                                   └─► registration scoped? ──► construct, cache in session
//!     │
//!     └─ no session ──► singleton ──► construct once, cache in registration
//!                    ├► transient ──► construct every time
//!                    └► scoped    ──► error: needs a session
//!
//! construct(registration)
//!     for each declared dependency, in order:
//!         Context            ──► the container's context
//!         already in path    ──► error: circular dependency
//!         not registered     ──► placeholder (logged)
//!         scoped → singleton ──► placeholder (logged)
//!         otherwise          ──► resolve recursively
//!     build, then await the init hook if the type has one
//! ```
//!
//! A scoped owner builds its dependencies inside its session, and transient
//! dependencies carry that session down to their own scoped dependencies.
//! Singletons are always built outside any session.
//!
//! The names under construction are kept in a task-local path while init
//! hooks run, so a hook that resolves (through its context) something that
//! leads back to its own service fails with a circular dependency instead of
//! waiting on itself.
//!
//! # Soft Failures
//!
//! `register` and `resolve` never fail loudly: problems are logged and the
//! call yields `()` or `None`. Use `try_register` / `try_resolve` to get the
//! [`ContainerError`] as a value.
//!
//! # Concurrency
//!
//! Registrations and sessions live in [`DashMap`]s owned by the container.
//! Map guards are never held across an await point. Singleton and scoped
//! slots are `OnceCell`s, so concurrent first resolutions build one instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::context::Context;
use crate::error::ContainerError;
use crate::registry::{Dependency, Lifecycle, Registration, Session, SessionId};
use crate::service::{Dependencies, Injected, Instance, Service, ServiceDescriptor};

tokio::task_local! {
    /// Services whose init hooks are running on the current task, outermost first.
    static CONSTRUCTION_PATH: Vec<String>;
}

// =============================================================================
// Container State
// =============================================================================

/// Shared state behind [`ServiceContainer`] and every [`Context`] derived from it.
pub(crate) struct ContainerInner {
    services: DashMap<String, Registration>,
    sessions: DashMap<SessionId, Arc<Session>>,
    next_seq: AtomicU64,
    /// Back-reference handed to contexts; weak so services holding a context
    /// do not keep the container alive.
    this: Weak<ContainerInner>,
}

impl ContainerInner {
    fn new(this: &Weak<ContainerInner>) -> Self {
        Self {
            services: DashMap::new(),
            sessions: DashMap::new(),
            next_seq: AtomicU64::new(0),
            this: this.clone(),
        }
    }

    pub(crate) fn context(&self) -> Context {
        Context::new(self.this.clone())
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    pub(crate) fn register(&self, descriptor: ServiceDescriptor) -> Result<(), ContainerError> {
        if descriptor.name().is_empty() {
            return Err(ContainerError::MissingMetadata);
        }

        match self.services.entry(descriptor.name().to_string()) {
            Entry::Occupied(_) => Err(ContainerError::AlreadyRegistered {
                service: descriptor.name().to_string(),
            }),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = %descriptor.name(),
                    lifecycle = %descriptor.lifecycle(),
                    dependencies = descriptor.dependencies().len(),
                    "service registered"
                );
                slot.insert(Registration::new(descriptor, seq));
                Ok(())
            }
        }
    }

    fn registration(&self, name: &str) -> Result<Registration, ContainerError> {
        self.services
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContainerError::NotRegistered {
                service: name.to_string(),
            })
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub(crate) fn begin_session(&self) -> SessionId {
        loop {
            let id = SessionId::generate();
            match self.sessions.entry(id) {
                Entry::Occupied(_) => {
                    trace!(session = %id, "session id collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Session::new()));
                    debug!(session = %id, "session started");
                    return id;
                }
            }
        }
    }

    pub(crate) fn end_session(&self, id: SessionId) {
        match self.sessions.remove(&id) {
            Some((_, session)) => debug!(
                session = %id,
                scoped_instances = session.len(),
                duration_ms = (chrono::Utc::now() - session.started_at).num_milliseconds(),
                "session ended"
            ),
            None => trace!(session = %id, "end_session on unknown session"),
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    pub(crate) async fn resolve(
        &self,
        name: &str,
        session: Option<SessionId>,
    ) -> Result<Instance, ContainerError> {
        let path = CONSTRUCTION_PATH
            .try_with(|path| path.clone())
            .unwrap_or_default();
        self.resolve_in(name, session, None, &path).await
    }

    /// Boxed so construction can recurse into dependencies.
    ///
    /// `ambient` is the session a transient may be built in; only scoped
    /// services reached through it ever see it.
    fn resolve_in<'a>(
        &'a self,
        name: &'a str,
        session: Option<SessionId>,
        ambient: Option<SessionId>,
        path: &'a [String],
    ) -> BoxFuture<'a, Result<Instance, ContainerError>> {
        async move {
            if path.iter().any(|seen| seen == name) {
                let mut cycle = path.to_vec();
                cycle.push(name.to_string());
                return Err(ContainerError::CircularDependency { path: cycle });
            }

            match session {
                Some(id) => self.resolve_scoped(name, id, path).await,
                None => self.resolve_root(name, ambient, path).await,
            }
        }
        .boxed()
    }

    async fn resolve_scoped(
        &self,
        name: &str,
        id: SessionId,
        path: &[String],
    ) -> Result<Instance, ContainerError> {
        let session = self
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(ContainerError::SessionNotFound { session: id })?;

        if let Some(instance) = session.instance(name) {
            return Ok(instance);
        }

        let registration = self.registration(name)?;
        if registration.lifecycle() != Lifecycle::Scoped {
            return Err(ContainerError::NotScoped {
                service: name.to_string(),
            });
        }

        let slot = session.slot(name);
        let instance = slot
            .get_or_try_init(|| self.construct(&registration, Some(id), path))
            .await?;
        Ok(instance.clone())
    }

    async fn resolve_root(
        &self,
        name: &str,
        ambient: Option<SessionId>,
        path: &[String],
    ) -> Result<Instance, ContainerError> {
        let registration = self.registration(name)?;

        match (registration.lifecycle(), ambient) {
            (Lifecycle::Singleton, _) => {
                let slot = registration.singleton.clone();
                let instance = slot
                    .get_or_try_init(|| self.construct(&registration, None, path))
                    .await?;
                Ok(instance.clone())
            }
            (Lifecycle::Transient, _) => self.construct(&registration, ambient, path).await,
            (Lifecycle::Scoped, Some(id)) => self.resolve_scoped(name, id, path).await,
            (Lifecycle::Scoped, None) => Err(ContainerError::SessionRequired {
                service: name.to_string(),
            }),
        }
    }

    async fn construct(
        &self,
        registration: &Registration,
        session: Option<SessionId>,
        path: &[String],
    ) -> Result<Instance, ContainerError> {
        let descriptor = &registration.descriptor;

        let mut chain = path.to_vec();
        chain.push(descriptor.name().to_string());

        let mut slots = Vec::with_capacity(descriptor.dependencies().len());
        for dependency in descriptor.dependencies() {
            slots.push(self.inject(registration, dependency, session, &chain).await?);
        }

        let instance = CONSTRUCTION_PATH
            .scope(chain, descriptor.build(Dependencies::new(slots)))
            .await
            .map_err(|err| ContainerError::InitFailed {
                service: descriptor.name().to_string(),
                message: format!("{err:#}"),
            })?;

        trace!(
            service = %descriptor.name(),
            lifecycle = %descriptor.lifecycle(),
            session = ?session,
            "service constructed"
        );
        Ok(instance)
    }

    /// Resolve one declared dependency of `owner`, built in `session`.
    ///
    /// Only a cycle aborts the owner's construction; every other failure
    /// becomes an empty slot.
    async fn inject(
        &self,
        owner: &Registration,
        dependency: &Dependency,
        session: Option<SessionId>,
        chain: &[String],
    ) -> Result<Injected, ContainerError> {
        let name = match dependency {
            Dependency::Context => return Ok(Injected::Context(self.context())),
            Dependency::Service(name) => name.as_ref(),
        };

        let Ok(target) = self.registration(name) else {
            warn!(
                service = %owner.name(),
                dependency = %name,
                "dependency is not registered, injecting placeholder"
            );
            return Ok(Injected::Missing);
        };

        if owner.lifecycle() == Lifecycle::Singleton && target.lifecycle() == Lifecycle::Scoped {
            error!(
                service = %owner.name(),
                dependency = %name,
                "scoped service cannot be injected into a singleton, injecting placeholder"
            );
            return Ok(Injected::Missing);
        }

        match self.resolve_in(name, None, session, chain).await {
            Ok(instance) => Ok(Injected::Service(instance)),
            Err(err @ ContainerError::CircularDependency { .. }) => Err(err),
            Err(err) => {
                warn!(
                    service = %owner.name(),
                    dependency = %name,
                    error = %err,
                    "dependency could not be resolved, injecting placeholder"
                );
                Ok(Injected::Missing)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    fn singletons(&self) -> Vec<(String, Instance)> {
        let mut built: Vec<(u64, String, Instance)> = self
            .services
            .iter()
            .filter_map(|entry| {
                let registration = entry.value();
                registration
                    .singleton
                    .get()
                    .map(|instance| (registration.seq, entry.key().clone(), instance.clone()))
            })
            .collect();
        built.sort_by_key(|(seq, _, _)| *seq);
        built
            .into_iter()
            .map(|(_, name, instance)| (name, instance))
            .collect()
    }

    fn clear(&self) {
        let services = self.services.len();
        let sessions = self.sessions.len();
        self.services.clear();
        self.sessions.clear();
        debug!(services, sessions, "service container cleared");
    }
}

// =============================================================================
// Service Container
// =============================================================================

/// Owner of the service registry and the session map.
///
/// Cloning is cheap and yields a handle to the same container.
///
/// # Example
///
/// ```ignore
/// let container = ServiceContainer::new();
/// container.register::<Mailer>();
/// container.register::<RequestLog>(); // scoped
///
/// let mailer = container.resolve_as::<Mailer>(None).await;
///
/// let session = container.begin_session();
/// let log = container.resolve_as::<RequestLog>(Some(session)).await;
/// container.end_session(session);
/// ```
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<ContainerInner>,
    context: Context,
}

impl ServiceContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(ContainerInner::new);
        let context = inner.context();
        Self { inner, context }
    }

    /// The context capability bound to this container.
    ///
    /// Every call returns a handle equal to the previous ones.
    pub fn context(&self) -> Context {
        self.context.clone()
    }

    /// Register a service type. Duplicates are logged and ignored.
    pub fn register<T: Service>(&self) {
        self.register_descriptor(ServiceDescriptor::of::<T>());
    }

    /// Register a service type, reporting why it was rejected.
    pub fn try_register<T: Service>(&self) -> Result<(), ContainerError> {
        self.inner.register(ServiceDescriptor::of::<T>())
    }

    /// Register a runtime descriptor. Rejections are logged and ignored.
    pub fn register_descriptor(&self, descriptor: ServiceDescriptor) {
        if let Err(err) = self.inner.register(descriptor) {
            err.report();
        }
    }

    /// Register a runtime descriptor, reporting why it was rejected.
    pub fn try_register_descriptor(
        &self,
        descriptor: ServiceDescriptor,
    ) -> Result<(), ContainerError> {
        self.inner.register(descriptor)
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
        self.inner.resolve(name, session).await
    }

    /// Resolve a service by type.
    pub async fn resolve_as<T: Service>(&self, session: Option<SessionId>) -> Option<Arc<T>> {
        self.resolve(T::name(), session)
            .await
            .and_then(|instance| instance.downcast::<T>())
    }

    /// Start a session and return its token.
    pub fn begin_session(&self) -> SessionId {
        self.inner.begin_session()
    }

    /// Drop a session and all of its scoped instances. Unknown tokens are ignored.
    pub fn end_session(&self, id: SessionId) {
        self.inner.end_session(id);
    }

    /// Whether the session is currently open.
    pub fn has_session(&self, id: SessionId) -> bool {
        self.inner.sessions.contains_key(&id)
    }

    /// Whether a service with this name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.services.contains_key(name)
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.inner.services.len()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Singletons built so far, in registration order.
    pub fn singletons(&self) -> Vec<(String, Instance)> {
        self.inner.singletons()
    }

    /// Drop every registration and every session.
    ///
    /// Disposal hooks are not run; see [`App::shutdown`](crate::App::shutdown).
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.service_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Component, Initialize};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;
    use uuid::Uuid;

    static TRANSIENT_BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct Clock;
    impl Component for Clock {}
    impl Service for Clock {
        fn construct(_deps: &mut Dependencies) -> Self {
            TRANSIENT_BUILDS.fetch_add(1, Ordering::SeqCst);
            Clock
        }
    }

    struct Config;
    impl Component for Config {}
    impl Service for Config {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Singleton
        }

        fn construct(_deps: &mut Dependencies) -> Self {
            Config
        }
    }

    struct RequestLog {
        config: Option<Arc<Config>>,
    }
    impl Component for RequestLog {}
    impl Service for RequestLog {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Scoped
        }

        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<Config>()]
        }

        fn construct(deps: &mut Dependencies) -> Self {
            Self {
                config: deps.service(),
            }
        }
    }

    /// Singleton that (wrongly) asks for a scoped service.
    struct Reporter {
        log: Option<Arc<RequestLog>>,
        context: Option<Context>,
    }
    impl Component for Reporter {}
    impl Service for Reporter {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Singleton
        }

        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<RequestLog>(), Dependency::Context]
        }

        fn construct(deps: &mut Dependencies) -> Self {
            Self {
                log: deps.service(),
                context: deps.context(),
            }
        }
    }

    struct Ping;
    impl Component for Ping {}
    impl Service for Ping {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::named("Pong")]
        }

        fn construct(_deps: &mut Dependencies) -> Self {
            Ping
        }
    }

    struct Pong;
    impl Component for Pong {}
    impl Service for Pong {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::named("Ping")]
        }

        fn construct(_deps: &mut Dependencies) -> Self {
            Pong
        }
    }

    /// Scoped leaf shared by everything built in one session.
    struct Tracker;
    impl Component for Tracker {}
    impl Service for Tracker {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Scoped
        }

        fn construct(_deps: &mut Dependencies) -> Self {
            Tracker
        }
    }

    struct Handler {
        tracker: Option<Arc<Tracker>>,
    }
    impl Component for Handler {}
    impl Service for Handler {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<Tracker>()]
        }

        fn construct(deps: &mut Dependencies) -> Self {
            Self {
                tracker: deps.service(),
            }
        }
    }

    struct Request {
        handler: Option<Arc<Handler>>,
    }
    impl Component for Request {}
    impl Service for Request {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Scoped
        }

        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<Handler>()]
        }

        fn construct(deps: &mut Dependencies) -> Self {
            Self {
                handler: deps.service(),
            }
        }
    }

    /// Singleton holding a transient that wants a scoped service.
    struct Dispatcher {
        handler: Option<Arc<Handler>>,
    }
    impl Component for Dispatcher {}
    impl Service for Dispatcher {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Singleton
        }

        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<Handler>()]
        }

        fn construct(deps: &mut Dependencies) -> Self {
            Self {
                handler: deps.service(),
            }
        }
    }

    /// Singleton whose init hook resolves a service that depends back on it.
    struct Bootstrapper {
        context: Option<Context>,
        catalog: Mutex<Option<Result<(), ContainerError>>>,
    }

    #[async_trait]
    impl Initialize for Bootstrapper {
        async fn init(&self) -> anyhow::Result<()> {
            if let Some(context) = &self.context {
                let outcome = context.try_resolve("Catalog", None).await.map(|_| ());
                *self.catalog.lock().unwrap() = Some(outcome);
            }
            Ok(())
        }
    }

    impl Component for Bootstrapper {
        fn as_initialize(&self) -> Option<&dyn Initialize> {
            Some(self)
        }
    }

    impl Service for Bootstrapper {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Singleton
        }

        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::Context]
        }

        fn construct(deps: &mut Dependencies) -> Self {
            Self {
                context: deps.context(),
                catalog: Mutex::new(None),
            }
        }
    }

    struct Catalog;
    impl Component for Catalog {}
    impl Service for Catalog {
        fn lifecycle() -> Lifecycle {
            Lifecycle::Singleton
        }

        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::on::<Bootstrapper>()]
        }

        fn construct(_deps: &mut Dependencies) -> Self {
            Catalog
        }
    }

    /// Scoped service whose init hook resolves itself in its own session.
    struct Recursive {
        context: Option<Context>,
        session: Mutex<Option<SessionId>>,
        again: Mutex<Option<Result<(), ContainerError>>>,
    }

    #[async_trait]
    impl Initialize for Recursive {
        async fn init(&self) -> anyhow::Result<()> {
            let session = *self.session.lock().unwrap();
            if let Some(context) = &self.context {
                let outcome = context.try_resolve("Recursive", session).await.map(|_| ());
                *self.again.lock().unwrap() = Some(outcome);
            }
            Ok(())
        }
    }

    impl Component for Recursive {
        fn as_initialize(&self) -> Option<&dyn Initialize> {
            Some(self)
        }
    }

    fn recursive(session: SessionId) -> ServiceDescriptor {
        ServiceDescriptor::new(
            "Recursive",
            Lifecycle::Scoped,
            vec![Dependency::Context],
            move |deps: &mut Dependencies| Recursive {
                context: deps.context(),
                session: Mutex::new(Some(session)),
                again: Mutex::new(None),
            },
        )
    }

    /// Layer that records every event it sees.
    mod capture {
        use std::fmt;
        use std::sync::{Arc, Mutex};

        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer};

        #[derive(Debug, Clone)]
        pub struct Captured {
            pub level: Level,
            pub message: String,
            pub fields: Vec<(String, String)>,
        }

        impl Captured {
            pub fn field(&self, name: &str) -> Option<&str> {
                self.fields
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.as_str())
            }
        }

        #[derive(Clone, Default)]
        pub struct CaptureLayer {
            events: Arc<Mutex<Vec<Captured>>>,
        }

        impl CaptureLayer {
            pub fn find(&self, level: Level, message: &str) -> Option<Captured> {
                self.events
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|event| event.level == level && event.message.contains(message))
                    .cloned()
            }
        }

        struct FieldVisitor<'a>(&'a mut Captured);

        impl Visit for FieldVisitor<'_> {
            fn record_str(&mut self, field: &Field, value: &str) {
                self.record(field, value.to_string());
            }

            fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
                self.record(field, format!("{value:?}"));
            }
        }

        impl FieldVisitor<'_> {
            fn record(&mut self, field: &Field, value: String) {
                if field.name() == "message" {
                    self.0.message = value;
                } else {
                    self.0.fields.push((field.name().to_string(), value));
                }
            }
        }

        impl<S: Subscriber> Layer<S> for CaptureLayer {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut captured = Captured {
                    level: *event.metadata().level(),
                    message: String::new(),
                    fields: Vec::new(),
                };
                event.record(&mut FieldVisitor(&mut captured));
                self.events.lock().unwrap().push(captured);
            }
        }
    }

    #[tokio::test]
    async fn test_transient_builds_every_time() {
        let container = ServiceContainer::new();
        container.register::<Clock>();

        let before = TRANSIENT_BUILDS.load(Ordering::SeqCst);
        let a = container.resolve("Clock", None).await.unwrap();
        let b = container.resolve("Clock", None).await.unwrap();

        assert!(!a.ptr_eq(&b));
        assert!(TRANSIENT_BUILDS.load(Ordering::SeqCst) >= before + 2);
    }

    #[tokio::test]
    async fn test_singleton_is_cached() {
        let container = ServiceContainer::new();
        container.register::<Config>();

        let a = container.resolve("Config", None).await.unwrap();
        let b = container.resolve("Config", None).await.unwrap();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let container = ServiceContainer::new();
        container.register::<Config>();

        let err = container.try_register::<Config>().unwrap_err();
        assert_eq!(
            err,
            ContainerError::AlreadyRegistered {
                service: "Config".into()
            }
        );
        assert_eq!(container.service_count(), 1);
    }

    #[test]
    fn test_descriptor_without_name_is_missing_metadata() {
        let container = ServiceContainer::new();
        let descriptor = ServiceDescriptor::new("", Lifecycle::Transient, vec![], |_| Clock);

        assert_eq!(
            container.try_register_descriptor(descriptor),
            Err(ContainerError::MissingMetadata)
        );
        assert_eq!(container.service_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_registered() {
        let container = ServiceContainer::new();
        let err = container.try_resolve("Nope", None).await.unwrap_err();
        assert_eq!(
            err,
            ContainerError::NotRegistered {
                service: "Nope".into()
            }
        );
        assert!(container.resolve("Nope", None).await.is_none());
    }

    #[tokio::test]
    async fn test_scoped_requires_session() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();

        let err = container.try_resolve("RequestLog", None).await.unwrap_err();
        assert!(matches!(err, ContainerError::SessionRequired { .. }));
    }

    #[tokio::test]
    async fn test_scoped_shared_within_session_and_isolated_across() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();

        let a = container.begin_session();
        let b = container.begin_session();
        assert_ne!(a, b);

        let a1 = container.resolve("RequestLog", Some(a)).await.unwrap();
        let a2 = container.resolve("RequestLog", Some(a)).await.unwrap();
        let b1 = container.resolve("RequestLog", Some(b)).await.unwrap();

        assert!(a1.ptr_eq(&a2));
        assert!(!a1.ptr_eq(&b1));
    }

    #[tokio::test]
    async fn test_scoped_service_gets_singleton_dependency() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();

        let session = container.begin_session();
        let log = container
            .resolve_as::<RequestLog>(Some(session))
            .await
            .unwrap();
        let config = container.resolve_as::<Config>(None).await.unwrap();

        let injected = log.config.as_ref().expect("singleton dependency injected");
        assert!(Arc::ptr_eq(injected, &config));
    }

    #[tokio::test]
    async fn test_non_scoped_in_session_is_rejected() {
        let container = ServiceContainer::new();
        container.register::<Config>();

        let session = container.begin_session();
        let err = container
            .try_resolve("Config", Some(session))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::NotScoped { .. }));
    }

    #[tokio::test]
    async fn test_unknown_session_fails_softly() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();

        let bogus = SessionId::from(Uuid::new_v4());
        let err = container
            .try_resolve("RequestLog", Some(bogus))
            .await
            .unwrap_err();
        assert_eq!(err, ContainerError::SessionNotFound { session: bogus });
    }

    #[tokio::test]
    async fn test_end_session_drops_scoped_instances() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();

        let session = container.begin_session();
        assert!(container.resolve("RequestLog", Some(session)).await.is_some());

        container.end_session(session);
        assert!(!container.has_session(session));
        assert!(container.resolve("RequestLog", Some(session)).await.is_none());
    }

    #[tokio::test]
    async fn test_singleton_gets_placeholder_for_scoped_dependency() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();
        container.register::<Reporter>();

        let reporter = container.resolve_as::<Reporter>(None).await.unwrap();
        assert!(reporter.log.is_none());
        assert_eq!(reporter.context, Some(container.context()));
    }

    #[tokio::test]
    async fn test_scoped_reached_through_transient_shares_session() {
        let container = ServiceContainer::new();
        container.register::<Tracker>();
        container.register::<Handler>();
        container.register::<Request>();

        let session = container.begin_session();
        let request = container
            .resolve_as::<Request>(Some(session))
            .await
            .unwrap();
        let handler = request.handler.as_ref().expect("transient dependency injected");
        let tracker = handler
            .tracker
            .as_ref()
            .expect("scoped dependency bound to the session");

        let direct = container
            .resolve_as::<Tracker>(Some(session))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(tracker, &direct));

        let other = container.begin_session();
        let elsewhere = container
            .resolve_as::<Tracker>(Some(other))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(tracker, &elsewhere));
    }

    #[tokio::test]
    async fn test_transient_outside_session_gets_scoped_placeholder() {
        let container = ServiceContainer::new();
        container.register::<Tracker>();
        container.register::<Handler>();
        container.register::<Dispatcher>();

        let handler = container.resolve_as::<Handler>(None).await.unwrap();
        assert!(handler.tracker.is_none());

        let _session = container.begin_session();
        let dispatcher = container.resolve_as::<Dispatcher>(None).await.unwrap();
        let held = dispatcher.handler.as_ref().expect("transient dependency injected");
        assert!(held.tracker.is_none());
    }

    #[tokio::test]
    async fn test_init_hook_resolving_back_into_singleton_fails_fast() {
        let container = ServiceContainer::new();
        container.register::<Bootstrapper>();
        container.register::<Catalog>();

        let bootstrapper = tokio::time::timeout(
            Duration::from_secs(2),
            container.resolve_as::<Bootstrapper>(None),
        )
        .await
        .expect("resolution finishes")
        .unwrap();

        let outcome = bootstrapper.catalog.lock().unwrap().clone();
        assert_eq!(
            outcome,
            Some(Err(ContainerError::CircularDependency {
                path: vec![
                    "Bootstrapper".into(),
                    "Catalog".into(),
                    "Bootstrapper".into()
                ]
            }))
        );

        // Once built, the singleton satisfies the dependency normally.
        assert!(container.try_resolve("Catalog", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_init_hook_resolving_own_scoped_slot_fails_fast() {
        let container = ServiceContainer::new();
        let session = container.begin_session();
        container.register_descriptor(recursive(session));

        let instance = tokio::time::timeout(
            Duration::from_secs(2),
            container.try_resolve("Recursive", Some(session)),
        )
        .await
        .expect("resolution finishes")
        .unwrap();

        let recursive = instance.downcast::<Recursive>().unwrap();
        let again = recursive.again.lock().unwrap().clone();
        assert_eq!(
            again,
            Some(Err(ContainerError::CircularDependency {
                path: vec!["Recursive".into(), "Recursive".into()]
            }))
        );
    }

    #[tokio::test]
    async fn test_scoped_into_singleton_logs_error_with_fields() {
        let layer = capture::CaptureLayer::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(layer.clone()));

        let container = ServiceContainer::new();
        container.register::<Config>();
        container.register::<RequestLog>();
        container.register::<Reporter>();
        assert!(container.resolve("Reporter", None).await.is_some());

        let event = layer
            .find(Level::ERROR, "scoped service cannot be injected into a singleton")
            .expect("diagnostic emitted");
        assert_eq!(event.field("service"), Some("Reporter"));
        assert_eq!(event.field("dependency"), Some("RequestLog"));
    }

    #[tokio::test]
    async fn test_unregistered_dependency_logs_warning_with_fields() {
        let layer = capture::CaptureLayer::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(layer.clone()));

        let container = ServiceContainer::new();
        container.register::<RequestLog>();
        let session = container.begin_session();
        assert!(container.resolve("RequestLog", Some(session)).await.is_some());

        let event = layer
            .find(Level::WARN, "dependency is not registered")
            .expect("diagnostic emitted");
        assert_eq!(event.field("service"), Some("RequestLog"));
        assert_eq!(event.field("dependency"), Some("Config"));
        assert!(layer.find(Level::ERROR, "").is_none());
    }

    #[tokio::test]
    async fn test_missing_dependency_is_placeholder() {
        let container = ServiceContainer::new();
        // Config is deliberately not registered
        container.register::<RequestLog>();

        let session = container.begin_session();
        let log = container
            .resolve_as::<RequestLog>(Some(session))
            .await
            .unwrap();
        assert!(log.config.is_none());
    }

    #[tokio::test]
    async fn test_circular_dependency_detected() {
        let container = ServiceContainer::new();
        container.register::<Ping>();
        container.register::<Pong>();

        let err = container.try_resolve("Ping", None).await.unwrap_err();
        assert_eq!(
            err,
            ContainerError::CircularDependency {
                path: vec!["Ping".into(), "Pong".into(), "Ping".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_singletons_listed_in_registration_order() {
        let container = ServiceContainer::new();
        container.register::<Reporter>();
        container.register::<Config>();
        container.register::<Clock>();

        container.resolve("Config", None).await.unwrap();
        container.resolve("Reporter", None).await.unwrap();
        container.resolve("Clock", None).await.unwrap();

        let names: Vec<String> = container
            .singletons()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["Reporter".to_string(), "Config".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let container = ServiceContainer::new();
        container.register::<Config>();
        let _session = container.begin_session();

        container.clear();
        assert_eq!(container.service_count(), 0);
        assert_eq!(container.session_count(), 0);
        assert!(!container.is_registered("Config"));
    }

    #[tokio::test]
    async fn test_concurrent_singleton_resolution_builds_once() {
        let container = ServiceContainer::new();
        container.register::<Config>();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                tokio::spawn(async move { container.resolve("Config", None).await.unwrap() })
            })
            .collect();

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }
        assert!(instances.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));
    }
}

//! Bootstrap: wires the built-in services, runs init callbacks and tears the
//! container down again.
//!
//! # Lifecycle
//!
//! ```text
//! App::new(config)
//!  → with_init / on_init   queue callbacks
//!  → init()                register EventService, await callbacks in order
//!  → ...                   resolve services, trigger events
//!  → shutdown()            dispose built singletons newest first, clear
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut app = App::new(Config::from_env()?).with_init(|ctx| async move {
//!     ctx.register::<CacheService>();
//!     Ok(())
//! });
//!
//! app.init().await?;
//! let events = app.event_service().await.expect("registered by init");
//! // ...
//! app.shutdown().await;
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::container::ServiceContainer;
use crate::context::Context;
use crate::events::EventService;
use crate::registry::Lifecycle;
use crate::service::{Service, ServiceDescriptor};

type InitCallback = Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<()>> + Send>;

/// Owns the container for the lifetime of an application.
pub struct App {
    config: Config,
    container: ServiceContainer,
    callbacks: Vec<InitCallback>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            container: ServiceContainer::new(),
            callbacks: Vec::new(),
        }
    }

    /// Queue an init callback (builder form).
    pub fn with_init<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_init(callback);
        self
    }

    /// Queue an init callback. Callbacks run in the order they were queued.
    pub fn on_init<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.callbacks
            .push(Box::new(move |context: Context| callback(context).boxed()));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    pub fn context(&self) -> Context {
        self.container.context()
    }

    /// Register built-in services, then run the queued callbacks.
    ///
    /// The first failing callback aborts initialization; later callbacks do
    /// not run. Callbacks are consumed, so a second `init` only re-attempts
    /// the built-in registration.
    pub async fn init(&mut self) -> Result<()> {
        info!(app = %self.config.app_name, "initializing");

        self.container.register_descriptor(self.event_service_descriptor());

        let callbacks = std::mem::take(&mut self.callbacks);
        let total = callbacks.len();
        for (index, callback) in callbacks.into_iter().enumerate() {
            debug!(callback = index + 1, total, "running init callback");
            callback(self.context())
                .await
                .with_context(|| format!("init callback {} of {} failed", index + 1, total))?;
        }

        info!(
            app = %self.config.app_name,
            services = self.container.service_count(),
            "initialized"
        );
        Ok(())
    }

    fn event_service_descriptor(&self) -> ServiceDescriptor {
        if self.config.session_per_trigger {
            ServiceDescriptor::of::<EventService>()
        } else {
            ServiceDescriptor::new(EventService::name(), Lifecycle::Singleton, vec![], |_| {
                EventService::new(None)
            })
        }
    }

    /// The built-in event service.
    pub async fn event_service(&self) -> Option<Arc<EventService>> {
        self.container.resolve_as::<EventService>(None).await
    }

    /// Dispose every constructed singleton, newest registration first, then
    /// clear the container.
    ///
    /// Each dispose hook gets `config.shutdown_timeout`. Failures and
    /// timeouts are logged and do not stop the remaining disposals. Returns
    /// how many hooks completed successfully.
    pub async fn shutdown(&self) -> usize {
        info!(app = %self.config.app_name, "shutting down");

        let mut disposed = 0;
        for (name, instance) in self.container.singletons().into_iter().rev() {
            if !instance.is_disposable() {
                continue;
            }

            match tokio::time::timeout(self.config.shutdown_timeout, instance.dispose()).await {
                Ok(Ok(())) => {
                    disposed += 1;
                    debug!(service = %name, "service disposed");
                }
                Ok(Err(err)) => {
                    error!(service = %name, error = ?err, "service dispose failed");
                }
                Err(_) => {
                    warn!(
                        service = %name,
                        timeout_secs = self.config.shutdown_timeout.as_secs_f64(),
                        "service dispose timed out"
                    );
                }
            }
        }

        self.container.clear();
        info!(app = %self.config.app_name, disposed, "shutdown complete");
        disposed
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("container", &self.container)
            .field("pending_callbacks", &self.callbacks.len())
            .finish()
    }
}

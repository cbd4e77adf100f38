//! Corekit demo
//!
//! Boots an app, registers the cache plus a scoped request log, wires a
//! small signup pipeline on the event service and triggers it twice.

use std::sync::Mutex;

use anyhow::{Context as _, Result};
use corekit::cache::{CacheService, DEFAULT_NAMESPACE};
use corekit::{
    handler_fn, App, Component, Config, Dependencies, Dependency, HandlerError, HandlerPayload,
    Lifecycle, Service, Subscriber,
};
use futures::FutureExt;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-session audit trail.
#[derive(Default)]
struct RequestLog {
    lines: Mutex<Vec<String>>,
}

impl RequestLog {
    fn record(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    fn len(&self) -> usize {
        self.lines.lock().map(|lines| lines.len()).unwrap_or(0)
    }
}

impl Component for RequestLog {}

impl Service for RequestLog {
    fn lifecycle() -> Lifecycle {
        Lifecycle::Scoped
    }

    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<CacheService>()]
    }

    fn construct(_deps: &mut Dependencies) -> Self {
        Self::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,corekit=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(app = %config.app_name, "Starting corekit demo");

    let mut app = App::new(config).with_init(|ctx| async move {
        ctx.register::<CacheService>();
        ctx.register::<RequestLog>();
        Ok(())
    });
    app.init().await.context("Failed to initialize app")?;

    let events = app
        .event_service()
        .await
        .context("Event service was not registered")?;
    let context = app.context();

    // 1: validate, 2: store, 3: audit
    let validate = handler_fn(|payload| {
        async move {
            let email = payload.data["email"].as_str().unwrap_or_default();
            if !email.contains('@') {
                payload.stop_with(HandlerError::new("email is invalid", "INVALID_EMAIL"));
            }
            Ok(())
        }
        .boxed()
    });

    let store_ctx = context.clone();
    let store = handler_fn(move |payload| {
        let ctx = store_ctx.clone();
        async move {
            let cache = ctx
                .get::<CacheService>(None)
                .await
                .context("cache unavailable")?;
            let email = payload.data["email"].as_str().unwrap_or_default().to_string();
            cache.set(DEFAULT_NAMESPACE, &email, payload.data.clone(), None)?;
            payload.result = json!({ "stored": email });
            Ok(())
        }
        .boxed()
    });

    let audit_ctx = context.clone();
    let audit = handler_fn(move |payload| {
        let ctx = audit_ctx.clone();
        async move {
            if let Some(log) = ctx.get::<RequestLog>(payload.session_id).await {
                log.record(format!("signup {}", payload.data["email"]));
                tracing::info!(entries = log.len(), "audit recorded");
            }
            Ok(())
        }
        .boxed()
    });

    events.add_subscriber("user.signup", Subscriber::new(audit).with_order(3));
    events.add_subscriber("user.signup", Subscriber::new(validate).with_order(1));
    events.add_subscriber("user.signup", Subscriber::new(store).with_order(2));

    for email in ["ada@example.org", "not-an-email"] {
        let out = events
            .trigger("user.signup", HandlerPayload::new(json!({ "email": email })), None)
            .await;
        tracing::info!(
            email,
            result = %out.result,
            error = ?out.error.as_ref().map(|e| e.key.as_str()),
            "signup processed"
        );
    }

    let disposed = app.shutdown().await;
    tracing::info!(disposed, "Demo finished");
    Ok(())
}

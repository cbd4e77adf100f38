// Common test fixtures
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use corekit::{
    async_trait, Component, Dependencies, Dependency, Dispose, Initialize, Lifecycle,
    ServiceDescriptor,
};

/// Counts constructions so tests can tell fresh instances from cached ones.
#[derive(Clone, Default)]
pub struct BuildCounter(Arc<AtomicUsize>);

impl BuildCounter {
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Transient leaf service.
pub struct X {
    pub serial: usize,
}

impl Component for X {}

/// Singleton holding the `X` it was built with.
pub struct Y {
    pub x: Option<Arc<X>>,
}

impl Component for Y {}

/// Scoped service.
pub struct Z {
    pub serial: usize,
}

impl Component for Z {}

pub fn x_descriptor(counter: &BuildCounter) -> ServiceDescriptor {
    let counter = counter.clone();
    ServiceDescriptor::new("X", Lifecycle::Transient, vec![], move |_: &mut Dependencies| X {
        serial: counter.next(),
    })
}

pub fn y_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(
        "Y",
        Lifecycle::Singleton,
        vec![Dependency::named("X")],
        |deps: &mut Dependencies| Y { x: deps.service() },
    )
}

pub fn z_descriptor(counter: &BuildCounter) -> ServiceDescriptor {
    let counter = counter.clone();
    ServiceDescriptor::new("Z", Lifecycle::Scoped, vec![], move |_: &mut Dependencies| Z {
        serial: counter.next(),
    })
}

/// Singleton with both hooks, writing into a shared journal.
pub struct Journaled {
    pub name: &'static str,
    pub journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Initialize for Journaled {
    async fn init(&self) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(format!("init {}", self.name));
        Ok(())
    }
}

#[async_trait]
impl Dispose for Journaled {
    async fn dispose(&self) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(format!("dispose {}", self.name));
        Ok(())
    }
}

impl Component for Journaled {
    fn as_initialize(&self) -> Option<&dyn Initialize> {
        Some(self)
    }

    fn as_dispose(&self) -> Option<&dyn Dispose> {
        Some(self)
    }
}

pub fn journaled(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> ServiceDescriptor {
    let journal = journal.clone();
    ServiceDescriptor::new(name, Lifecycle::Singleton, vec![], move |_: &mut Dependencies| {
        Journaled {
            name,
            journal: journal.clone(),
        }
    })
}

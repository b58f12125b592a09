//! Resources used by the engine tests
//!
//! `probe` reports a templated `value` and optionally keeps a file in sync
//! with it, inside an optional serialization `group`; `broken` always fails
//! its check.

#![allow(dead_code)]

use declarative::{
    Block, Context, Diff, Fields, FromBlock, Params, Pipeline, Preparer, Registry, Renderer,
    Status, Task,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tempfile::TempDir;

static LOG: LazyLock<Mutex<Vec<(String, String)>>> = LazyLock::new(Mutex::default);
static ACTIVE: LazyLock<Mutex<HashMap<String, (usize, usize)>>> = LazyLock::new(Mutex::default);

/// Names of the probes checked under `tag`, in order
pub fn checked(tag: &str) -> Vec<String> {
    LOG.lock()
        .unwrap()
        .iter()
        .filter(|(t, _)| t == tag)
        .map(|(_, name)| name.clone())
        .collect()
}

/// Most probes of `counter` seen applying at the same time
pub fn peak(counter: &str) -> usize {
    ACTIVE.lock().unwrap().get(counter).map_or(0, |(_, peak)| *peak)
}

#[derive(Debug, Deserialize)]
pub struct Probe {
    #[serde(default)]
    value: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    log: Option<String>,
    #[serde(default)]
    counter: Option<String>,
    #[serde(default)]
    sleep_ms: u64,
    #[serde(default)]
    group: Option<String>,
    #[serde(skip)]
    name: String,
}

impl FromBlock for Probe {
    fn from_block(block: &Block) -> anyhow::Result<Self> {
        let mut probe: Self = block.decode()?;
        probe.name = block.name.clone();
        Ok(probe)
    }
}

impl Preparer for Probe {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        Ok(Box::new(ProbeTask {
            name: self.name.clone(),
            value: render.render("value", &self.value)?,
            path: self.path.as_ref().map(PathBuf::from),
            log: self.log.clone(),
            counter: self.counter.clone(),
            sleep: Duration::from_millis(self.sleep_ms),
        }))
    }

    fn group(&self) -> Option<String> {
        self.group.clone()
    }
}

#[derive(Debug)]
pub struct ProbeTask {
    pub name: String,
    pub value: String,
    path: Option<PathBuf>,
    log: Option<String>,
    counter: Option<String>,
    sleep: Duration,
}

impl Task for ProbeTask {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Status> {
        if let Some(tag) = &self.log {
            LOG.lock().unwrap().push((tag.clone(), self.name.clone()));
        }
        let mut status = Status::no_change().with_output(format!("value: {}", self.value));
        if let Some(path) = &self.path {
            let current = std::fs::read_to_string(path).unwrap_or_default();
            status.add_difference("content", Diff::new(current, self.value.clone()));
        }
        Ok(status)
    }

    fn apply(&self, _ctx: &Context) -> anyhow::Result<Status> {
        if let Some(counter) = &self.counter {
            let mut active = ACTIVE.lock().unwrap();
            let entry = active.entry(counter.clone()).or_default();
            entry.0 += 1;
            entry.1 = entry.1.max(entry.0);
        }
        std::thread::sleep(self.sleep);
        if let Some(path) = &self.path {
            std::fs::write(path, &self.value)?;
        }
        if let Some(counter) = &self.counter {
            let mut active = ACTIVE.lock().unwrap();
            if let Some(entry) = active.get_mut(counter) {
                entry.0 -= 1;
            }
        }
        Ok(Status::no_change().with_message(format!("wrote {}", self.name)))
    }

    fn exported_fields(&self) -> Fields {
        Fields::from([("stdout".to_string(), self.value.clone().into())])
    }
}

#[derive(Debug, Deserialize)]
pub struct Broken {
    message: String,
}

impl FromBlock for Broken {
    fn from_block(block: &Block) -> anyhow::Result<Self> {
        block.decode()
    }
}

impl Preparer for Broken {
    fn prepare(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        Ok(Box::new(BrokenTask(self.message.clone())))
    }
}

#[derive(Debug)]
struct BrokenTask(String);

impl Task for BrokenTask {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Status> {
        anyhow::bail!("{}", self.0)
    }

    fn apply(&self, _ctx: &Context) -> anyhow::Result<Status> {
        anyhow::bail!("{}", self.0)
    }
}

pub fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry.register::<Probe>("probe").register::<Broken>("broken");
    registry
}

/// A directory holding configuration files
pub struct Fixture {
    pub dir: TempDir,
    pub registry: Registry,
    pub params: Params,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            registry: registry(),
            params: Params::new(),
        }
    }

    /// Write `name` and return its location
    pub fn write(&self, name: &str, text: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new().registry(&self.registry).params(&self.params)
    }
}

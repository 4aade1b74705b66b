use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ops::IdGenerator;
use crate::task::Task;

/// Where the first task list comes from when storage has none.
pub trait SeedSource {
    fn fetch(&self) -> anyhow::Result<Vec<Value>>;
}

/// Unauthenticated GET of a JSON array.
#[derive(Debug, Clone)]
pub struct HttpSeedSource {
    url: String,
    timeout: Duration,
}

impl HttpSeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl SeedSource for HttpSeedSource {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build http client")?;

        let response = client
            .get(&self.url)
            .send()
            .with_context(|| format!("failed to fetch {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("seed request to {} returned {status}", self.url));
        }

        let body = response.text().context("failed to read seed response body")?;
        debug!(bytes = body.len(), "received seed payload");
        let items: Vec<Value> =
            serde_json::from_str(&body).context("seed payload is not a JSON array")?;
        Ok(items)
    }
}

/// Turn raw seed items into tasks. Explicit ids are observed up front so that
/// generated ids never collide with them; items without a numeric id, and
/// items repeating an id already taken, get a fresh one. Items that still do
/// not decode as tasks are skipped.
pub fn seed_tasks(items: Vec<Value>, ids: &mut IdGenerator) -> Vec<Task> {
    ids.observe(items.iter().filter_map(|item| item.get("id").and_then(Value::as_i64)));

    let mut taken = BTreeSet::new();
    let mut tasks = Vec::with_capacity(items.len());
    for (idx, mut item) in items.into_iter().enumerate() {
        let Some(obj) = item.as_object_mut() else {
            warn!(index = idx, "skipping non-object seed item");
            continue;
        };
        let explicit = obj.get("id").and_then(Value::as_i64);
        match explicit {
            Some(id) if taken.insert(id) => {}
            Some(id) => {
                let fresh = ids.next();
                warn!(index = idx, id, fresh, "duplicate seed id; assigning a new one");
                obj.insert("id".to_string(), Value::from(fresh));
                taken.insert(fresh);
            }
            None => {
                let fresh = ids.next();
                obj.insert("id".to_string(), Value::from(fresh));
                taken.insert(fresh);
            }
        }
        match serde_json::from_value::<Task>(item) {
            Ok(task) => tasks.push(task),
            Err(err) => warn!(index = idx, error = %err, "skipping malformed seed item"),
        }
    }
    tasks
}

/// Fetch and decode the seed list. Failures are logged and yield an empty
/// list; there is no retry.
#[tracing::instrument(skip_all)]
pub fn load_seed(source: &dyn SeedSource, ids: &mut IdGenerator) -> Vec<Task> {
    match source.fetch() {
        Ok(items) => {
            let tasks = seed_tasks(items, ids);
            info!(count = tasks.len(), "loaded seed tasks");
            tasks
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "seed fetch failed; starting with an empty list");
            Vec::new()
        }
    }
}

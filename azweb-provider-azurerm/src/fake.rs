//! In-memory ARM used by handler tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use azweb_core::provider::{ProviderError, ProviderResult};
use azweb_core::timeouts::OperationContext;
use serde_json::{Value as Json, json};

use crate::client::ArmClient;

/// Objects keyed by lowercased path; every request is recorded
#[derive(Default)]
pub struct FakeArmClient {
    objects: Mutex<BTreeMap<String, Json>>,
    calls: Mutex<Vec<String>>,
    /// Remaining not-found answers per path
    not_found: Mutex<HashMap<String, usize>>,
    /// Provisioning states handed out by successive GETs; the last one sticks
    states: Mutex<HashMap<String, VecDeque<String>>>,
    failing_puts: Mutex<HashSet<String>>,
    /// How long each PUT stays in flight
    put_delay: Mutex<Duration>,
    puts_in_flight: AtomicUsize,
    max_puts_in_flight: AtomicUsize,
}

/// ARM serves the swift connection under both `config` and `networkConfig`
fn key(path: &str) -> String {
    path.to_lowercase()
        .replace("/networkconfig/virtualnetwork", "/config/virtualnetwork")
}

impl FakeArmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, mut body: Json) {
        if let Some(object) = body.as_object_mut() {
            object.entry("id").or_insert_with(|| json!(path));
        }
        self.objects.lock().unwrap().insert(key(path), body);
    }

    pub fn object(&self, path: &str) -> Option<Json> {
        self.objects.lock().unwrap().get(&key(path)).cloned()
    }

    pub fn remove(&self, path: &str) {
        self.objects.lock().unwrap().remove(&key(path));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose method and path start with `prefix` (e.g., "PUT ")
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Calls that are exactly `call` (e.g., "GET /subscriptions/...")
    pub fn count_exact(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = delay;
    }

    /// Most PUTs ever in flight at once
    pub fn max_puts_in_flight(&self) -> usize {
        self.max_puts_in_flight.load(Ordering::SeqCst)
    }

    pub fn not_found_times(&self, path: &str, times: usize) {
        self.not_found.lock().unwrap().insert(key(path), times);
    }

    pub fn provisioning_states(&self, path: &str, states: &[&str]) {
        self.states.lock().unwrap().insert(
            key(path),
            states.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn fail_put(&self, path: &str) {
        self.failing_puts.lock().unwrap().insert(key(path));
    }

    fn record(&self, method: &str, path: &str) {
        self.calls.lock().unwrap().push(format!("{} {}", method, path));
    }

    fn take_not_found(&self, path: &str) -> bool {
        let mut not_found = self.not_found.lock().unwrap();
        match not_found.get_mut(&key(path)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn next_state(&self, path: &str) -> Option<String> {
        let mut states = self.states.lock().unwrap();
        let queue = states.get_mut(&key(path))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn store(&self, path: &str, body: &Json) -> ProviderResult<Json> {
        if self.failing_puts.lock().unwrap().contains(&key(path)) {
            return Err(ProviderError::new(format!("injected failure for {}", path)));
        }
        let mut body = body.clone();
        if let Some(object) = body.as_object_mut() {
            object.insert("id".to_string(), json!(path));
            let name = path.rsplit('/').next().unwrap_or_default();
            object.insert("name".to_string(), json!(name));
        }
        self.objects.lock().unwrap().insert(key(path), body.clone());
        Ok(body)
    }
}

#[async_trait]
impl ArmClient for FakeArmClient {
    async fn get(&self, path: &str, _api_version: &str) -> ProviderResult<Option<Json>> {
        self.record("GET", path);
        if self.take_not_found(path) {
            return Ok(None);
        }
        let state = self.next_state(path);
        let mut objects = self.objects.lock().unwrap();
        let Some(object) = objects.get_mut(&key(path)) else {
            return Ok(None);
        };
        if let Some(state) = state {
            object["properties"]["provisioningState"] = json!(state);
        }
        Ok(Some(object.clone()))
    }

    async fn put(
        &self,
        _ctx: &OperationContext,
        path: &str,
        _api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json> {
        self.record("PUT", path);
        let delay = *self.put_delay.lock().unwrap();
        let now = self.puts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_puts_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.puts_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.store(path, body)
    }

    async fn patch(
        &self,
        _ctx: &OperationContext,
        path: &str,
        _api_version: &str,
        body: &Json,
    ) -> ProviderResult<Json> {
        self.record("PATCH", path);
        let mut merged = self.object(path).ok_or_else(|| {
            ProviderError::not_found(format!("{} does not exist", path))
        })?;
        if let (Some(current), Some(patch)) = (merged.as_object_mut(), body.as_object()) {
            for (k, v) in patch {
                match (current.get_mut(k), v) {
                    (Some(Json::Object(existing)), Json::Object(fields)) => {
                        existing.extend(fields.clone());
                    }
                    _ => {
                        current.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        self.store(path, &merged)
    }

    async fn post(&self, path: &str, _api_version: &str, _body: Option<&Json>) -> ProviderResult<Json> {
        self.record("POST", path);
        if self.take_not_found(path) {
            return Err(ProviderError::not_found(format!("{} is not ready", path)));
        }
        if let Some(object) = self.object(path) {
            return Ok(object);
        }
        match path.strip_suffix("/list") {
            Some(listed) => Ok(self
                .object(listed)
                .unwrap_or_else(|| json!({"properties": {}}))),
            None => Ok(Json::Null),
        }
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        path: &str,
        _api_version: &str,
    ) -> ProviderResult<()> {
        self.record("DELETE", path);
        let prefix = key(path);
        self.objects
            .lock()
            .unwrap()
            .retain(|k, _| k != &prefix && !k.starts_with(&format!("{}/", prefix)));
        Ok(())
    }
}

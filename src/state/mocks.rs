// Mock collaborators for engine tests - no side effects outside the mock

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::traits::{Pacer, ProgressStore};
use super::types::ProgressRecord;

/// Progress store that keeps the record in memory and remembers every write
#[derive(Debug, Default)]
pub struct MockProgressStore {
    pub record: Mutex<ProgressRecord>,
    pub saved: Mutex<Vec<String>>,
    pub fail_saves: Mutex<bool>,
}

impl MockProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(state: &str) -> Self {
        let store = Self::new();
        store.record.lock().unwrap().next_state = state.to_string();
        store
    }

    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub fn current_record(&self) -> ProgressRecord {
        self.record.lock().unwrap().clone()
    }

    pub fn next_state(&self) -> String {
        self.record.lock().unwrap().next_state.clone()
    }

    pub fn get_saved_states(&self) -> Vec<String> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressStore for MockProgressStore {
    async fn save_next_state(&self, state_name: &str) -> Result<()> {
        if *self.fail_saves.lock().unwrap() {
            return Err(anyhow!("progress store unavailable"));
        }
        self.saved.lock().unwrap().push(state_name.to_string());
        self.record.lock().unwrap().next_state = state_name.to_string();
        Ok(())
    }
}

/// Test context: external flags the guards read, plus a log of executed actions
#[derive(Debug, Default)]
pub struct TestContext {
    pub done: bool,
    pub complete: bool,
    pub fail_action: bool,
    pub fail_check: bool,
    pub executed: Vec<String>,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            complete: true,
            ..Default::default()
        }
    }
}

/// Pacer that logs each call together with how many writes the store had
/// seen at that moment
#[derive(Debug)]
pub struct RecordingPacer {
    store: Arc<MockProgressStore>,
    pub events: Mutex<Vec<(&'static str, usize)>>,
}

impl RecordingPacer {
    pub fn observing(store: Arc<MockProgressStore>) -> Self {
        Self {
            store,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<(&'static str, usize)> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: &'static str) {
        let writes = self.store.get_saved_states().len();
        self.events.lock().unwrap().push((event, writes));
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn before_persist(&self) {
        self.record("before");
    }

    async fn after_persist(&self) {
        self.record("after");
    }
}

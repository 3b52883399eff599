//! In-memory router backend for tests (no I/O)

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Forward, Listing, RouterBackend, RouterError};

/// A call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login,
    EnsureLoggedIn,
    List,
    Add(String),
    Delete(String),
}

#[derive(Default)]
struct MockState {
    forwards: Vec<Forward>,
    calls: Vec<Call>,
    next_delete_id: usize,
    login_failures: VecDeque<RouterError>,
    add_failures: HashMap<String, VecDeque<RouterError>>,
    delete_failures: HashMap<String, VecDeque<RouterError>>,
}

/// Records every call and keeps a forward table in memory.
///
/// Failures are queued (per service name for mutations) and consumed one per
/// call, so a single queued transient error followed by success can be
/// expressed.
#[derive(Default)]
pub struct MockRouter {
    state: Mutex<MockState>,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forwards(forwards: Vec<Forward>) -> Self {
        let mock = Self::new();
        for forward in forwards {
            mock.insert(forward);
        }
        mock
    }

    fn insert(&self, mut forward: Forward) {
        let mut state = self.state.lock().unwrap();
        forward.delete_id = Some(format!("delete_{}", state.next_delete_id));
        state.next_delete_id += 1;
        state.forwards.push(forward);
    }

    pub fn fail_login(&self, error: RouterError) {
        self.state.lock().unwrap().login_failures.push_back(error);
    }

    pub fn fail_add(&self, service_name: &str, error: RouterError) {
        let mut state = self.state.lock().unwrap();
        state
            .add_failures
            .entry(service_name.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_delete(&self, service_name: &str, error: RouterError) {
        let mut state = self.state.lock().unwrap();
        state
            .delete_failures
            .entry(service_name.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Only add/delete calls, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Add(_) | Call::Delete(_)))
            .collect()
    }

    pub fn forwards(&self) -> Vec<Forward> {
        self.state.lock().unwrap().forwards.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl RouterBackend for MockRouter {
    async fn login(&self) -> Result<(), RouterError> {
        self.record(Call::Login);
        Ok(())
    }

    async fn ensure_logged_in(&self) -> Result<(), RouterError> {
        self.record(Call::EnsureLoggedIn);
        match self.state.lock().unwrap().login_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn list_forwards(&self) -> Result<Listing, RouterError> {
        self.record(Call::List);
        Ok(Listing {
            forwards: self.forwards(),
            nonce: "mock-nonce".to_string(),
        })
    }

    async fn add_forward(&self, forward: &Forward) -> Result<(), RouterError> {
        self.record(Call::Add(forward.service_name.clone()));
        {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state
                .add_failures
                .get_mut(&forward.service_name)
                .and_then(|q| q.pop_front())
            {
                return Err(error);
            }
            if state.forwards.iter().any(|f| f.matches(forward)) {
                return Ok(());
            }
        }
        self.insert(forward.clone());
        Ok(())
    }

    async fn delete_forward(&self, forward: &Forward) -> Result<(), RouterError> {
        self.record(Call::Delete(forward.service_name.clone()));
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state
            .delete_failures
            .get_mut(&forward.service_name)
            .and_then(|q| q.pop_front())
        {
            return Err(error);
        }
        let before = state.forwards.len();
        state
            .forwards
            .retain(|f| f.service_name != forward.service_name);
        if state.forwards.len() == before {
            return Err(RouterError::NotFound(forward.service_name.clone()));
        }
        Ok(())
    }
}

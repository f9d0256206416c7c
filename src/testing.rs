//! Test doubles shared by the unit tests

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{StackError, StackResult};
use crate::notify::Notifier;
use crate::services::{ServiceController, ServiceState};
use crate::sync::Fetcher;

type ExecHandler = Box<dyn Fn(&str, &[String]) -> StackResult<String>>;

/// In-memory service controller with scripted state transitions
pub struct FakeController {
    states: RefCell<HashMap<String, ServiceState>>,
    after_start: HashMap<String, ServiceState>,
    after_restart: HashMap<String, ServiceState>,
    after_recreate: HashMap<String, ServiceState>,
    calls: RefCell<Vec<(String, Vec<String>)>>,
    queries: RefCell<HashMap<String, usize>>,
    failing_execs: RefCell<usize>,
    failing_starts: bool,
    failing_stops: bool,
    exec_handler: Option<ExecHandler>,
}

impl FakeController {
    pub fn new(initial: &[(&str, ServiceState)]) -> Self {
        Self {
            states: RefCell::new(
                initial
                    .iter()
                    .map(|(name, state)| (name.to_string(), *state))
                    .collect(),
            ),
            after_start: HashMap::new(),
            after_restart: HashMap::new(),
            after_recreate: HashMap::new(),
            calls: RefCell::new(Vec::new()),
            queries: RefCell::new(HashMap::new()),
            failing_execs: RefCell::new(0),
            failing_starts: false,
            failing_stops: false,
            exec_handler: None,
        }
    }

    /// State a service reaches after `start`
    pub fn on_start(mut self, name: &str, state: ServiceState) -> Self {
        self.after_start.insert(name.to_string(), state);
        self
    }

    /// State a service reaches after `restart`
    pub fn on_restart(mut self, name: &str, state: ServiceState) -> Self {
        self.after_restart.insert(name.to_string(), state);
        self
    }

    /// State a service reaches after `recreate`
    pub fn on_recreate(mut self, name: &str, state: ServiceState) -> Self {
        self.after_recreate.insert(name.to_string(), state);
        self
    }

    /// Make the next `count` exec calls fail
    pub fn fail_next_execs(self, count: usize) -> Self {
        *self.failing_execs.borrow_mut() = count;
        self
    }

    /// Make every `start` call fail
    pub fn failing_starts(mut self) -> Self {
        self.failing_starts = true;
        self
    }

    /// Make every `stop` call fail and leave the state as it was
    pub fn failing_stops(mut self) -> Self {
        self.failing_stops = true;
        self
    }

    pub fn with_exec<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> StackResult<String> + 'static,
    {
        self.exec_handler = Some(Box::new(handler));
        self
    }

    /// Every call as (action, arguments)
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.borrow().clone()
    }

    /// Argument batches of one action kind
    pub fn batches(&self, action: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(a, _)| a == action)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn query_count(&self, name: &str) -> usize {
        self.queries.borrow().get(name).copied().unwrap_or(0)
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.states.borrow().get(name).copied()
    }

    fn record(&self, action: &str, args: Vec<String>) {
        self.calls.borrow_mut().push((action.to_string(), args));
    }

    fn transition(&self, names: &[String], table: &HashMap<String, ServiceState>) {
        let mut states = self.states.borrow_mut();
        for name in names {
            let next = table
                .get(name)
                .copied()
                .unwrap_or_else(ServiceState::healthy);
            states.insert(name.clone(), next);
        }
    }
}

impl ServiceController for FakeController {
    fn query_state(&self, name: &str) -> StackResult<ServiceState> {
        *self.queries.borrow_mut().entry(name.to_string()).or_insert(0) += 1;
        Ok(self
            .states
            .borrow()
            .get(name)
            .copied()
            .unwrap_or(ServiceState::new(
                crate::services::RunState::Unknown,
                crate::services::HealthState::None,
            )))
    }

    fn start(&self, names: &[String]) -> StackResult<()> {
        self.record("start", names.to_vec());
        if self.failing_starts {
            return Err(StackError::Service("container exited with code 1".into()));
        }
        self.transition(names, &self.after_start);
        Ok(())
    }

    fn stop(&self, names: &[String]) -> StackResult<()> {
        self.record("stop", names.to_vec());
        if self.failing_stops {
            return Err(StackError::Service("timed out stopping container".into()));
        }
        let mut states = self.states.borrow_mut();
        for name in names {
            states.insert(name.clone(), ServiceState::stopped());
        }
        Ok(())
    }

    fn restart(&self, names: &[String]) -> StackResult<()> {
        self.record("restart", names.to_vec());
        self.transition(names, &self.after_restart);
        Ok(())
    }

    fn recreate(&self, names: &[String]) -> StackResult<()> {
        self.record("recreate", names.to_vec());
        self.transition(names, &self.after_recreate);
        Ok(())
    }

    fn exec_in_service(&self, name: &str, command: &[String]) -> StackResult<String> {
        let mut args = vec![name.to_string()];
        args.extend(command.iter().cloned());
        self.record("exec", args);

        {
            let mut failing = self.failing_execs.borrow_mut();
            if *failing > 0 {
                *failing -= 1;
                return Err(StackError::Service(format!("exec in {} failed", name)));
            }
        }

        match &self.exec_handler {
            Some(handler) => handler(name, command),
            None => Ok(String::new()),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::ZERO
    }
}

/// Notifier that records every message
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: RefCell<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, subject: &str, body: &str) -> StackResult<()> {
        self.sent
            .borrow_mut()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Fetcher serving fixed bodies; unknown URLs fail like a refused connection
pub struct StaticFetcher {
    bodies: HashMap<String, String>,
    pub fetched: RefCell<Vec<String>>,
}

impl StaticFetcher {
    pub fn new(bodies: &[(&str, &str)]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            fetched: RefCell::new(Vec::new()),
        }
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> StackResult<String> {
        self.fetched.borrow_mut().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| StackError::Fetch(format!("GET {} failed: connection refused", url)))
    }
}

//! Scripted transport for tests
//!
//! Stands in for the BMC: answers sensor queries from a scripted queue or a
//! default table, accepts or rejects actuation commands, and records every
//! invocation so tests can assert on exactly what would have been sent.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use crate::constants::ipmi;
use crate::error::{BmcfanError, Result};
use crate::hw::IpmiTransport;

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    calls: RefCell<Vec<String>>,
    sensor_replies: RefCell<VecDeque<Result<String>>>,
    sensor_table: RefCell<Option<String>>,
    reject_actuation: Cell<bool>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every sensor query with this table unless a queued reply exists
    pub fn with_sensor_table(self, table: &str) -> Self {
        self.set_sensor_table(table);
        self
    }

    pub fn set_sensor_table(&self, table: &str) {
        *self.sensor_table.borrow_mut() = Some(table.to_string());
    }

    /// Queue a one-shot sensor reply
    pub fn push_sensor_reply(&self, table: &str) {
        self.sensor_replies.borrow_mut().push_back(Ok(table.to_string()));
    }

    /// Queue a one-shot failed sensor query
    pub fn push_sensor_failure(&self) {
        self.sensor_replies.borrow_mut().push_back(Err(failure("sdr type temperature")));
    }

    /// Make every non-query command fail until reset
    pub fn set_reject_actuation(&self, reject: bool) {
        self.reject_actuation.set(reject);
    }

    /// Every invocation so far, space-joined
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Invocations other than sensor queries
    pub fn actuation_calls(&self) -> Vec<String> {
        let query = ipmi::SENSOR_QUERY.join(" ");
        self.calls.borrow().iter().filter(|c| **c != query).cloned().collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == command).count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl IpmiTransport for ScriptedTransport {
    async fn invoke(&self, args: &[String], _timeout: Duration) -> Result<String> {
        let command = args.join(" ");
        self.calls.borrow_mut().push(command.clone());

        if args.iter().map(String::as_str).eq(ipmi::SENSOR_QUERY.iter().copied()) {
            if let Some(reply) = self.sensor_replies.borrow_mut().pop_front() {
                return reply;
            }
            return self
                .sensor_table
                .borrow()
                .clone()
                .ok_or_else(|| failure(&command));
        }

        if self.reject_actuation.get() {
            return Err(failure(&command));
        }
        Ok(String::new())
    }
}

fn failure(command: &str) -> BmcfanError {
    BmcfanError::CommandStatus {
        command: command.to_string(),
        code: Some(1),
        stderr: "Error: Unable to establish IPMI v2 / RMCP+ session".to_string(),
    }
}

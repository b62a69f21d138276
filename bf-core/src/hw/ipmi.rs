//! IPMI transport and Safe Command Executor
//!
//! Every sensor query and actuation command goes through [`SafeExecutor`],
//! which bounds each attempt with a timeout and retries a limited number of
//! times with a short increasing backoff. A wedged BMC can therefore stall the
//! control loop for at most `timeout × attempts` plus the backoff sleeps.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::{exec, ipmi};
use crate::data::ControllerConfig;
use crate::error::{BmcfanError, Result};

/// One platform-management invocation, as the argument list handed to the
/// transport program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiCommand {
    args: Vec<String>,
}

impl IpmiCommand {
    pub fn new(parts: &[&str]) -> Self {
        Self {
            args: parts.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Temperature sensor table query
    pub fn sensor_query() -> Self {
        Self::new(ipmi::SENSOR_QUERY)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_sensor_query(&self) -> bool {
        self.args.iter().map(String::as_str).eq(ipmi::SENSOR_QUERY.iter().copied())
    }
}

impl fmt::Display for IpmiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Something that can execute a platform-management command and return its
/// standard output.
#[allow(async_fn_in_trait)]
pub trait IpmiTransport {
    /// Run a single attempt, failing if it does not finish within `timeout`
    async fn invoke(&self, args: &[String], timeout: Duration) -> Result<String>;
}

impl<T: IpmiTransport + ?Sized> IpmiTransport for &T {
    async fn invoke(&self, args: &[String], timeout: Duration) -> Result<String> {
        (**self).invoke(args, timeout).await
    }
}

/// Transport that shells out to `ipmitool` (or a compatible program)
#[derive(Debug, Clone)]
pub struct IpmiTool {
    program: String,
    base_args: Vec<String>,
}

impl IpmiTool {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.ipmitool.clone(), config.ipmitool_args.clone())
    }

    /// Printable command line with any `-P <password>` value masked
    fn describe(&self, args: &[String]) -> String {
        let mut parts = Vec::with_capacity(1 + self.base_args.len() + args.len());
        parts.push(self.program.clone());
        let mut mask_next = false;
        for arg in self.base_args.iter().chain(args) {
            if mask_next {
                parts.push("****".to_string());
                mask_next = false;
            } else {
                mask_next = arg == "-P";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

impl IpmiTransport for IpmiTool {
    async fn invoke(&self, args: &[String], timeout: Duration) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BmcfanError::CommandSpawn {
                    program: self.program.clone(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(BmcfanError::CommandTimeout {
                    command: self.describe(args),
                    timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(BmcfanError::CommandStatus {
                command: self.describe(args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Backoff to sleep before the given zero-based attempt
pub fn backoff_for(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(exec::BACKOFF.len() - 1);
    exec::BACKOFF[idx]
}

/// Bounded-timeout, bounded-retry wrapper around a transport
#[derive(Debug)]
pub struct SafeExecutor<T> {
    transport: T,
    timeout: Duration,
    max_attempts: u32,
}

impl<T: IpmiTransport> SafeExecutor<T> {
    pub fn new(transport: T, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            transport,
            timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(transport: T, config: &ControllerConfig) -> Self {
        Self::new(transport, config.command_timeout(), config.command_attempts)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run with the executor's configured timeout and attempt count
    pub async fn run(&self, command: &IpmiCommand) -> Result<String> {
        self.run_with(command, self.timeout, self.max_attempts).await
    }

    /// Run a command, retrying up to `max_attempts` times.
    ///
    /// Never panics and never retries indefinitely; the returned error carries
    /// the last failure so the caller can decide whether it is fatal.
    pub async fn run_with(
        &self,
        command: &IpmiCommand,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<String> {
        let attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let delay = backoff_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.transport.invoke(command.args(), timeout).await {
                Ok(output) => {
                    if attempt > 0 {
                        debug!(command = %command, attempt = attempt + 1, "Command succeeded after retry");
                    }
                    return Ok(output);
                }
                Err(e) => {
                    debug!(command = %command, attempt = attempt + 1, error = %e, "Command attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        warn!(command = %command, attempts, "Command failed: {}", last_error);
        Err(BmcfanError::CommandFailed {
            command: command.to_string(),
            attempts,
            last_error,
        })
    }
}

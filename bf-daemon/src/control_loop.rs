//! Fan Control Loop
//!
//! One cycle: fetch the sensor table, compute a duty per target with the PI
//! controller, hand it to the vendor policy, then publish metrics.
//!
//! # Failure handling
//! - **Sensor fetch fails**: the whole cycle is skipped. Nothing is actuated
//!   and nothing is published, so the exported timestamp goes stale.
//! - **Target has no reading**: that target is skipped, the others proceed.
//! - **Actuation fails**: logged; controller memory still advances.
//! - Repeated failures are logged on the first occurrence and then every
//!   `LOG_EVERY_N_FAILURES` cycles.

use tracing::{debug, error, info, warn};

use bf_core::constants::timing::LOG_EVERY_N_FAILURES;
use bf_core::{
    ControlTarget, ControllerConfig, Exporter, IpmiTransport, PiController, SafeExecutor,
    SensorReader, StatusSnapshot, TargetStatus, VendorPolicy,
};
use bf_error::Result;

use crate::lifecycle::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        actuated: usize,
        failed: usize,
        skipped: usize,
    },
    /// Sensor table could not be fetched
    FetchFailed,
    /// No target had a usable reading
    NoReadings,
}

/// Everything one daemon instance needs to run the loop
pub struct Controller<T> {
    config: ControllerConfig,
    policy: VendorPolicy,
    executor: SafeExecutor<T>,
    pi: PiController,
    reader: SensorReader,
    targets: Vec<ControlTarget>,
    exporter: Exporter,
    /// Temperatures from the last completed cycle, by target index
    temperatures: Vec<Option<i32>>,
    cycles: u64,
    fetch_failures: u32,
    actuation_failures: u32,
    manual_mode_requested: bool,
}

impl<T: IpmiTransport> Controller<T> {
    pub fn new(
        config: ControllerConfig,
        policy: VendorPolicy,
        executor: SafeExecutor<T>,
        exporter: Exporter,
    ) -> Result<Self> {
        let targets = policy.build_targets(&config)?;
        for target in &targets {
            info!(
                "Target {}: sensors [{}], bank {}",
                target.name(),
                target
                    .selectors()
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                target.bank().unwrap_or("all fans")
            );
        }

        Ok(Self {
            pi: PiController::new(&config),
            temperatures: vec![None; targets.len()],
            config,
            policy,
            executor,
            reader: SensorReader::new(),
            targets,
            exporter,
            cycles: 0,
            fetch_failures: 0,
            actuation_failures: 0,
            manual_mode_requested: false,
        })
    }

    pub fn policy(&self) -> VendorPolicy {
        self.policy
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn targets(&self) -> &[ControlTarget] {
        &self.targets
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Put the board into manual mode if the dialect needs it
    pub async fn enter_manual_mode(&mut self) -> Result<bool> {
        self.manual_mode_requested = self.policy.requires_manual_mode();
        self.policy.enter_manual_mode(&self.executor).await
    }

    /// Hand control back to the board. Only the first call after
    /// [`Self::enter_manual_mode`] issues a command; best effort.
    pub async fn restore_automatic_mode(&mut self) -> bool {
        if !self.manual_mode_requested {
            return false;
        }
        self.manual_mode_requested = false;

        match self.policy.restore_automatic_mode(&self.executor).await {
            Ok(_) => {
                info!("Automatic fan control restored");
                true
            }
            Err(e) => {
                error!("Failed to restore automatic fan control: {}", e);
                false
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let snapshot = match self.reader.fetch(&self.executor).await {
            Ok(snapshot) => {
                if self.fetch_failures > 0 {
                    info!("Sensor fetch recovered after {} failed cycle(s)", self.fetch_failures);
                    self.fetch_failures = 0;
                }
                snapshot
            }
            Err(e) => {
                self.fetch_failures += 1;
                if should_log(self.fetch_failures) {
                    warn!("Skipping cycle (failure count: {}): {}", self.fetch_failures, e);
                } else {
                    debug!("Skipping cycle (failure count: {}): {}", self.fetch_failures, e);
                }
                return CycleOutcome::FetchFailed;
            }
        };

        let temperatures: Vec<Option<i32>> =
            self.targets.iter().map(|t| t.temperature(snapshot)).collect();
        if temperatures.iter().all(Option::is_none) {
            warn!("No configured sensor has a reading; skipping cycle");
            return CycleOutcome::NoReadings;
        }

        let (mut actuated, mut failed, mut skipped) = (0, 0, 0);
        for (target, temperature) in self.targets.iter_mut().zip(&temperatures) {
            let Some(temperature) = *temperature else {
                debug!(fan_target = %target.name(), "No reading, leaving target unchanged");
                skipped += 1;
                continue;
            };

            let previous = target.state.last_duty;
            let duty = self.pi.compute(&mut target.state, temperature);
            let result = self
                .policy
                .apply_duty(&self.executor, target, duty, self.config.hysteresis)
                .await;
            target.state.last_duty = duty;

            debug!(
                fan_target = %target.name(),
                temperature,
                previous,
                duty,
                step = ?target.state.last_step.map(|s| s.percent()),
                "Cycle"
            );

            match result {
                Ok(()) => actuated += 1,
                Err(e) => {
                    failed += 1;
                    self.actuation_failures += 1;
                    if should_log(self.actuation_failures) {
                        error!(
                            "Actuation failed for {} (failure count: {}): {}",
                            target.name(),
                            self.actuation_failures,
                            e
                        );
                    }
                }
            }
        }

        if failed == 0 && self.actuation_failures > 0 {
            info!("Actuation recovered after {} failure(s)", self.actuation_failures);
            self.actuation_failures = 0;
        }

        self.cycles += 1;
        self.temperatures = temperatures;
        self.publish(true);

        CycleOutcome::Completed {
            actuated,
            failed,
            skipped,
        }
    }

    /// Last export, marking the controller as no longer alive
    pub fn publish_final(&self) {
        self.publish(false);
    }

    fn publish(&self, alive: bool) {
        let targets = self
            .targets
            .iter()
            .zip(&self.temperatures)
            .map(|(target, temp)| TargetStatus::from_target(target, *temp))
            .collect();
        let snapshot = StatusSnapshot::new(&self.config, self.policy, targets, self.cycles, alive);

        if let Err(e) = self.exporter.publish(&snapshot) {
            warn!("Failed to publish status: {}", e);
        }
    }
}

fn should_log(count: u32) -> bool {
    count == 1 || count % LOG_EVERY_N_FAILURES == 0
}

/// Run cycles until shutdown is requested (or once, with `once`)
pub async fn run_control_loop<T: IpmiTransport>(
    controller: &mut Controller<T>,
    shutdown: &Shutdown,
    once: bool,
) {
    info!(
        "Fan control loop starting ({} dialect, {} target(s), interval {}s)",
        controller.policy(),
        controller.targets().len(),
        controller.config().interval_secs
    );

    let interval = controller.config().interval();
    loop {
        if shutdown.is_triggered() {
            break;
        }

        let outcome = controller.run_cycle().await;
        debug!(?outcome, cycle = controller.cycles(), "Cycle finished");

        if once || shutdown.sleep(interval).await {
            break;
        }
    }

    info!("Fan control loop stopped after {} cycle(s)", controller.cycles());
}

use crate::checks::{CheckStat, Checks};
use crate::config::DriverConfig;
use crate::error::Error;
use crate::metrics::{CountersSnapshot, RunCounters};
use crate::payload::{AlphanumericPayload, PayloadSource};
use crate::workload::run_virtual_user;
use log::info;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant};
use uuid::Uuid;

// Reference executor for the declarative ramp schedule. It samples the
// interpolated target on a fixed cadence and admits new virtual users up to
// that target, bounded by the concurrency cap. It never tears users down to
// ramp down, it just stops admitting, every session bounds itself through
// its own deadline.
pub struct Runner {
    config: Arc<DriverConfig>,
    checks: Arc<Checks>,
    counters: Arc<RunCounters>,
    payloads: Arc<dyn PayloadSource>,
}

impl Runner {
    pub fn new(config: DriverConfig) -> Result<Self, Error> {
        Self::with_payloads(config, Arc::new(AlphanumericPayload))
    }

    pub fn with_payloads(
        config: DriverConfig,
        payloads: Arc<dyn PayloadSource>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            checks: Arc::new(Checks::new()),
            counters: Arc::new(RunCounters::new()),
            payloads,
        })
    }

    pub fn checks(&self) -> Arc<Checks> {
        self.checks.clone()
    }

    pub async fn run(&self) -> RunReport {
        let run_id = new_run_id();
        let started_at = OffsetDateTime::now_utc();
        let start = Instant::now();
        let schedule = &self.config.schedule;
        let total = schedule.total_duration();

        info!(
            "run {}: {} stages over {:?} against {}, pass-rate threshold {}",
            run_id,
            schedule.stages().len(),
            total,
            self.config.target,
            self.config.threshold,
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut population: JoinSet<()> = JoinSet::new();
        let mut sample = interval(self.config.sample_interval);
        let mut next_index = 0usize;
        let mut current_stage: Option<usize> = None;

        loop {
            sample.tick().await;
            let elapsed = start.elapsed();

            // Reap finished sessions so the population count reflects what
            // is actually live.
            while population.try_join_next().is_some() {}

            if elapsed >= total {
                break;
            }

            if let Some((stage_index, stage)) = schedule.stage_at(elapsed) {
                if current_stage != Some(stage_index) {
                    current_stage = Some(stage_index);
                    info!(
                        "run {}: stage {}/{}, moving toward {} users over {:?}",
                        run_id,
                        stage_index + 1,
                        schedule.stages().len(),
                        stage.target,
                        stage.duration,
                    );
                }
            }

            // Admission control: never exceed the interpolated target, and
            // never exceed the cap. Ramping down is implicit, admission just
            // dries up and the live sessions age out on their deadlines.
            let target = schedule.target_at(elapsed);
            for _ in population.len()..target {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };

                let index = next_index;
                next_index += 1;
                let config = self.config.clone();
                let checks = self.checks.clone();
                let counters = self.counters.clone();
                let payloads = self.payloads.clone();

                population.spawn(async move {
                    run_virtual_user(index, config, checks, counters, payloads).await;
                    drop(permit);
                });
            }
        }

        info!(
            "run {}: schedule complete, draining {} live sessions",
            run_id,
            population.len(),
        );
        while population.join_next().await.is_some() {}

        let pass_rate = self.checks.pass_rate();
        RunReport {
            run_id,
            started_at,
            elapsed: start.elapsed(),
            checks: self.checks.snapshot(),
            pass_rate,
            threshold: self.config.threshold,
            passed: self.checks.meets(self.config.threshold),
            counters: self.counters.snapshot(),
        }
    }
}

fn new_run_id() -> Uuid {
    Uuid::new_v8(rand::random::<[u8; 16]>())
}

// Everything a run leaves behind: the per-check tallies, the aggregate pass
// rate against the threshold, and the traffic counters.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    pub checks: Vec<CheckStat>,
    pub pass_rate: f64,
    pub threshold: f64,
    pub passed: bool,
    pub counters: CountersSnapshot,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} finished in {:.1}s",
            self.run_id,
            self.elapsed.as_secs_f64(),
        )?;
        if let Ok(started) = self.started_at.format(&Rfc3339) {
            writeln!(f, "started at {}", started)?;
        }
        writeln!(
            f,
            "sessions: {} started, {} completed, {} failed",
            self.counters.sessions_started,
            self.counters.sessions_completed,
            self.counters.sessions_failed,
        )?;
        writeln!(
            f,
            "messages: {} sent ({} bytes), {} received ({} bytes), {} decode failures",
            self.counters.messages_sent,
            self.counters.bytes_sent,
            self.counters.messages_received,
            self.counters.bytes_received,
            self.counters.decode_failures,
        )?;
        for stat in &self.checks {
            writeln!(
                f,
                "  {:<20} {:>8} passed {:>8} failed  {:>6.2}%",
                stat.name,
                stat.passed,
                stat.failed,
                stat.rate() * 100.0,
            )?;
        }
        write!(
            f,
            "checks: {:.2}% passed, threshold {:.2}% -> {}",
            self.pass_rate * 100.0,
            self.threshold * 100.0,
            if self.passed { "PASSED" } else { "FAILED" },
        )
    }
}

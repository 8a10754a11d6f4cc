use crate::error::Error;
use crate::ramp::RampSchedule;
use crate::request::client_url;
use std::time::Duration;

// Everything the driver needs is fixed at startup, nothing here changes
// during a run. The defaults reproduce the workload the broadcast server is
// soak-tested with: a tagged message plus a ~1KB and a ~10KB random payload
// every second, a 5 second pause before closing, and a hard 10 second bound
// on every session.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub target: String,
    pub username_prefix: String,
    pub tick_period: Duration,
    pub post_send_delay: Duration,
    pub session_deadline: Duration,
    pub small_payload: usize,
    pub large_payload: usize,
    pub threshold: f64,
    pub schedule: RampSchedule,
    // The schedule is declarative, these two bound how the runner executes
    // it: how often the interpolated target is sampled, and how many
    // sessions may ever be live at once.
    pub sample_interval: Duration,
    pub max_concurrent: usize,
    pub connect_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            target: String::from("ws://localhost:9090/ws"),
            username_prefix: String::from("loadtest"),
            tick_period: Duration::from_secs(1),
            post_send_delay: Duration::from_secs(5),
            session_deadline: Duration::from_secs(10),
            small_payload: 1000,
            large_payload: 10_000,
            threshold: 0.95,
            schedule: RampSchedule::broadcast_soak(),
            sample_interval: Duration::from_millis(250),
            max_concurrent: 512,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::InvalidThreshold(self.threshold));
        }
        // Parsing with a probe index surfaces bad URLs before any virtual
        // user is spawned.
        client_url(&self.target, &self.username_prefix, 0)?;
        Ok(())
    }
}

use crate::error::Error;
use std::str::FromStr;
use std::time::Duration;

// One segment of the load ramp. The scheduler moves the active virtual-user
// count linearly from the previous stage's target toward this one, across
// the stage's duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampStage {
    pub duration: Duration,
    pub target: usize,
}

impl RampStage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

// Stage specs on the command line look like `30s:100` or `1m:50`. Bare
// numbers are read as seconds.
impl FromStr for RampStage {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (duration, target) = spec
            .split_once(':')
            .ok_or_else(|| Error::InvalidStageSpec(spec.to_string()))?;

        let duration = parse_duration(duration)
            .ok_or_else(|| Error::InvalidStageSpec(spec.to_string()))?;
        let target = target
            .parse::<usize>()
            .map_err(|_| Error::InvalidStageSpec(spec.to_string()))?;

        if duration.is_zero() {
            return Err(Error::ZeroDurationStage);
        }

        Ok(RampStage::new(duration, target))
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    if let Some(stripped) = value.strip_suffix('m') {
        return Some(Duration::from_secs(stripped.parse::<u64>().ok()? * 60));
    }
    if let Some(stripped) = value.strip_suffix('s') {
        return Some(Duration::from_secs(stripped.parse::<u64>().ok()?));
    }
    Some(Duration::from_secs(value.parse::<u64>().ok()?))
}

// Declarative description of the whole ramp, consumed sequentially by the
// runner. The schedule itself performs no scheduling, it only answers what
// the target concurrency is at a given instant.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    stages: Vec<RampStage>,
}

impl RampSchedule {
    pub fn new(stages: Vec<RampStage>) -> Result<Self, Error> {
        if stages.is_empty() {
            return Err(Error::EmptySchedule);
        }
        if stages.iter().any(|stage| stage.duration.is_zero()) {
            return Err(Error::ZeroDurationStage);
        }
        Ok(Self { stages })
    }

    // The soak profile used against the broadcast server: a steep opening
    // ramp, a drop to a small population, a second climb, a hold, and a
    // ramp down to zero. The opening target is carried as configured in the
    // source material; real concurrency is bounded by the runner's cap.
    pub fn broadcast_soak() -> Self {
        Self {
            stages: vec![
                RampStage::new(Duration::from_secs(30), 1_000_000),
                RampStage::new(Duration::from_secs(60), 50),
                RampStage::new(Duration::from_secs(30), 100),
                RampStage::new(Duration::from_secs(60), 100),
                RampStage::new(Duration::from_secs(30), 0),
            ],
        }
    }

    pub fn stages(&self) -> &[RampStage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    // Index and stage active at the given elapsed time, None once the
    // schedule has run out.
    pub fn stage_at(&self, elapsed: Duration) -> Option<(usize, &RampStage)> {
        let mut start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            let end = start + stage.duration;
            if elapsed < end {
                return Some((index, stage));
            }
            start = end;
        }
        None
    }

    // Linear interpolation between the previous stage's target (zero before
    // the first stage) and the active stage's target. Past the end of the
    // schedule the final target is held.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut start = Duration::ZERO;
        let mut previous = 0usize;

        for stage in &self.stages {
            let end = start + stage.duration;
            if elapsed < end {
                let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let from = previous as f64;
                let to = stage.target as f64;
                return (from + (to - from) * progress).round() as usize;
            }
            previous = stage.target;
            start = end;
        }

        previous
    }
}

use std::time::Duration;

use sysinfo::System;

pub const WAVEFORMS_CPU_USAGE: f64 = 30.0;
pub const THUMBNAILS_CPU_USAGE: f64 = 20.0;
pub const RATE_TICK: Duration = Duration::from_millis(200);

const RATE_FLOOR: f64 = 0.1;
const RESUME_RATE: f64 = 0.5;

pub trait CpuSampler {
    /// Process CPU usage since the previous call, in percent of the
    /// whole machine.
    fn usage(&mut self) -> f64;
}

/// Samples this process's CPU load, normalized by core count.
pub struct CpuUsageTracker {
    system: System,
    pid: sysinfo::Pid,
}

impl CpuUsageTracker {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().unwrap_or_else(|_| sysinfo::Pid::from_u32(0));
        let mut system = System::new_all();
        system.refresh_all();
        Self { system, pid }
    }
}

impl Default for CpuUsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for CpuUsageTracker {
    fn usage(&mut self) -> f64 {
        self.system.refresh_all();
        let cores = self.system.cpus().len().max(1) as f64;
        self.system
            .process(self.pid)
            .map(|p| p.cpu_usage() as f64 / cores)
            .unwrap_or(0.0)
    }
}

/// The pipeline surface the rate controller drives. Implemented over a
/// real GStreamer pipeline by the waveform previewer and by fakes in
/// tests.
pub trait RateControlled {
    fn position(&mut self) -> Option<u64>;

    /// Flushing seek from `position` at `rate`, then back to playing.
    fn apply_rate(&mut self, rate: f64, position: u64);

    /// Drop to the ready state, abandoning buffered data.
    fn park(&mut self);

    /// Ready to paused; completion is reported back via
    /// [`PipelineCpuAdapter::on_unparked`].
    fn unpark(&mut self);
}

/// Modulates a pipeline's playback rate from CPU load feedback.
///
/// Every tick compares usage against the target: above it the rate
/// shrinks by 10%, below it the rate grows by 10% up to 1.0. Once the
/// rate would fall under 0.1 the pipeline is parked in the ready state
/// instead of seeking at a vanishing rate; when load subsides enough the
/// pipeline is unparked and resumed with one full-rate seek from the
/// remembered position. The adapter never blocks: the owner calls
/// [`PipelineCpuAdapter::tick`] from its timer and
/// [`PipelineCpuAdapter::on_unparked`] from its bus watcher.
pub struct PipelineCpuAdapter<S: CpuSampler> {
    sampler: S,
    target: f64,
    rate: f64,
    parked: bool,
    last_position: u64,
    stopped: bool,
}

impl<S: CpuSampler> PipelineCpuAdapter<S> {
    pub fn new(target: f64, sampler: S) -> Self {
        Self {
            sampler,
            target,
            rate: 1.0,
            parked: false,
            last_position: 0,
            stopped: false,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn tick(&mut self, pipeline: &mut dyn RateControlled) {
        if self.stopped {
            return;
        }

        let usage = self.sampler.usage();
        if usage >= self.target {
            if self.rate < RATE_FLOOR {
                if !self.parked {
                    self.parked = true;
                    self.last_position = pipeline.position().unwrap_or(self.last_position);
                    tracing::debug!(position = self.last_position, "parking starved pipeline");
                    pipeline.park();
                }
                return;
            }
            self.rate *= 0.9;
            tracing::trace!(rate = self.rate, usage, "rate slowed down");
        } else {
            self.rate = (self.rate * 1.1).min(1.0);
            tracing::trace!(rate = self.rate, usage, "rate sped up");
        }

        if self.parked {
            // Only leave the ready state once the rate has recovered,
            // to avoid bouncing between ready and paused.
            if self.rate > RESUME_RATE {
                pipeline.unpark();
            }
            return;
        }

        let position = pipeline.position().unwrap_or(self.last_position);
        self.last_position = position;
        pipeline.apply_rate(self.rate, position);
    }

    /// Ready-to-paused completion: a single full-rate seek picks back up
    /// where the pipeline was parked.
    pub fn on_unparked(&mut self, pipeline: &mut dyn RateControlled) {
        if !self.parked || self.stopped {
            return;
        }
        pipeline.apply_rate(1.0, self.last_position);
        self.parked = false;
    }
}

//! Sampling that keeps the outgoing rate near a target number of items per second.
//!
//! The actual keep/drop decision is made by a [`FixedRateSampler`]. A background evaluator
//! measures how many items were kept over each evaluation interval, smooths that with an
//! exponential moving average, and moves the fixed sampler's percentage up or down.
//!
//! Increases and decreases each have a cool-down. Once the percentage moved in one direction,
//! another move in the same direction has to wait for that direction's timeout; a move in the
//! opposite direction is applied immediately.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Error;

use crate::sampling::settings::AdaptiveSettings;
use crate::sampling::{FixedRateSampler, TelemetrySampler};
use crate::timer::PeriodicTask;
use crate::types::TelemetryItem;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeDirection {
    Up,
    Down,
    None,
}

#[derive(Debug)]
struct Evaluator {
    first: bool,
    average: f64,
    current_sampling_percentage: f64,
    last_change_direction: ChangeDirection,
    last_changed_at: Instant,
}

pub struct AdaptiveSampler {
    sampler: FixedRateSampler,
    settings: AdaptiveSettings,
    // items kept since the last evaluation
    counter: AtomicU64,
    evaluator: Mutex<Evaluator>,
    timer: Mutex<Option<PeriodicTask>>,
}

impl AdaptiveSampler {
    pub fn new(settings: AdaptiveSettings) -> Self {
        Self::with_sampler(settings, FixedRateSampler::default())
    }

    /// Wraps an already configured sampler (type lists, overrides). Its percentage is reset to
    /// the initial sampling percentage.
    pub fn with_sampler(mut settings: AdaptiveSettings, sampler: FixedRateSampler) -> Self {
        if settings.evaluation_interval.is_zero() {
            log::warn!("adaptive sampling evaluation interval is zero, using one second");
            settings.evaluation_interval = Duration::from_secs(1);
        }

        sampler.set_sampling_percentage(settings.initial_sampling_percentage);
        let evaluator = Evaluator {
            first: true,
            average: 0.0,
            current_sampling_percentage: sampler.sampling_percentage(),
            last_change_direction: ChangeDirection::None,
            last_changed_at: Instant::now(),
        };

        AdaptiveSampler {
            sampler,
            settings,
            counter: AtomicU64::new(0),
            evaluator: Mutex::new(evaluator),
            timer: Mutex::new(None),
        }
    }

    /// Starts evaluating on a background thread, once per evaluation interval. The thread only
    /// holds a weak reference and exits on its own once the sampler is dropped.
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(self);
        *timer = Some(PeriodicTask::spawn(
            "adaptive-sampling-evaluator",
            self.settings.evaluation_interval,
            move || match weak.upgrade() {
                Some(sampler) => {
                    sampler.evaluate();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            },
        )?);
        Ok(())
    }

    pub fn stop(&self, timeout: Duration) -> Result<(), Error> {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match timer {
            Some(timer) => timer.stop(timeout),
            None => Ok(()),
        }
    }

    pub fn settings(&self) -> &AdaptiveSettings {
        &self.settings
    }

    pub fn fixed_rate_sampler(&self) -> &FixedRateSampler {
        &self.sampler
    }

    pub fn sampling_percentage(&self) -> f64 {
        self.sampler.sampling_percentage()
    }

    pub fn last_change_direction(&self) -> ChangeDirection {
        self.evaluator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_change_direction
    }

    pub fn is_sampled_in(&self, item: &mut TelemetryItem) -> bool {
        if self.sampler.is_sampled_in(item) {
            self.counter.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Runs one evaluation tick now.
    pub fn evaluate(&self) {
        self.evaluate_at(Instant::now());
    }

    fn evaluate_at(&self, now: Instant) {
        let mut evaluator = self.evaluator.lock().unwrap_or_else(PoisonError::into_inner);
        let settings = &self.settings;

        let kept = self.counter.swap(0, Ordering::AcqRel);
        let telemetries_per_second = kept as f64 / settings.evaluation_interval.as_secs_f64();
        if evaluator.first {
            evaluator.first = false;
            evaluator.average = telemetries_per_second;
        } else {
            evaluator.average = evaluator.average * (1.0 - settings.moving_average_ratio)
                + telemetries_per_second * settings.moving_average_ratio;
        }
        log::trace!("average for sampling is {}", evaluator.average);

        let max = settings.max_telemetries_per_second;
        let mut suggested = if evaluator.average > max {
            100.0 - (evaluator.average - max) * 100.0 / max
        } else {
            100.0
        };
        if suggested > settings.max_sampling_percentage {
            suggested = settings.max_sampling_percentage;
        }
        if suggested < settings.min_sampling_percentage {
            suggested = settings.min_sampling_percentage;
        }

        if suggested == evaluator.current_sampling_percentage {
            return;
        }

        let since_last_change = now
            .saturating_duration_since(evaluator.last_changed_at)
            .as_secs();
        let (direction, timeout) = if suggested > evaluator.current_sampling_percentage {
            (
                ChangeDirection::Up,
                settings.sampling_percentage_increase_timeout,
            )
        } else {
            (
                ChangeDirection::Down,
                settings.sampling_percentage_decrease_timeout,
            )
        };

        if evaluator.last_change_direction != direction || since_last_change >= timeout.as_secs()
        {
            log::debug!(
                "updating sampling percentage from {} to {}",
                evaluator.current_sampling_percentage,
                suggested
            );
            evaluator.current_sampling_percentage = suggested;
            evaluator.last_change_direction = direction;
            evaluator.last_changed_at = now;
            self.sampler.set_sampling_percentage(suggested);
        }
    }
}

impl TelemetrySampler for AdaptiveSampler {
    fn is_sampled_in(&self, item: &mut TelemetryItem) -> bool {
        AdaptiveSampler::is_sampled_in(self, item)
    }

    fn sampling_percentage(&self) -> f64 {
        AdaptiveSampler::sampling_percentage(self)
    }

    fn stop(&self, timeout: Duration) -> Result<(), Error> {
        AdaptiveSampler::stop(self, timeout)
    }
}

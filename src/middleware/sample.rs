use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;

use crate::middleware::{Middleware, Overloaded};
use crate::sampling::TelemetrySampler;
use crate::types::TelemetryItem;

/// How long `join` waits for a sampler's background evaluation to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards only the items the sampler keeps. Kept items carry the percentage they were sampled
/// at, so steps further down can weight them.
pub struct Sample<M> {
    sampler: Arc<dyn TelemetrySampler>,
    next: M,
}

impl<M> Sample<M>
where
    M: Middleware,
{
    pub fn new(sampler: Arc<dyn TelemetrySampler>, next: M) -> Self {
        Sample { sampler, next }
    }
}

impl<M> Middleware for Sample<M>
where
    M: Middleware,
{
    fn join(&mut self) -> Result<(), Error> {
        let stopped = self.sampler.stop(STOP_TIMEOUT);
        self.next.join()?;
        stopped
    }

    fn poll(&mut self) -> Result<(), Overloaded> {
        self.next.poll()
    }

    fn submit(&mut self, mut item: TelemetryItem) -> Result<(), Overloaded> {
        if self.sampler.is_sampled_in(&mut item) {
            self.next.submit(item)
        } else {
            log::trace!("dropping {} not sampled in", item.ty());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::sampling::{AdaptiveSampler, AdaptiveSettings, FixedRateSampler};
    use crate::testutils::FnStep;

    #[test]
    fn basic() {
        let results = RefCell::new(vec![]);
        let next = FnStep(|item| {
            results.borrow_mut().push(item);
            Ok(())
        });
        let mut sample = Sample::new(Arc::new(FixedRateSampler::new(50.0)), next);

        // "abc" scores below 50, "user-1" above
        sample
            .submit(TelemetryItem::exception("k", "E").with_user_id("abc"))
            .unwrap();
        sample
            .submit(TelemetryItem::exception("k", "E").with_user_id("user-1"))
            .unwrap();

        let results = results.borrow();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].user_id.as_deref(), Some("abc"));
        assert_eq!(results[0].sampling_percentage(), Some(50.0));
    }

    #[test]
    fn overloaded_next_hands_item_back() {
        let next = FnStep(|item| Err(Overloaded { item: Some(item) }));
        let mut sample = Sample::new(Arc::new(FixedRateSampler::default()), next);

        let overloaded = sample
            .submit(TelemetryItem::exception("k", "E").with_user_id("abc"))
            .unwrap_err();
        let item = overloaded.item.unwrap();
        assert_eq!(item.user_id.as_deref(), Some("abc"));
    }

    #[test]
    fn join_stops_adaptive_sampler() {
        let sampler = Arc::new(AdaptiveSampler::new(AdaptiveSettings {
            evaluation_interval: Duration::from_millis(10),
            ..AdaptiveSettings::default()
        }));
        sampler.start().unwrap();

        let mut sample = Sample::new(sampler.clone(), FnStep(|_| Ok(())));
        sample.submit(TelemetryItem::exception("k", "E")).unwrap();
        sample.join().unwrap();

        // the evaluator is gone, so the percentage stays put
        sampler.fixed_rate_sampler().set_sampling_percentage(42.0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sampler.sampling_percentage(), 42.0);
    }
}

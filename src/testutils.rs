use crate::middleware::{Middleware, Overloaded};
use crate::types::TelemetryItem;

pub struct FnStep<F>(pub F);

impl<F> Middleware for FnStep<F>
where
    F: FnMut(TelemetryItem) -> Result<(), Overloaded>,
{
    fn submit(&mut self, item: TelemetryItem) -> Result<(), Overloaded> {
        (self.0)(item)
    }
}

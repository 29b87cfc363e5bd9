//! Field harvesting processor

use crate::class::{Class, RESERVED_PREFIX};
use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};

use super::{Phase, Processor};

/// Resolves the field table and stores it on the class. Field names under
/// the reserved prefix would collide with generated internals, so they are
/// rejected outright.
pub struct FieldsProcessor;

impl Processor for FieldsProcessor {
    fn name(&self) -> &'static str {
        "fields"
    }

    fn phase(&self) -> Phase {
        Phase::Bootstrap
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        let fields = ctx.item::<ClassFields>()?;
        for f in &fields.0 {
            if f.name.starts_with(RESERVED_PREFIX) {
                return Err(Error::Spec(format!(
                    "field name {:?} uses the reserved prefix {:?}",
                    f.name, RESERVED_PREFIX
                )));
            }
        }
        cls.data_mut().fields = Some(fields.0.clone());
        tracing::debug!(class = %cls.name(), fields = fields.0.len(), "harvested");
        Ok(cls)
    }
}

//! `__match_args__` synthesis
//!
//! A tuple of the positional init parameter names, in the exact order the
//! generated `__init__` takes them. An existing class-body entry wins.

use crate::class::Class;
use crate::context::{InitFields, ProcessingContext};
use crate::error::Result;
use crate::value::Value;

use super::{Phase, Processor};

pub struct MatchArgsProcessor;

impl Processor for MatchArgsProcessor {
    fn name(&self) -> &'static str {
        "match_args"
    }

    fn phase(&self) -> Phase {
        Phase::PostGeneration
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        if !ctx.cs.params.match_args {
            return Ok(cls);
        }
        let init_fields = ctx.item::<InitFields>()?;
        let names: Vec<Value> = init_fields
            .0
            .iter()
            .filter(|f| !f.kw_only)
            .map(|f| Value::str(f.name.clone()))
            .collect();
        cls.set_new("__match_args__", Value::tuple(names));
        Ok(cls)
    }
}

//! Slots installation
//!
//! Installs `__slots__` for this class's own stored fields, excluding names
//! already slotted by an ancestor, appending the weakref slot and the
//! hash-cache slot when those features are on. Field defaults leave the
//! namespace at the same time; with slots there is no attribute fallback
//! for them to serve.

use std::collections::BTreeSet;

use crate::class::{Class, HASH_CACHE_ATTR};
use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};

use super::{Phase, Processor};

pub const WEAKREF_SLOT: &str = "__weakref__";

pub struct SlotsProcessor;

impl Processor for SlotsProcessor {
    fn name(&self) -> &'static str {
        "slots"
    }

    fn phase(&self) -> Phase {
        Phase::Slots
    }

    fn check(&self, ctx: &ProcessingContext) -> Result<()> {
        if ctx.cs.params.weakref_slot && !ctx.cs.params.slots {
            return Err(Error::Spec("weakref_slot requires slots".into()));
        }
        if ctx.cs.params.slots && ctx.cls.slots().is_some() {
            return Err(Error::Type(format!(
                "{} already specifies __slots__",
                ctx.cls.name()
            )));
        }
        Ok(())
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        if !ctx.cs.params.slots {
            return Ok(cls);
        }
        let fields = ctx.item::<ClassFields>()?;
        let inherited: BTreeSet<String> = cls
            .mro()
            .iter()
            .skip(1)
            .filter_map(Class::slots)
            .flatten()
            .collect();

        let mut slots: Vec<String> = fields
            .0
            .iter()
            .filter(|f| f.stored() && !inherited.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();
        if ctx.cs.params.weakref_slot {
            slots.push(WEAKREF_SLOT.into());
        }
        if ctx.cs.extras.cache_hash {
            slots.push(HASH_CACHE_ATTR.into());
        }

        for f in fields.0.iter().filter(|f| f.stored()) {
            cls.remove(&f.name);
        }
        cls.data_mut().slots = Some(slots);
        Ok(cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{standard_items, Options};
    use crate::spec::{ClassParams, ClassSpec};
    use crate::value::Value;
    use std::rc::Rc;

    fn ctx_for(cls: Class, params: ClassParams) -> ProcessingContext {
        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.params = params;
        ProcessingContext::new(cls, Rc::new(cs), Options::new(), standard_items().unwrap())
    }

    #[test]
    fn test_slots_exclude_inherited_and_drop_defaults() {
        let base = Class::new("B");
        base.data_mut().slots = Some(vec!["x".into()]);
        let cls = Class::builder("C")
            .base(base)
            .annotation("x", "int")
            .annotation("y", "str")
            .attr("y", Value::str("d"))
            .build();
        let params = ClassParams {
            slots: true,
            ..Default::default()
        };
        let ctx = ctx_for(cls.clone(), params);
        SlotsProcessor.process(&ctx, cls.clone()).unwrap();
        assert_eq!(cls.slots().unwrap(), vec!["y".to_string()]);
        assert!(cls.own("y").is_none());
    }

    #[test]
    fn test_weakref_and_preexisting_slots_checks() {
        let cls = Class::new("C");
        let params = ClassParams {
            weakref_slot: true,
            slots: false,
            ..Default::default()
        };
        assert!(SlotsProcessor.check(&ctx_for(cls, params)).is_err());

        let cls = Class::new("C");
        cls.data_mut().slots = Some(vec![]);
        let params = ClassParams {
            slots: true,
            ..Default::default()
        };
        assert!(SlotsProcessor.check(&ctx_for(cls, params)).is_err());
    }

    #[test]
    fn test_weakref_slot_appended() {
        let cls = Class::builder("C").annotation("x", "int").build();
        let params = ClassParams {
            slots: true,
            weakref_slot: true,
            ..Default::default()
        };
        let ctx = ctx_for(cls.clone(), params);
        SlotsProcessor.process(&ctx, cls.clone()).unwrap();
        assert_eq!(
            cls.slots().unwrap(),
            vec!["x".to_string(), WEAKREF_SLOT.to_string()]
        );
    }
}

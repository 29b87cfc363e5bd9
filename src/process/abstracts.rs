//! Abstract-method bookkeeping
//!
//! Generation may have satisfied (or introduced) abstract names; the final
//! step recomputes the class's abstract set so construction rejects exactly
//! the classes that still have unimplemented stubs.

use crate::class::Class;
use crate::context::ProcessingContext;
use crate::error::Result;

use super::{Phase, Processor};

pub struct AbstractProcessor;

impl Processor for AbstractProcessor {
    fn name(&self) -> &'static str {
        "abstracts"
    }

    fn phase(&self) -> Phase {
        Phase::Finalize
    }

    fn process(&self, _ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        cls.update_abstract_methods();
        Ok(cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::method;
    use crate::context::{standard_items, Options};
    use crate::spec::ClassSpec;
    use crate::value::{FnValue, Value};
    use std::rc::Rc;

    #[test]
    fn test_abstract_set_recomputed() {
        let base = Class::builder("B")
            .attr("run", Value::Fn(FnValue::new_abstract("run")))
            .build();
        let cls = Class::builder("C")
            .base(base)
            .attr("run", method("run", |_| Ok(Value::None)))
            .build();
        let ctx = ProcessingContext::new(
            cls.clone(),
            Rc::new(ClassSpec::with_defaults(vec![]).unwrap()),
            Options::new(),
            standard_items().unwrap(),
        );
        AbstractProcessor.process(&ctx, cls.clone()).unwrap();
        assert!(cls.data().abstract_methods.is_empty());
    }
}

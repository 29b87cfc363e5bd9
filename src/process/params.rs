//! Class-params invariants
//!
//! Cross-class checks that field harvesting cannot see: frozen and
//! non-frozen dataclasses do not mix in one inheritance chain, and a class
//! that already went through the transform is not transformed again unless
//! the spec opts in. Ends by snapshotting the params onto the class so
//! subclasses can run the same checks against it.

use crate::class::Class;
use crate::context::ProcessingContext;
use crate::error::{Error, Result};

use super::{Phase, Processor};

pub struct ParamsProcessor;

impl Processor for ParamsProcessor {
    fn name(&self) -> &'static str {
        "params"
    }

    fn phase(&self) -> Phase {
        Phase::Bootstrap
    }

    fn priority(&self) -> i32 {
        10
    }

    fn check(&self, ctx: &ProcessingContext) -> Result<()> {
        if ctx.cls.params().is_some() && !ctx.cs.extras.allow_redundant_decorator {
            return Err(Error::Type(format!(
                "{} has already been transformed",
                ctx.cls.name()
            )));
        }
        Ok(())
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        let frozen = ctx.cs.params.frozen;
        for base in cls.mro().iter().skip(1) {
            let base_params = match base.params() {
                Some(p) => p,
                None => continue,
            };
            if base_params.frozen && !frozen {
                return Err(Error::Type(format!(
                    "cannot inherit non-frozen dataclass {} from a frozen one ({})",
                    cls.name(),
                    base.name()
                )));
            }
            if !base_params.frozen && frozen {
                return Err(Error::Type(format!(
                    "cannot inherit frozen dataclass {} from a non-frozen one ({})",
                    cls.name(),
                    base.name()
                )));
            }
        }
        cls.data_mut().params = Some(ctx.cs.params);
        Ok(cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{standard_items, Options};
    use crate::spec::{ClassParams, ClassSpec};
    use std::rc::Rc;

    fn ctx_for(cls: Class, params: ClassParams) -> ProcessingContext {
        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.params = params;
        ProcessingContext::new(cls, Rc::new(cs), Options::new(), standard_items().unwrap())
    }

    #[test]
    fn test_frozen_inheritance_rules() {
        let frozen_base = Class::new("FB");
        frozen_base.data_mut().params = Some(ClassParams {
            frozen: true,
            ..Default::default()
        });
        let child = Class::builder("C").base(frozen_base.clone()).build();
        let ctx = ctx_for(child.clone(), ClassParams::default());
        assert!(ParamsProcessor.process(&ctx, child).is_err());

        let plain_base = Class::new("PB");
        plain_base.data_mut().params = Some(ClassParams::default());
        let child = Class::builder("C").base(plain_base).build();
        let ctx = ctx_for(
            child.clone(),
            ClassParams {
                frozen: true,
                ..Default::default()
            },
        );
        assert!(ParamsProcessor.process(&ctx, child).is_err());

        // frozen over frozen is fine
        let child = Class::builder("C").base(frozen_base).build();
        let params = ClassParams {
            frozen: true,
            ..Default::default()
        };
        let ctx = ctx_for(child.clone(), params);
        ParamsProcessor.process(&ctx, child.clone()).unwrap();
        assert!(child.params().unwrap().frozen);
    }

    #[test]
    fn test_redundant_transform_rejected() {
        let cls = Class::new("C");
        cls.data_mut().params = Some(ClassParams::default());
        let ctx = ctx_for(cls, ClassParams::default());
        assert!(ParamsProcessor.check(&ctx).is_err());
    }
}

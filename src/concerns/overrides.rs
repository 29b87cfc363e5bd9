//! Override-property generation
//!
//! An override field is reached through a generated property: the getter
//! reads the instance dict directly, the setter (absent on frozen classes)
//! writes it. Generated `__init__` stores override fields with dict writes,
//! bypassing the property. Slots classes have no instance dict to back the
//! property, so override plus slots is rejected.

use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::MethodBody;
use crate::generate::{
    ConcernPlan, Generator, IfPresent, Op, OverrideFieldPlan, OverridesPlan, PlanResult, RefMap,
};

pub struct OverridesGenerator;

impl Generator for OverridesGenerator {
    fn concern(&self) -> &'static str {
        "overrides"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        let fields = ctx.item::<ClassFields>()?;
        let class_wide = ctx.cs.extras.override_;
        let targets: Vec<_> = fields
            .0
            .iter()
            .filter(|f| f.stored() && (class_wide || f.extras.override_))
            .collect();
        if targets.is_empty() {
            return Ok(None);
        }
        if ctx.cs.params.slots {
            return Err(Error::Spec(format!(
                "{}: override fields are incompatible with slots",
                ctx.cls.name()
            )));
        }
        let settable = !ctx.cs.params.frozen;
        Ok(Some(PlanResult {
            plan: ConcernPlan::Overrides(OverridesPlan {
                fields: targets
                    .iter()
                    .map(|f| OverrideFieldPlan {
                        name: f.name.clone(),
                        settable,
                    })
                    .collect(),
            }),
            refs: RefMap::new(),
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let overrides = match plan {
            ConcernPlan::Overrides(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "overrides generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(overrides
            .fields
            .iter()
            .map(|f| Op::AddProperty {
                name: f.name.clone(),
                getter: MethodBody::DictGetter {
                    field: f.name.clone(),
                },
                setter: f.settable.then(|| MethodBody::DictSetter {
                    field: f.name.clone(),
                }),
                refs: vec![],
                if_present: IfPresent::Replace,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::context::{standard_items, Options};
    use crate::spec::{ClassSpec, FieldSpec};
    use std::rc::Rc;

    fn ctx_for(cls: Class, cs: ClassSpec) -> ProcessingContext {
        ProcessingContext::new(cls, Rc::new(cs), Options::new(), standard_items().unwrap())
    }

    #[test]
    fn test_no_override_fields_declines() {
        let cls = Class::builder("C").annotation("a", "int").build();
        let ctx = ctx_for(cls, ClassSpec::with_defaults(vec![]).unwrap());
        assert!(OverridesGenerator.plan(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_frozen_override_property_has_no_setter() {
        let cls = Class::builder("C").annotation("a", "int").build();
        let fields = vec![FieldSpec::builder("a", "int")
            .override_(true)
            .build()
            .unwrap()];
        let mut cs = ClassSpec::with_defaults(fields).unwrap();
        cs.params.frozen = true;
        let ctx = ctx_for(cls, cs);
        let result = OverridesGenerator.plan(&ctx).unwrap().unwrap();
        let ops = OverridesGenerator.lower(&result.plan).unwrap();
        match &ops[0] {
            Op::AddProperty { setter, .. } => assert!(setter.is_none()),
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_override_with_slots_rejected() {
        let cls = Class::builder("C").annotation("a", "int").build();
        let fields = vec![FieldSpec::builder("a", "int")
            .override_(true)
            .build()
            .unwrap()];
        let mut cs = ClassSpec::with_defaults(fields).unwrap();
        cs.params.slots = true;
        let ctx = ctx_for(cls, cs);
        assert!(OverridesGenerator.plan(&ctx).is_err());
    }
}

//! `__copy__` generation
//!
//! Reconstructs through the generated constructor with keyword arguments,
//! so every init-time coercion and check runs again on the copy. Subclass
//! instances are rejected at call time (their fields may not round-trip
//! through this class's signature). A defaultless init-var makes faithful
//! reconstruction impossible, so the concern declines.

use crate::context::{ClassFields, InitFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::MethodBody;
use crate::generate::{cls_ref, ConcernPlan, CopyPlan, Generator, IfPresent, Op, PlanResult};
use crate::spec::FieldKind;

use super::{own_defines, refs_with_cls};

pub struct CopyGenerator;

impl Generator for CopyGenerator {
    fn concern(&self) -> &'static str {
        "copy"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        if own_defines(&ctx.cls, "__copy__") {
            return Ok(None);
        }
        let init_fields = ctx.item::<InitFields>()?;
        if init_fields
            .0
            .iter()
            .any(|f| f.kind == FieldKind::InitVar && f.default.is_missing())
        {
            return Ok(None);
        }
        let all_fields = ctx.item::<ClassFields>()?;
        let init_params: Vec<String> = init_fields
            .0
            .iter()
            .filter(|f| f.stored())
            .map(|f| f.name.clone())
            .collect();
        let extra_fields: Vec<String> = all_fields
            .0
            .iter()
            .filter(|f| f.stored() && !f.in_init())
            .map(|f| f.name.clone())
            .collect();
        Ok(Some(PlanResult {
            plan: ConcernPlan::Copy(CopyPlan {
                init_params,
                extra_fields,
            }),
            refs: refs_with_cls(&ctx.cls)?,
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let copy = match plan {
            ConcernPlan::Copy(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "copy generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(vec![Op::AddMethod {
            name: "__copy__".into(),
            body: MethodBody::Copy(copy.clone()),
            refs: vec![cls_ref()],
            if_present: IfPresent::Skip,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::context::{standard_items, Options};
    use crate::spec::{ClassSpec, FieldSpec};
    use crate::value::Value;
    use std::rc::Rc;

    fn plan_for(cls: Class, cs: ClassSpec) -> Option<CopyPlan> {
        let ctx =
            ProcessingContext::new(cls, Rc::new(cs), Options::new(), standard_items().unwrap());
        match CopyGenerator.plan(&ctx).unwrap() {
            Some(PlanResult {
                plan: ConcernPlan::Copy(p),
                ..
            }) => Some(p),
            Some(_) => panic!("wrong plan variant"),
            None => None,
        }
    }

    #[test]
    fn test_kwargs_from_stored_init_fields() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("iv", "InitVar[int]")
            .attr("iv", Value::Int(0))
            .build();
        let plan = plan_for(cls, ClassSpec::with_defaults(vec![]).unwrap()).unwrap();
        assert_eq!(plan.init_params, vec!["a".to_string()]);
        assert!(plan.extra_fields.is_empty());
    }

    #[test]
    fn test_declines_on_defaultless_initvar() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("iv", "InitVar[int]")
            .build();
        assert!(plan_for(cls, ClassSpec::with_defaults(vec![]).unwrap()).is_none());
    }

    #[test]
    fn test_init_excluded_fields_copied_directly() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("b", "int")
            .attr("b", Value::Int(1))
            .build();
        let fields = vec![FieldSpec::builder("b", "int")
            .init(false)
            .default_value(Value::Int(1))
            .build()
            .unwrap()];
        let plan = plan_for(cls, ClassSpec::with_defaults(fields).unwrap()).unwrap();
        assert_eq!(plan.init_params, vec!["a".to_string()]);
        assert_eq!(plan.extra_fields, vec!["b".to_string()]);
    }
}

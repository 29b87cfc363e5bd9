//! `__repr__` generation

use crate::context::{ClassFields, InitFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::MethodBody;
use crate::generate::{
    ConcernPlan, Generator, IfPresent, Op, OpRef, PlanResult, RefMap, ReprFieldPlan, ReprPlan,
};
use crate::reflect::StdField;
use crate::value::Value;

use super::own_defines;

pub struct ReprGenerator;

impl Generator for ReprGenerator {
    fn concern(&self) -> &'static str {
        "repr"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        if !ctx.cs.params.repr || own_defines(&ctx.cls, "__repr__") {
            return Ok(None);
        }

        // Terse mode renders in init order with positional fields bare;
        // otherwise declared order with `name=` throughout.
        let terse = ctx.cs.extras.terse_repr;
        let mut candidates: Vec<StdField> = if terse {
            ctx.item::<InitFields>()?.0.clone()
        } else {
            ctx.item::<ClassFields>()?.0.clone()
        };
        candidates.retain(|f| f.stored() && f.repr);

        // Priority ordering is stable, so unprioritized fields keep their
        // relative positions.
        candidates.sort_by_key(|f| f.extras.repr_priority.unwrap_or(0));

        let mut refs = RefMap::new();
        let mut fields = Vec::with_capacity(candidates.len());
        for (i, f) in candidates.iter().enumerate() {
            let repr_fn = f
                .extras
                .repr_fn
                .clone()
                .or_else(|| ctx.cs.extras.default_repr_fn.clone());
            let fn_ref = match repr_fn {
                None => None,
                Some(func) => {
                    let r = OpRef::new(format!("repr.fields.{i}.fn"));
                    refs.insert(r.clone(), Value::Fn(func))?;
                    Some(r)
                }
            };
            fields.push(ReprFieldPlan {
                name: f.name.clone(),
                positional: terse && !f.kw_only,
                fn_ref,
            });
        }

        Ok(Some(PlanResult {
            plan: ConcernPlan::Repr(ReprPlan {
                fields,
                with_id: ctx.cs.extras.repr_id,
            }),
            refs,
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let repr = match plan {
            ConcernPlan::Repr(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "repr generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        let refs = repr.fields.iter().filter_map(|f| f.fn_ref.clone()).collect();
        Ok(vec![Op::AddMethod {
            name: "__repr__".into(),
            body: MethodBody::Repr(repr.clone()),
            refs,
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
    use crate::value::FnValue;
    use std::rc::Rc;

    fn plan_for(cls: Class, cs: ClassSpec) -> Option<ReprPlan> {
        let ctx =
            ProcessingContext::new(cls, Rc::new(cs), Options::new(), standard_items().unwrap());
        match ReprGenerator.plan(&ctx).unwrap() {
            Some(PlanResult {
                plan: ConcernPlan::Repr(p),
                ..
            }) => Some(p),
            Some(_) => panic!("wrong plan variant"),
            None => None,
        }
    }

    #[test]
    fn test_repr_false_fields_omitted() {
        let cls = Class::builder("C")
            .annotation("shown", "int")
            .annotation("hidden", "int")
            .annotation("iv", "InitVar[int]")
            .build();
        let fields = vec![FieldSpec::builder("hidden", "int")
            .repr(false)
            .build()
            .unwrap()];
        let plan = plan_for(cls, ClassSpec::with_defaults(fields).unwrap()).unwrap();
        let names: Vec<_> = plan.fields.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["shown"]);
    }

    #[test]
    fn test_priority_ordering_is_stable() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("b", "int")
            .annotation("c", "int")
            .build();
        let fields = vec![FieldSpec::builder("c", "int")
            .repr_priority(-1)
            .build()
            .unwrap()];
        let plan = plan_for(cls, ClassSpec::with_defaults(fields).unwrap()).unwrap();
        let names: Vec<_> = plan.fields.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn test_terse_mode_marks_positional() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("b", "int")
            .build();
        let fields = vec![FieldSpec::builder("b", "int")
            .kw_only(Some(true))
            .build()
            .unwrap()];
        let mut cs = ClassSpec::with_defaults(fields).unwrap();
        cs.extras.terse_repr = true;
        let plan = plan_for(cls, cs).unwrap();
        assert!(plan.fields[0].positional);
        assert!(!plan.fields[1].positional);
    }

    #[test]
    fn test_default_repr_fn_applies_to_all_fields() {
        let cls = Class::builder("C").annotation("a", "int").build();
        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.extras.default_repr_fn = Some(FnValue::new("short", |args| {
            Ok(Value::str(args.arg(0)?.repr()))
        }));
        let plan = plan_for(cls, cs).unwrap();
        assert!(plan.fields[0].fn_ref.is_some());
    }
}

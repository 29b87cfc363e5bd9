//! `__init__` generation
//!
//! The widest concern: the signature comes from the init-field ordering item
//! (keyword-only fields after the `*`, reorder already applied), and each
//! field's body steps follow the fixed pipeline: default resolution,
//! coercion, type check, predicate, storage. Storage picks the write path
//! the rest of the generated class requires: dict writes for override
//! fields, hook-bypassing raw writes for frozen classes, ordinary attribute
//! writes otherwise.

use crate::class::POST_INIT_NAME;
use crate::context::{ClassFields, InitFields, Inspection, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::MethodBody;
use crate::generate::{
    CheckTypePlan, CoercePlan, ConcernPlan, DefaultPlan, Generator, IfPresent, InitFieldPlan,
    InitPlan, Op, OpRef, PlanResult, PostSetPlan, RefMap, StorePlan, ValidateFnPlan,
};
use crate::reflect::StdField;
use crate::spec::{Coerce, FieldDefault, FieldKind, TypeCheck};
use crate::value::Value;

use super::own_defines;

pub struct InitGenerator;

/// The storage path for one field's value
fn store_for(f: &StdField, ctx: &ProcessingContext) -> StorePlan {
    if f.kind == FieldKind::InitVar {
        StorePlan::Skip
    } else if f.extras.override_ || ctx.cs.extras.override_ {
        StorePlan::DictSet
    } else if ctx.cs.params.frozen {
        StorePlan::RawSet
    } else {
        StorePlan::SetAttr
    }
}

/// The annotation generation works from: the declared one, or its
/// type-var-concretized form under `generic_init`.
fn effective_annotation(
    f: &StdField,
    ctx: &ProcessingContext,
) -> Result<crate::annotations::Annotation> {
    if ctx.cs.extras.generic_init {
        let insp = ctx.item::<Inspection>()?;
        if let Some(ann) = insp.0.generic_replaced_annotations.get(&f.name) {
            return Ok(ann.clone());
        }
    }
    Ok(f.annotation.clone())
}

fn builtin_name(ann: &crate::annotations::Annotation, field: &str) -> Result<String> {
    ann.builtin_type()
        .map(|t| t.name())
        .ok_or_else(|| {
            Error::Spec(format!(
                "field {field:?}: annotation {:?} names no checkable builtin type",
                ann.expr
            ))
        })
}

fn plan_field(
    i: usize,
    f: &StdField,
    ctx: &ProcessingContext,
    refs: &mut RefMap,
) -> Result<InitFieldPlan> {
    let prefix = format!("init.fields.{i}");
    let ann = effective_annotation(f, ctx)?;

    let default = match &f.default {
        FieldDefault::Missing => DefaultPlan::Missing,
        FieldDefault::Value(v) => {
            let r = OpRef::new(format!("{prefix}.default"));
            refs.insert(r.clone(), v.clone())?;
            DefaultPlan::Value { r#ref: r }
        }
        FieldDefault::Factory(factory) => {
            let r = OpRef::new(format!("{prefix}.default_factory"));
            refs.insert(r.clone(), Value::Fn(factory.clone()))?;
            DefaultPlan::Factory { r#ref: r }
        }
    };

    let coerce = match &f.extras.coerce {
        Coerce::Off => None,
        Coerce::ToAnnotation => Some(CoercePlan::ToType {
            type_name: builtin_name(&ann, &f.name)?,
        }),
        Coerce::Fn(func) => {
            let r = OpRef::new(format!("{prefix}.coerce"));
            refs.insert(r.clone(), Value::Fn(func.clone()))?;
            Some(CoercePlan::Fn { r#ref: r })
        }
    };

    let check_type = match &f.extras.check_type {
        TypeCheck::Off => None,
        TypeCheck::Annotation => Some(CheckTypePlan::Type {
            type_name: builtin_name(&ann, &f.name)?,
        }),
        TypeCheck::Types(types) => {
            let mut type_refs = Vec::with_capacity(types.len());
            for (j, t) in types.iter().enumerate() {
                let r = OpRef::new(format!("{prefix}.check_type.{j}"));
                refs.insert(r.clone(), Value::Type(t.clone()))?;
                type_refs.push(r);
            }
            Some(CheckTypePlan::Types { refs: type_refs })
        }
    };

    let validate = match &f.extras.validate {
        None => None,
        Some(func) => {
            let r = OpRef::new(format!("{prefix}.validate"));
            refs.insert(r.clone(), Value::Fn(func.clone()))?;
            Some(r)
        }
    };

    Ok(InitFieldPlan {
        name: f.name.clone(),
        annotation: ann.expr,
        kw_only: f.kw_only,
        init_var: f.kind == FieldKind::InitVar,
        default,
        coerce,
        check_type,
        validate,
        store: store_for(f, ctx),
    })
}

/// Every ref an init plan mentions, for the op's ref list
pub(crate) fn plan_refs(plan: &InitPlan) -> Vec<OpRef> {
    let mut out = Vec::new();
    for f in &plan.fields {
        match &f.default {
            DefaultPlan::Missing => {}
            DefaultPlan::Value { r#ref } | DefaultPlan::Factory { r#ref } => {
                out.push(r#ref.clone())
            }
        }
        if let Some(CoercePlan::Fn { r#ref }) = &f.coerce {
            out.push(r#ref.clone());
        }
        if let Some(CheckTypePlan::Types { refs }) = &f.check_type {
            out.extend(refs.iter().cloned());
        }
        if let Some(r) = &f.validate {
            out.push(r.clone());
        }
    }
    for p in &plan.post_sets {
        out.push(p.factory.clone());
    }
    out.extend(plan.init_fns.iter().cloned());
    out.extend(plan.validate_fns.iter().map(|v| v.r#ref.clone()));
    out
}

impl Generator for InitGenerator {
    fn concern(&self) -> &'static str {
        "init"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        if !ctx.cs.params.init || own_defines(&ctx.cls, "__init__") {
            return Ok(None);
        }
        let init_fields = ctx.item::<InitFields>()?;
        let all_fields = ctx.item::<ClassFields>()?;
        let mut refs = RefMap::new();

        let mut fields = Vec::with_capacity(init_fields.0.len());
        for (i, f) in init_fields.0.iter().enumerate() {
            fields.push(plan_field(i, f, ctx, &mut refs)?);
        }

        // Init-excluded fields with a factory default still get set in the
        // body; plain-value defaults stay as class attributes.
        let mut post_sets = Vec::new();
        for f in all_fields.0.iter().filter(|f| f.stored() && !f.init) {
            if let FieldDefault::Factory(factory) = &f.default {
                let r = OpRef::new(format!("init.post_sets.{}.factory", post_sets.len()));
                refs.insert(r.clone(), Value::Fn(factory.clone()))?;
                post_sets.push(PostSetPlan {
                    name: f.name.clone(),
                    factory: r,
                    store: store_for(f, ctx),
                });
            }
        }

        let post_init = matches!(ctx.cls.lookup(POST_INIT_NAME), Some(Value::Fn(_)));
        let post_init_params: Vec<String> = init_fields
            .0
            .iter()
            .filter(|f| f.kind == FieldKind::InitVar)
            .map(|f| f.name.clone())
            .collect();

        let mut init_fns = Vec::with_capacity(ctx.cs.init_fns.len());
        for (i, func) in ctx.cs.init_fns.iter().enumerate() {
            let r = OpRef::new(format!("init.fns.{i}"));
            refs.insert(r.clone(), Value::Fn(func.clone()))?;
            init_fns.push(r);
        }
        let mut validate_fns = Vec::with_capacity(ctx.cs.validate_fns.len());
        for (i, v) in ctx.cs.validate_fns.iter().enumerate() {
            let r = OpRef::new(format!("init.validate_fns.{i}"));
            refs.insert(r.clone(), Value::Fn(v.fn_.clone()))?;
            validate_fns.push(ValidateFnPlan {
                r#ref: r,
                params: v.params.clone(),
            });
        }

        Ok(Some(PlanResult {
            plan: ConcernPlan::Init(InitPlan {
                fields,
                post_sets,
                frozen: ctx.cs.params.frozen,
                post_init,
                post_init_params,
                init_fns,
                validate_fns,
            }),
            refs,
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let init = match plan {
            ConcernPlan::Init(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "init generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(vec![Op::AddMethod {
            name: "__init__".into(),
            refs: plan_refs(init),
            body: MethodBody::Init(init.clone()),
            if_present: IfPresent::Skip,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::context::{standard_items, Options};
    use crate::spec::{ClassParams, ClassSpec, FieldSpec};
    use crate::value::FnValue;
    use std::rc::Rc;

    fn ctx_for(cls: Class, cs: ClassSpec) -> ProcessingContext {
        ProcessingContext::new(cls, Rc::new(cs), Options::new(), standard_items().unwrap())
    }

    fn plan_for(ctx: &ProcessingContext) -> Option<InitPlan> {
        match InitGenerator.plan(ctx).unwrap() {
            Some(PlanResult {
                plan: ConcernPlan::Init(p),
                ..
            }) => Some(p),
            Some(_) => panic!("wrong plan variant"),
            None => None,
        }
    }

    #[test]
    fn test_declines_without_init_switch_or_with_own_method() {
        let cls = Class::builder("C").annotation("x", "int").build();
        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.params = ClassParams {
            init: false,
            ..Default::default()
        };
        assert!(plan_for(&ctx_for(cls, cs)).is_none());

        let cls = Class::builder("C")
            .annotation("x", "int")
            .attr("__init__", Value::Fn(FnValue::new("__init__", |_| Ok(Value::None))))
            .build();
        let cs = ClassSpec::with_defaults(vec![]).unwrap();
        assert!(plan_for(&ctx_for(cls, cs)).is_none());
    }

    #[test]
    fn test_default_becomes_ref() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("b", "int")
            .attr("b", Value::Int(7))
            .build();
        let ctx = ctx_for(cls, ClassSpec::with_defaults(vec![]).unwrap());
        let plan = plan_for(&ctx).unwrap();
        assert!(plan.fields[0].default.is_missing());
        assert!(matches!(
            &plan.fields[1].default,
            DefaultPlan::Value { r#ref } if r#ref.0 == "init.fields.1.default"
        ));
    }

    #[test]
    fn test_store_plans_follow_params() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("b", "InitVar[int]")
            .build();
        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.params.frozen = true;
        let plan = plan_for(&ctx_for(cls.clone(), cs)).unwrap();
        assert_eq!(plan.fields[0].store, StorePlan::RawSet);
        assert_eq!(plan.fields[1].store, StorePlan::Skip);
        assert!(plan.fields[1].init_var);

        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.extras.override_ = true;
        let plan = plan_for(&ctx_for(cls, cs)).unwrap();
        assert_eq!(plan.fields[0].store, StorePlan::DictSet);
    }

    #[test]
    fn test_post_init_detected_with_initvar_params() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("extra", "InitVar[str]")
            .attr(
                "__post_init__",
                Value::Fn(FnValue::new("__post_init__", |_| Ok(Value::None))),
            )
            .build();
        let plan = plan_for(&ctx_for(cls, ClassSpec::with_defaults(vec![]).unwrap())).unwrap();
        assert!(plan.post_init);
        assert_eq!(plan.post_init_params, vec!["extra".to_string()]);
    }

    #[test]
    fn test_init_excluded_factory_field_becomes_post_set() {
        let cls = Class::builder("C").annotation("xs", "list").build();
        let fields = vec![FieldSpec::builder("xs", "list")
            .init(false)
            .default_factory(FnValue::new("list", |_| Ok(Value::list(vec![]))))
            .build()
            .unwrap()];
        let plan = plan_for(&ctx_for(cls, ClassSpec::with_defaults(fields).unwrap())).unwrap();
        assert!(plan.fields.is_empty());
        assert_eq!(plan.post_sets.len(), 1);
        assert_eq!(plan.post_sets[0].name, "xs");
    }

    #[test]
    fn test_check_type_annotation_requires_builtin() {
        let cls = Class::builder("C").annotation("a", "Widget").build();
        let fields = vec![FieldSpec::builder("a", "Widget")
            .check_type(TypeCheck::Annotation)
            .build()
            .unwrap()];
        let ctx = ctx_for(cls, ClassSpec::with_defaults(fields).unwrap());
        assert!(InitGenerator.plan(&ctx).is_err());
    }
}

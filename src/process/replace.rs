//! `__replace__` synthesis
//!
//! A generic construct-a-modified-copy method: current field values merged
//! with keyword changes, fed back through the constructor. Class-vars are
//! not replaceable, init-excluded fields cannot be changed, and a
//! defaultless init-var must be supplied since its original value was never
//! stored.

use crate::class::Class;
use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::reflect::StdField;
use crate::spec::FieldKind;
use crate::value::{CallArgs, FnValue, Value};

use super::{Phase, Processor};

pub struct ReplaceProcessor;

fn replace_fn(cls: Class, fields: Vec<StdField>) -> FnValue {
    FnValue::new("__replace__", move |args: &CallArgs| {
        let inst = args.instance(0)?;
        let mut changes: std::collections::HashMap<String, Value> = args
            .kw
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut kw: Vec<(String, Value)> = Vec::new();
        for f in &fields {
            if f.kind == FieldKind::ClassVar {
                if changes.remove(&f.name).is_some() {
                    return Err(Error::Type(format!(
                        "class-var field {:?} cannot be replaced",
                        f.name
                    )));
                }
                continue;
            }
            let change = changes.remove(&f.name);
            if !f.init {
                if change.is_some() {
                    return Err(Error::Type(format!(
                        "field {:?} is declared with init=false, it cannot be replaced",
                        f.name
                    )));
                }
                continue;
            }
            match change {
                Some(v) => kw.push((f.name.clone(), v)),
                None => {
                    if f.kind == FieldKind::InitVar {
                        // Never stored; only a default can stand in for it
                        if f.default.is_missing() {
                            return Err(Error::Type(format!(
                                "init-var {:?} must be specified with replace",
                                f.name
                            )));
                        }
                    } else {
                        kw.push((f.name.clone(), inst.get_attr(&f.name)?));
                    }
                }
            }
        }
        if let Some(stray) = changes.keys().next() {
            return Err(Error::Type(format!(
                "replace got an unexpected field {stray:?}"
            )));
        }
        cls.call(CallArgs::keyword(kw))
    })
}

impl Processor for ReplaceProcessor {
    fn name(&self) -> &'static str {
        "replace"
    }

    fn phase(&self) -> Phase {
        Phase::PostGeneration
    }

    fn priority(&self) -> i32 {
        10
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        if !ctx.cs.params.init {
            return Ok(cls);
        }
        let fields = ctx.item::<ClassFields>()?;
        cls.set_new(
            "__replace__",
            Value::Fn(replace_fn(cls.clone(), fields.0.clone())),
        );
        Ok(cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{standard_items, Options};
    use crate::spec::{ClassSpec, FieldSpec};
    use std::rc::Rc;

    #[test]
    fn test_replace_rejects_init_false_changes() {
        let cls = Class::new("C");
        let fields = vec![
            StdField::from_spec(&FieldSpec::builder("a", "int").build().unwrap(), false),
            StdField::from_spec(
                &FieldSpec::builder("b", "int")
                    .init(false)
                    .default_value(Value::Int(0))
                    .build()
                    .unwrap(),
                false,
            ),
        ];
        let f = replace_fn(cls.clone(), fields);
        let inst = crate::class::Instance::alloc(cls);
        inst.dict_set("a", Value::Int(1));
        let err = f
            .call(&CallArgs {
                pos: vec![Value::Instance(inst)],
                kw: vec![("b".into(), Value::Int(5))],
            })
            .unwrap_err();
        assert!(err.to_string().contains("init=false"));
    }

    #[test]
    fn test_replace_attached_under_init() {
        let cls = Class::builder("C").annotation("a", "int").build();
        let ctx = ProcessingContext::new(
            cls.clone(),
            Rc::new(ClassSpec::with_defaults(vec![]).unwrap()),
            Options::new(),
            standard_items().unwrap(),
        );
        ReplaceProcessor.process(&ctx, cls.clone()).unwrap();
        assert!(matches!(cls.own("__replace__"), Some(Value::Fn(_))));
    }
}

//! Frozen guard generation
//!
//! Attaches `__setattr__`/`__delattr__` hooks the instance protocol
//! dispatches through. Presence policy is an error: a hand-written hook on
//! a frozen class is a conflict.

use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::MethodBody;
use crate::generate::{cls_ref, ConcernPlan, FrozenPlan, Generator, IfPresent, Op, PlanResult};

use super::refs_with_cls;

pub struct FrozenGenerator;

impl Generator for FrozenGenerator {
    fn concern(&self) -> &'static str {
        "frozen"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        if !ctx.cs.params.frozen {
            return Ok(None);
        }
        let fields = ctx.item::<ClassFields>()?;
        Ok(Some(PlanResult {
            plan: ConcernPlan::Frozen(FrozenPlan {
                fields: fields
                    .0
                    .iter()
                    .filter(|f| f.stored())
                    .map(|f| f.name.clone())
                    .collect(),
                allow_dynamic_dunder_attrs: ctx.cs.extras.allow_dynamic_dunder_attrs,
            }),
            refs: refs_with_cls(&ctx.cls)?,
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let frozen = match plan {
            ConcernPlan::Frozen(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "frozen generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(vec![
            Op::AddMethod {
                name: "__setattr__".into(),
                body: MethodBody::FrozenSetAttr(frozen.clone()),
                refs: vec![cls_ref()],
                if_present: IfPresent::Error,
            },
            Op::AddMethod {
                name: "__delattr__".into(),
                body: MethodBody::FrozenDelAttr(frozen.clone()),
                refs: vec![cls_ref()],
                if_present: IfPresent::Error,
            },
        ])
    }
}

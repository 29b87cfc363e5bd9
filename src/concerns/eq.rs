//! `__eq__` and ordering generation
//!
//! Both compare the same field tuple: identity short-circuits, and both
//! operands must share the same class (anything else defers with the
//! not-implemented sentinel). Ordering attaches with an error presence
//! policy: a hand-written comparison operator alongside `order` is a
//! conflict, not something to silently keep.

use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::{CmpOp, MethodBody};
use crate::generate::{ConcernPlan, EqPlan, Generator, IfPresent, Op, OrderPlan, PlanResult, RefMap};

use super::{compare_field_names, own_defines};

pub struct EqGenerator;

impl Generator for EqGenerator {
    fn concern(&self) -> &'static str {
        "eq"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        if !ctx.cs.params.eq || own_defines(&ctx.cls, "__eq__") {
            return Ok(None);
        }
        let fields = ctx.item::<ClassFields>()?;
        Ok(Some(PlanResult {
            plan: ConcernPlan::Eq(EqPlan {
                fields: compare_field_names(&fields.0),
            }),
            refs: RefMap::new(),
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let eq = match plan {
            ConcernPlan::Eq(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "eq generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(vec![Op::AddMethod {
            name: "__eq__".into(),
            body: MethodBody::Eq(eq.clone()),
            refs: vec![],
            if_present: IfPresent::Skip,
        }])
    }
}

pub struct OrderGenerator;

const ORDER_OPS: [CmpOp; 4] = [CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge];

impl Generator for OrderGenerator {
    fn concern(&self) -> &'static str {
        "order"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        if !ctx.cs.params.order {
            return Ok(None);
        }
        let fields = ctx.item::<ClassFields>()?;
        Ok(Some(PlanResult {
            plan: ConcernPlan::Order(OrderPlan {
                fields: compare_field_names(&fields.0),
            }),
            refs: RefMap::new(),
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let order = match plan {
            ConcernPlan::Order(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "order generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(ORDER_OPS
            .iter()
            .map(|op| Op::AddMethod {
                name: op.method_name().into(),
                body: MethodBody::Cmp {
                    fields: order.fields.clone(),
                    op: *op,
                },
                refs: vec![],
                if_present: IfPresent::Error,
            })
            .collect())
    }
}

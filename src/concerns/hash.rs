//! `__hash__` generation
//!
//! The action is a total function of four booleans: the `unsafe_hash` and
//! `eq`/`frozen` switches plus whether the class body carries an explicit
//! `__hash__`. Defining `__eq__` without a hash makes the class unhashable
//! (an explicit `None` entry); an eq-and-frozen class gets a real hash; and
//! `unsafe_hash` forces one unless the author already wrote their own, which
//! is a conflict.

use crate::context::{ClassFields, ProcessingContext};
use crate::error::{Error, Result};
use crate::generate::method::MethodBody;
use crate::generate::{
    ConcernPlan, Generator, HashPlan, IfPresent, Op, OpValue, PlanResult, RefMap,
};
use crate::value::Value;

use super::own_defines;

/// What the transform does about `__hash__`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAction {
    /// Leave the class alone
    None,
    /// Set `__hash__ = None`, marking the class unhashable
    SetNone,
    /// Attach a generated hash
    Add,
    /// Conflict with an explicit `__hash__`
    Exception,
}

/// The full decision table
pub fn hash_action(
    unsafe_hash: bool,
    eq: bool,
    frozen: bool,
    has_explicit_hash: bool,
) -> HashAction {
    match (unsafe_hash, eq, frozen, has_explicit_hash) {
        (false, false, _, _) => HashAction::None,
        (false, true, false, false) => HashAction::SetNone,
        (false, true, false, true) => HashAction::None,
        (false, true, true, false) => HashAction::Add,
        (false, true, true, true) => HashAction::None,
        (true, _, _, false) => HashAction::Add,
        (true, _, _, true) => HashAction::Exception,
    }
}

pub struct HashGenerator;

impl Generator for HashGenerator {
    fn concern(&self) -> &'static str {
        "hash"
    }

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>> {
        let p = &ctx.cs.params;
        let action = hash_action(
            p.unsafe_hash,
            p.eq,
            p.frozen,
            own_defines(&ctx.cls, "__hash__"),
        );
        let plan = match action {
            HashAction::None => return Ok(None),
            HashAction::Exception => {
                return Err(Error::CannotOverwrite {
                    class: ctx.cls.name(),
                    name: "__hash__".into(),
                })
            }
            HashAction::SetNone => HashPlan::SetNone,
            HashAction::Add => {
                let fields = ctx.item::<ClassFields>()?;
                HashPlan::Add {
                    fields: fields
                        .0
                        .iter()
                        .filter(|f| f.stored() && f.hash_eligible())
                        .map(|f| f.name.clone())
                        .collect(),
                    cache: ctx.cs.extras.cache_hash,
                }
            }
        };
        Ok(Some(PlanResult {
            plan: ConcernPlan::Hash(plan),
            refs: RefMap::new(),
        }))
    }

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>> {
        let hash = match plan {
            ConcernPlan::Hash(p) => p,
            other => {
                return Err(Error::Registry(format!(
                    "hash generator handed a {} plan",
                    other.tag()
                )))
            }
        };
        Ok(vec![match hash {
            HashPlan::SetNone => Op::SetAttr {
                name: "__hash__".into(),
                value: OpValue::Const(Value::None),
                if_present: IfPresent::Replace,
            },
            HashPlan::Add { fields, cache } => Op::AddMethod {
                name: "__hash__".into(),
                body: MethodBody::Hash {
                    fields: fields.clone(),
                    cache: *cache,
                },
                refs: vec![],
                if_present: IfPresent::Replace,
            },
        }])
    }
}

//! Generation core: plans, refs, and ops
//!
//! Method synthesis is split into three stages so the expensive part is
//! cacheable and the whole pipeline is testable without touching a class:
//!
//! 1. *Plan* — each concern generator inspects the context and produces a
//!    pure-data [`ConcernPlan`] plus a [`RefMap`] naming the runtime values
//!    the eventual methods will close over. Plans serialize canonically;
//!    `plan_repr()` is the cache key for everything downstream.
//! 2. *Lower* — a plan lowers to a list of [`Op`]s: attribute writes, method
//!    attachments, property attachments. Lowering is pure.
//! 3. *Apply* — a backend executes the ops against the class: natively
//!    ([`execute`]) or through rendered source ([`compile`], [`aot`]).

pub mod aot;
pub mod compile;
pub mod execute;
pub mod method;

use std::collections::BTreeMap;
use std::rc::Rc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ProcessingContext;
use crate::error::{Error, Result};
use crate::value::Value;

use method::MethodBody;

/// A named placeholder for a runtime value a generated method closes over.
/// Dotted names (`init.fields.0.default`) flatten to identifiers for the
/// compile backend.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct OpRef(pub String);

impl OpRef {
    pub fn new(name: impl Into<String>) -> Self {
        OpRef(name.into())
    }

    /// Flattened identifier form used as a generated parameter name
    pub fn ident(&self) -> String {
        format!("__dataclass__{}", self.0.replace('.', "__"))
    }
}

impl std::fmt::Display for OpRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved values for op refs. Merging detects generators that disagree
/// about what a shared name means.
#[derive(Debug, Clone, Default)]
pub struct RefMap {
    map: BTreeMap<String, Value>,
}

impl RefMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, r: OpRef, v: Value) -> Result<()> {
        if let Some(prev) = self.map.get(&r.0) {
            if !same_ref_value(prev, &v) {
                return Err(Error::Registry(format!(
                    "conflicting values for op ref {:?}",
                    r.0
                )));
            }
            return Ok(());
        }
        self.map.insert(r.0, v);
        Ok(())
    }

    pub fn merge(&mut self, other: RefMap) -> Result<()> {
        for (k, v) in other.map {
            self.insert(OpRef(k), v)?;
        }
        Ok(())
    }

    pub fn get(&self, r: &OpRef) -> Result<Value> {
        self.map
            .get(&r.0)
            .cloned()
            .ok_or_else(|| Error::Registry(format!("unresolved op ref {:?}", r.0)))
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Ref-map collision tolerance: identical callables by identity, everything
/// else structurally.
fn same_ref_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Fn(x), Value::Fn(y)) => x.is(y),
        (Value::Class(x), Value::Class(y)) => x.is(y),
        _ => a.eq_value(b),
    }
}

/// Name of the ref every class-needing generator shares
pub fn cls_ref() -> OpRef {
    OpRef::new("cls")
}

// ---------------------------------------------------------------------------
// Plan data model (pure, canonically serializable)

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum DefaultPlan {
    Missing,
    Value { r#ref: OpRef },
    Factory { r#ref: OpRef },
}

impl DefaultPlan {
    pub fn is_missing(&self) -> bool {
        matches!(self, DefaultPlan::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum CoercePlan {
    ToType { type_name: String },
    Fn { r#ref: OpRef },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum CheckTypePlan {
    Type { type_name: String },
    Types { refs: Vec<OpRef> },
}

/// Where a field value lands at the end of init
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StorePlan {
    /// Ordinary attribute write through the instance protocol
    SetAttr,
    /// Hook-bypassing storage write, used when the class is frozen
    RawSet,
    /// Unconditional dict write, used for override fields
    DictSet,
    /// Not stored at all (init-vars)
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InitFieldPlan {
    pub name: String,
    pub annotation: String,
    pub kw_only: bool,
    pub init_var: bool,
    pub default: DefaultPlan,
    pub coerce: Option<CoercePlan>,
    pub check_type: Option<CheckTypePlan>,
    pub validate: Option<OpRef>,
    pub store: StorePlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidateFnPlan {
    pub r#ref: OpRef,
    pub params: Vec<String>,
}

/// A field set inside `__init__` without appearing in its signature
/// (init-excluded fields whose default is a factory call)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PostSetPlan {
    pub name: String,
    pub factory: OpRef,
    pub store: StorePlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InitPlan {
    pub fields: Vec<InitFieldPlan>,
    pub post_sets: Vec<PostSetPlan>,
    pub frozen: bool,
    pub post_init: bool,
    pub post_init_params: Vec<String>,
    pub init_fns: Vec<OpRef>,
    pub validate_fns: Vec<ValidateFnPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReprFieldPlan {
    pub name: String,
    /// Omit `name=` and render in init order
    pub positional: bool,
    pub fn_ref: Option<OpRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReprPlan {
    pub fields: Vec<ReprFieldPlan>,
    pub with_id: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EqPlan {
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OrderPlan {
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum HashPlan {
    /// Explicitly mark the class unhashable
    SetNone,
    Add { fields: Vec<String>, cache: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrozenPlan {
    pub fields: Vec<String>,
    pub allow_dynamic_dunder_attrs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CopyPlan {
    /// Init-signature field names, reconstructed as keyword arguments
    pub init_params: Vec<String>,
    /// Stored fields outside the init signature, copied directly
    pub extra_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverrideFieldPlan {
    pub name: String,
    pub settable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverridesPlan {
    pub fields: Vec<OverrideFieldPlan>,
}

/// One concern's plan. The closed set of concerns a transform can generate
/// for; variant order is not significant, plans sort by tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum ConcernPlan {
    Copy(CopyPlan),
    Eq(EqPlan),
    Frozen(FrozenPlan),
    Hash(HashPlan),
    Init(InitPlan),
    Order(OrderPlan),
    Overrides(OverridesPlan),
    Repr(ReprPlan),
}

impl ConcernPlan {
    pub fn tag(&self) -> &'static str {
        match self {
            ConcernPlan::Copy(_) => "copy",
            ConcernPlan::Eq(_) => "eq",
            ConcernPlan::Frozen(_) => "frozen",
            ConcernPlan::Hash(_) => "hash",
            ConcernPlan::Init(_) => "init",
            ConcernPlan::Order(_) => "order",
            ConcernPlan::Overrides(_) => "overrides",
            ConcernPlan::Repr(_) => "repr",
        }
    }
}

/// The deterministically ordered plan set for one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plans(Vec<ConcernPlan>);

impl Plans {
    pub fn new(mut plans: Vec<ConcernPlan>) -> Self {
        plans.sort_by_key(|p| p.tag());
        Plans(plans)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConcernPlan> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical serialized text; the identity of this plan set
    pub fn plan_repr(&self) -> String {
        // Plans and their contents serialize deterministically, so this is
        // stable across runs.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Truncated content hash of the canonical repr
    pub fn plan_hash(&self) -> String {
        hash_text(&self.plan_repr())
    }
}

/// `sha256:<16 hex>` truncated-digest format
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("sha256:{}", hex::encode(&hasher.finalize()[..8]))
}

// ---------------------------------------------------------------------------
// Ops

/// What to do when the target attribute already exists on the class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IfPresent {
    Skip,
    Replace,
    Error,
}

/// A value an op writes: a literal or a resolved ref
#[derive(Debug, Clone)]
pub enum OpValue {
    Const(Value),
    Ref(OpRef),
}

impl OpValue {
    pub fn resolve(&self, refs: &RefMap) -> Result<Value> {
        match self {
            OpValue::Const(v) => Ok(v.clone()),
            OpValue::Ref(r) => refs.get(r),
        }
    }
}

/// One applied change to the class under transform
#[derive(Debug, Clone)]
pub enum Op {
    SetAttr {
        name: String,
        value: OpValue,
        if_present: IfPresent,
    },
    AddMethod {
        name: String,
        body: MethodBody,
        refs: Vec<OpRef>,
        if_present: IfPresent,
    },
    AddProperty {
        name: String,
        getter: MethodBody,
        setter: Option<MethodBody>,
        refs: Vec<OpRef>,
        if_present: IfPresent,
    },
}

impl Op {
    pub fn name(&self) -> &str {
        match self {
            Op::SetAttr { name, .. } => name,
            Op::AddMethod { name, .. } => name,
            Op::AddProperty { name, .. } => name,
        }
    }

    /// Refs this op needs resolved before it can be applied
    pub fn refs(&self) -> Vec<OpRef> {
        match self {
            Op::SetAttr { value, .. } => match value {
                OpValue::Ref(r) => vec![r.clone()],
                OpValue::Const(_) => vec![],
            },
            Op::AddMethod { refs, .. } => refs.clone(),
            Op::AddProperty { refs, .. } => refs.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Generators

/// A planned concern plus the runtime values its methods close over
#[derive(Debug, Clone)]
pub struct PlanResult {
    pub plan: ConcernPlan,
    pub refs: RefMap,
}

/// One concern's generator. `plan` declines (returns `None`) when the
/// concern does not apply, typically because a hand-written method occupies
/// the class's own namespace; `lower` is pure plan-to-ops translation.
pub trait Generator {
    fn concern(&self) -> &'static str;

    fn plan(&self, ctx: &ProcessingContext) -> Result<Option<PlanResult>>;

    fn lower(&self, plan: &ConcernPlan) -> Result<Vec<Op>>;
}

/// Ordered generator registry with the same freeze discipline as the other
/// registries.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: std::cell::RefCell<Vec<Rc<dyn Generator>>>,
    frozen: std::cell::Cell<bool>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, g: Rc<dyn Generator>) -> Result<()> {
        if self.frozen.get() {
            return Err(Error::Registry(
                "generator registry is frozen, cannot register".into(),
            ));
        }
        self.generators.borrow_mut().push(g);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub fn all(&self) -> Vec<Rc<dyn Generator>> {
        self.generators.borrow().clone()
    }
}

/// The complete generation output for one class, before any backend applies
/// it.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub plans: Plans,
    pub refs: RefMap,
    pub ops: Vec<Op>,
}

/// Run every generator's plan stage, merge refs, lower all plans in
/// canonical order.
pub fn prepare(ctx: &ProcessingContext, registry: &GeneratorRegistry) -> Result<Prepared> {
    let mut planned: Vec<(Rc<dyn Generator>, ConcernPlan)> = Vec::new();
    let mut refs = RefMap::new();
    for g in registry.all() {
        if let Some(result) = g.plan(ctx)? {
            tracing::debug!(concern = g.concern(), "planned");
            refs.merge(result.refs)?;
            planned.push((g, result.plan));
        }
    }
    planned.sort_by_key(|(_, p)| p.tag());

    let mut ops = Vec::new();
    for (g, plan) in &planned {
        ops.extend(g.lower(plan)?);
    }
    let plans = Plans::new(planned.into_iter().map(|(_, p)| p).collect());
    tracing::debug!(
        class = %ctx.cls.name(),
        plans = plans.len(),
        ops = ops.len(),
        refs = refs.len(),
        "prepared"
    );
    Ok(Prepared { plans, refs, ops })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_op_ref_ident_flattening() {
        let r = OpRef::new("init.fields.0.annotation");
        assert_eq!(r.ident(), "__dataclass__init__fields__0__annotation");
        assert_eq!(OpRef::new("cls").ident(), "__dataclass__cls");
    }

    #[test]
    fn test_ref_map_conflict_detection() {
        let mut a = RefMap::new();
        a.insert(OpRef::new("x"), Value::Int(1)).unwrap();
        // same value is fine
        a.insert(OpRef::new("x"), Value::Int(1)).unwrap();
        assert!(a.insert(OpRef::new("x"), Value::Int(2)).is_err());

        let mut b = RefMap::new();
        b.insert(OpRef::new("x"), Value::Int(2)).unwrap();
        let mut merged = RefMap::new();
        merged.insert(OpRef::new("x"), Value::Int(1)).unwrap();
        assert!(merged.merge(b).is_err());
    }

    #[test]
    fn test_fn_refs_compare_by_identity() {
        use crate::value::FnValue;
        let f = FnValue::new("f", |_| Ok(Value::None));
        let g = FnValue::new("f", |_| Ok(Value::None));
        let mut refs = RefMap::new();
        refs.insert(OpRef::new("fn"), Value::Fn(f.clone())).unwrap();
        refs.insert(OpRef::new("fn"), Value::Fn(f)).unwrap();
        assert!(refs.insert(OpRef::new("fn"), Value::Fn(g)).is_err());
    }

    #[test]
    fn test_plans_sort_and_repr_stability() {
        let a = Plans::new(vec![
            ConcernPlan::Repr(ReprPlan { fields: vec![], with_id: false }),
            ConcernPlan::Eq(EqPlan { fields: vec!["x".into()] }),
        ]);
        let b = Plans::new(vec![
            ConcernPlan::Eq(EqPlan { fields: vec!["x".into()] }),
            ConcernPlan::Repr(ReprPlan { fields: vec![], with_id: false }),
        ]);
        assert_eq!(a.plan_repr(), b.plan_repr());
        assert_eq!(a.plan_hash(), b.plan_hash());
        assert!(a.plan_hash().starts_with("sha256:"));
        assert_eq!(a.plan_hash().len(), "sha256:".len() + 16);
    }

    #[test]
    fn test_plan_repr_differs_on_content() {
        let a = Plans::new(vec![ConcernPlan::Eq(EqPlan { fields: vec!["x".into()] })]);
        let b = Plans::new(vec![ConcernPlan::Eq(EqPlan { fields: vec!["y".into()] })]);
        assert_ne!(a.plan_repr(), b.plan_repr());
        assert_ne!(a.plan_hash(), b.plan_hash());
    }

    #[test]
    fn test_frozen_generator_registry() {
        let reg = GeneratorRegistry::new();
        reg.freeze();
        struct Dummy;
        impl Generator for Dummy {
            fn concern(&self) -> &'static str {
                "dummy"
            }
            fn plan(&self, _: &ProcessingContext) -> Result<Option<PlanResult>> {
                Ok(None)
            }
            fn lower(&self, _: &ConcernPlan) -> Result<Vec<Op>> {
                Ok(vec![])
            }
        }
        assert!(reg.register(Rc::new(Dummy)).is_err());
    }
}

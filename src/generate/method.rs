//! Structured method bodies
//!
//! Generated methods are not source text: each concern lowers to a
//! [`MethodBody`], a closed data description of what the method does. The
//! execute backend binds a body against a resolved ref-map to get a native
//! closure; the compile backend renders the same body to source text for
//! inspection and ahead-of-time artifacts. Keeping one body feeding both
//! backends is what guarantees they agree.

use std::collections::HashMap;

use crate::class::{Class, Instance, HASH_CACHE_ATTR, POST_INIT_NAME};
use crate::error::{Error, Result};
use crate::value::{CallArgs, FnValue, TypeRef, Value};

use super::{
    cls_ref, CheckTypePlan, CoercePlan, CopyPlan, DefaultPlan, EqPlan, FrozenPlan, InitPlan,
    OpRef, RefMap, ReprPlan, StorePlan,
};

/// Ordering operator a comparison body implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn method_name(&self) -> &'static str {
        match self {
            CmpOp::Lt => "__lt__",
            CmpOp::Le => "__le__",
            CmpOp::Gt => "__gt__",
            CmpOp::Ge => "__ge__",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn eval(&self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CmpOp::Lt => ord == Less,
            CmpOp::Le => ord != Greater,
            CmpOp::Gt => ord == Greater,
            CmpOp::Ge => ord != Less,
        }
    }
}

/// A generated method's body, as data
#[derive(Debug, Clone)]
pub enum MethodBody {
    Init(InitPlan),
    Repr(ReprPlan),
    Eq(EqPlan),
    Cmp { fields: Vec<String>, op: CmpOp },
    Hash { fields: Vec<String>, cache: bool },
    FrozenSetAttr(FrozenPlan),
    FrozenDelAttr(FrozenPlan),
    Copy(CopyPlan),
    DictGetter { field: String },
    DictSetter { field: String },
}

impl MethodBody {
    /// Bind against resolved refs, producing the native method
    pub fn bind(&self, name: &str, refs: &RefMap) -> Result<FnValue> {
        match self {
            MethodBody::Init(plan) => bind_init(name, plan, refs),
            MethodBody::Repr(plan) => bind_repr(name, plan, refs),
            MethodBody::Eq(plan) => bind_eq(name, plan, refs),
            MethodBody::Cmp { fields, op } => bind_cmp(name, fields, *op, refs),
            MethodBody::Hash { fields, cache } => bind_hash(name, fields, *cache),
            MethodBody::FrozenSetAttr(plan) => bind_frozen_set(name, plan, refs),
            MethodBody::FrozenDelAttr(plan) => bind_frozen_del(name, plan, refs),
            MethodBody::Copy(plan) => bind_copy(name, plan, refs),
            MethodBody::DictGetter { field } => {
                let field = field.clone();
                Ok(FnValue::new(name, move |args| {
                    let inst = args.instance(0)?;
                    inst.dict_get(&field).ok_or_else(|| Error::Attribute {
                        class: inst.class().name(),
                        name: field.clone(),
                    })
                }))
            }
            MethodBody::DictSetter { field } => {
                let field = field.clone();
                Ok(FnValue::new(name, move |args| {
                    let inst = args.instance(0)?;
                    inst.dict_set(&field, args.arg(1)?.clone());
                    Ok(Value::None)
                }))
            }
        }
    }
}

fn ref_fn(refs: &RefMap, r: &OpRef) -> Result<FnValue> {
    match refs.get(r)? {
        Value::Fn(f) => Ok(f),
        other => Err(Error::Registry(format!(
            "op ref {:?} expected a function, got {}",
            r.0,
            other.type_name()
        ))),
    }
}

fn ref_cls(refs: &RefMap) -> Result<Class> {
    match refs.get(&cls_ref())? {
        Value::Class(c) => Ok(c),
        other => Err(Error::Registry(format!(
            "op ref \"cls\" expected a class, got {}",
            other.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Init

#[derive(Clone)]
enum BoundDefault {
    Missing,
    Value(Value),
    Factory(FnValue),
}

#[derive(Clone)]
enum BoundCoerce {
    ToType(TypeRef),
    Fn(FnValue),
}

#[derive(Clone)]
struct BoundInitField {
    name: String,
    kw_only: bool,
    default: BoundDefault,
    coerce: Option<BoundCoerce>,
    check_type: Option<(Vec<TypeRef>, String)>,
    validate: Option<FnValue>,
    store: StorePlan,
}

fn builtin_type(name: &str) -> Result<TypeRef> {
    crate::annotations::Annotation::new(name)
        .builtin_type()
        .ok_or_else(|| Error::Type(format!("not a checkable builtin type: {name:?}")))
}

fn bind_init_field(plan: &super::InitFieldPlan, refs: &RefMap) -> Result<BoundInitField> {
    let default = match &plan.default {
        DefaultPlan::Missing => BoundDefault::Missing,
        DefaultPlan::Value { r#ref } => BoundDefault::Value(refs.get(r#ref)?),
        DefaultPlan::Factory { r#ref } => BoundDefault::Factory(ref_fn(refs, r#ref)?),
    };
    let coerce = match &plan.coerce {
        None => None,
        Some(CoercePlan::ToType { type_name }) => {
            Some(BoundCoerce::ToType(builtin_type(type_name)?))
        }
        Some(CoercePlan::Fn { r#ref }) => Some(BoundCoerce::Fn(ref_fn(refs, r#ref)?)),
    };
    let check_type = match &plan.check_type {
        None => None,
        Some(CheckTypePlan::Type { type_name }) => {
            Some((vec![builtin_type(type_name)?], type_name.clone()))
        }
        Some(CheckTypePlan::Types { refs: type_refs }) => {
            let mut types = Vec::new();
            for r in type_refs {
                match refs.get(r)? {
                    Value::Type(t) => types.push(t),
                    Value::Class(c) => types.push(TypeRef::Class(c)),
                    other => {
                        return Err(Error::Registry(format!(
                            "op ref {:?} expected a type, got {}",
                            r.0,
                            other.type_name()
                        )))
                    }
                }
            }
            let desc = types.iter().map(TypeRef::name).collect::<Vec<_>>().join(" | ");
            Some((types, desc))
        }
    };
    let validate = match &plan.validate {
        None => None,
        Some(r) => Some(ref_fn(refs, r)?),
    };
    Ok(BoundInitField {
        name: plan.name.clone(),
        kw_only: plan.kw_only,
        default,
        coerce,
        check_type,
        validate,
        store: plan.store,
    })
}

fn coerce_value(t: &TypeRef, v: Value) -> Result<Value> {
    if v.isinstance(t) {
        return Ok(v);
    }
    match (t, &v) {
        (TypeRef::Int, Value::Float(f)) => Ok(Value::Int(*f as i64)),
        (TypeRef::Int, Value::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::Type(format!("cannot coerce {s:?} to int"))),
        (TypeRef::Float, Value::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::Type(format!("cannot coerce {s:?} to float"))),
        (TypeRef::Str, _) => Ok(Value::str(v.repr())),
        (TypeRef::Bool, _) => Ok(Value::Bool(v.truthy())),
        (TypeRef::Tuple, Value::List(l)) => Ok(Value::tuple(l.borrow().clone())),
        (TypeRef::List, Value::Tuple(items)) => Ok(Value::list(items.as_ref().clone())),
        _ => Err(Error::Type(format!(
            "cannot coerce {} to {}",
            v.type_name(),
            t.name()
        ))),
    }
}

fn bind_init(name: &str, plan: &InitPlan, refs: &RefMap) -> Result<FnValue> {
    let fields: Vec<BoundInitField> = plan
        .fields
        .iter()
        .map(|f| bind_init_field(f, refs))
        .collect::<Result<_>>()?;
    let init_fns: Vec<FnValue> = plan
        .init_fns
        .iter()
        .map(|r| ref_fn(refs, r))
        .collect::<Result<_>>()?;
    let validate_fns: Vec<(FnValue, Vec<String>)> = plan
        .validate_fns
        .iter()
        .map(|v| Ok((ref_fn(refs, &v.r#ref)?, v.params.clone())))
        .collect::<Result<_>>()?;
    let post_sets: Vec<(String, FnValue, StorePlan)> = plan
        .post_sets
        .iter()
        .map(|p| Ok((p.name.clone(), ref_fn(refs, &p.factory)?, p.store)))
        .collect::<Result<_>>()?;
    let post_init = plan.post_init;
    let post_init_params = plan.post_init_params.clone();

    Ok(FnValue::new(name, move |args: &CallArgs| {
        let inst = args.instance(0)?;
        let cls_name = inst.class().name();

        // Bind arguments to fields: positional in signature order, keywords
        // by name, defaults last.
        let mut kw: HashMap<String, Value> = HashMap::new();
        for (k, v) in &args.kw {
            if kw.insert(k.clone(), v.clone()).is_some() {
                return Err(Error::Type(format!(
                    "{cls_name}.__init__() got duplicate keyword argument {k:?}"
                )));
            }
        }
        let pos_capacity = fields.iter().filter(|f| !f.kw_only).count();
        let given_pos = args.pos.len() - 1;
        if given_pos > pos_capacity {
            return Err(Error::Type(format!(
                "{cls_name}.__init__() takes {pos_capacity} positional arguments but {given_pos} were given"
            )));
        }

        let mut values: Vec<(BoundInitField, Value)> = Vec::with_capacity(fields.len());
        let mut pos_idx = 1;
        for f in &fields {
            let from_pos = if !f.kw_only && pos_idx < args.pos.len() {
                pos_idx += 1;
                Some(args.pos[pos_idx - 1].clone())
            } else {
                None
            };
            let from_kw = kw.remove(&f.name);
            let v = match (from_pos, from_kw) {
                (Some(_), Some(_)) => {
                    return Err(Error::Type(format!(
                        "{cls_name}.__init__() got multiple values for argument {:?}",
                        f.name
                    )))
                }
                (Some(v), None) | (None, Some(v)) => v,
                (None, None) => match &f.default {
                    BoundDefault::Value(v) => v.clone(),
                    BoundDefault::Factory(factory) => factory.call_pos(vec![])?,
                    BoundDefault::Missing => {
                        return Err(Error::Type(format!(
                            "{cls_name}.__init__() missing required argument: {:?}",
                            f.name
                        )))
                    }
                },
            };
            values.push((f.clone(), v));
        }
        if let Some(stray) = kw.keys().next() {
            return Err(Error::Type(format!(
                "{cls_name}.__init__() got an unexpected keyword argument {stray:?}"
            )));
        }

        // Per-field pipeline: coerce, type-check, validate, store
        let mut init_var_values: HashMap<String, Value> = HashMap::new();
        for (f, v) in values.iter_mut() {
            if let Some(coerce) = &f.coerce {
                *v = match coerce {
                    BoundCoerce::ToType(t) => coerce_value(t, v.clone())?,
                    BoundCoerce::Fn(func) => func.call_pos(vec![v.clone()])?,
                };
            }
            if let Some((types, expected)) = &f.check_type {
                if !types.iter().any(|t| v.isinstance(t)) {
                    return Err(Error::FieldType {
                        class: cls_name.clone(),
                        field: f.name.clone(),
                        expected: expected.clone(),
                        value: v.repr(),
                    });
                }
            }
            if let Some(validate) = &f.validate {
                if !validate.call_pos(vec![v.clone()])?.truthy() {
                    return Err(Error::FieldValidate {
                        class: cls_name.clone(),
                        field: f.name.clone(),
                        value: v.repr(),
                    });
                }
            }
            match f.store {
                StorePlan::SetAttr => inst.set_attr(&f.name, v.clone())?,
                StorePlan::RawSet => inst.raw_set(&f.name, v.clone())?,
                StorePlan::DictSet => inst.dict_set(&f.name, v.clone()),
                StorePlan::Skip => {
                    init_var_values.insert(f.name.clone(), v.clone());
                }
            }
        }

        for (name, factory, store) in &post_sets {
            let v = factory.call_pos(vec![])?;
            match store {
                StorePlan::SetAttr => inst.set_attr(name, v)?,
                StorePlan::RawSet => inst.raw_set(name, v)?,
                StorePlan::DictSet => inst.dict_set(name, v),
                StorePlan::Skip => {}
            }
        }

        if post_init {
            if let Some(Value::Fn(f)) = inst.class().lookup(POST_INIT_NAME) {
                let mut call = vec![Value::Instance(inst.clone())];
                for p in &post_init_params {
                    let v = init_var_values.get(p).cloned().ok_or_else(|| {
                        Error::Type(format!("missing init-var value for {p:?}"))
                    })?;
                    call.push(v);
                }
                f.call_pos(call)?;
            }
        }

        for f in &init_fns {
            f.call_pos(vec![Value::Instance(inst.clone())])?;
        }

        for (f, params) in &validate_fns {
            let mut call = Vec::with_capacity(params.len());
            for p in params {
                let v = values
                    .iter()
                    .find(|(bf, _)| &bf.name == p)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        Error::Type(format!("validator references unknown field {p:?}"))
                    })?;
                call.push(v);
            }
            if !f.call_pos(call)?.truthy() {
                return Err(Error::Validate {
                    class: cls_name.clone(),
                    fn_name: f.name.clone(),
                });
            }
        }

        Ok(Value::None)
    }))
}

// ---------------------------------------------------------------------------
// Repr

fn bind_repr(name: &str, plan: &ReprPlan, refs: &RefMap) -> Result<FnValue> {
    let mut fields: Vec<(super::ReprFieldPlan, Option<FnValue>)> = Vec::new();
    for f in &plan.fields {
        let func = match &f.fn_ref {
            Some(r) => Some(ref_fn(refs, r)?),
            None => None,
        };
        fields.push((f.clone(), func));
    }
    let with_id = plan.with_id;

    Ok(FnValue::new(name, move |args: &CallArgs| {
        let inst = args.instance(0)?;
        let mut parts = Vec::with_capacity(fields.len());
        for (f, func) in &fields {
            let v = inst.get_attr(&f.name)?;
            let rendered = match func {
                Some(func) => match func.call_pos(vec![v])? {
                    Value::None => continue,
                    Value::Str(s) => s,
                    other => other.repr(),
                },
                None => v.repr(),
            };
            if f.positional {
                parts.push(rendered);
            } else {
                parts.push(format!("{}={}", f.name, rendered));
            }
        }
        let head = if with_id {
            format!("{}@{:x}", inst.class().qualname(), inst.addr())
        } else {
            inst.class().qualname()
        };
        Ok(Value::str(format!("{}({})", head, parts.join(", "))))
    }))
}

// ---------------------------------------------------------------------------
// Eq / ordering

/// Both operands must share the exact same class; anything else defers via
/// `NotImplemented`.
fn same_class_operands(
    args: &CallArgs,
) -> Result<std::result::Result<(Instance, Instance), Value>> {
    let a = args.instance(0)?;
    let b = match args.arg(1)? {
        Value::Instance(b) => b.clone(),
        _ => return Ok(Err(Value::NotImplemented)),
    };
    if !a.class().is(&b.class()) {
        return Ok(Err(Value::NotImplemented));
    }
    Ok(Ok((a, b)))
}

fn field_tuple(inst: &Instance, fields: &[String]) -> Result<Value> {
    let mut items = Vec::with_capacity(fields.len());
    for f in fields {
        items.push(inst.get_attr(f)?);
    }
    Ok(Value::tuple(items))
}

fn bind_eq(name: &str, plan: &EqPlan, _refs: &RefMap) -> Result<FnValue> {
    let fields = plan.fields.clone();
    Ok(FnValue::new(name, move |args: &CallArgs| {
        let (a, b) = match same_class_operands(args)? {
            Ok(pair) => pair,
            Err(sentinel) => return Ok(sentinel),
        };
        if a.is(&b) {
            return Ok(Value::Bool(true));
        }
        let (ta, tb) = (field_tuple(&a, &fields)?, field_tuple(&b, &fields)?);
        Ok(Value::Bool(ta.eq_value(&tb)))
    }))
}

fn bind_cmp(name: &str, fields: &[String], op: CmpOp, _refs: &RefMap) -> Result<FnValue> {
    let fields = fields.to_vec();
    Ok(FnValue::new(name, move |args: &CallArgs| {
        let (a, b) = match same_class_operands(args)? {
            Ok(pair) => pair,
            Err(sentinel) => return Ok(sentinel),
        };
        let (ta, tb) = (field_tuple(&a, &fields)?, field_tuple(&b, &fields)?);
        Ok(Value::Bool(op.eval(ta.compare(&tb)?)))
    }))
}

// ---------------------------------------------------------------------------
// Hash

fn bind_hash(name: &str, fields: &[String], cache: bool) -> Result<FnValue> {
    let fields = fields.to_vec();
    Ok(FnValue::new(name, move |args: &CallArgs| {
        let inst = args.instance(0)?;
        if cache {
            if let Some(Value::Int(h)) = inst.dict_get(HASH_CACHE_ATTR) {
                return Ok(Value::Int(h));
            }
        }
        let h = field_tuple(&inst, &fields)?.try_hash()? as i64;
        if cache {
            inst.dict_set(HASH_CACHE_ATTR, Value::Int(h));
        }
        Ok(Value::Int(h))
    }))
}

// ---------------------------------------------------------------------------
// Frozen guards

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// The guard fires when the receiver is exactly the declaring class or the
/// name is a declared field; subclass writes to other attributes pass
/// through to raw storage.
fn frozen_blocks(
    plan_fields: &[String],
    allow_dynamic_dunder: bool,
    declaring: &Class,
    inst: &Instance,
    name: &str,
) -> bool {
    let is_field = plan_fields.iter().any(|f| f == name);
    if allow_dynamic_dunder && !is_field && is_dunder(name) {
        return false;
    }
    inst.class().is(declaring) || is_field
}

fn bind_frozen_set(name: &str, plan: &FrozenPlan, refs: &RefMap) -> Result<FnValue> {
    let cls = ref_cls(refs)?;
    let fields = plan.fields.clone();
    let allow_dunder = plan.allow_dynamic_dunder_attrs;
    Ok(FnValue::new(name, move |args: &CallArgs| {
        let inst = args.instance(0)?;
        let attr = match args.arg(1)? {
            Value::Str(s) => s.clone(),
            other => return Err(Error::Call(format!("attribute name must be str, got {}", other.type_name()))),
        };
        let value = args.arg(2)?.clone();
        if frozen_blocks(&fields, allow_dunder, &cls, &inst, &attr) {
            return Err(Error::FrozenInstance { field: attr });
        }
        inst.raw_set(&attr, value)?;
        Ok(Value::None)
    }))
}

fn bind_frozen_del(name: &str, plan: &FrozenPlan, refs: &RefMap) -> Result<FnValue> {
    let cls = ref_cls(refs)?;
    let fields = plan.fields.clone();
    let allow_dunder = plan.allow_dynamic_dunder_attrs;
    Ok(FnValue::new(name, move |args: &CallArgs| {
        let inst = args.instance(0)?;
        let attr = match args.arg(1)? {
            Value::Str(s) => s.clone(),
            other => return Err(Error::Call(format!("attribute name must be str, got {}", other.type_name()))),
        };
        if frozen_blocks(&fields, allow_dunder, &cls, &inst, &attr) {
            return Err(Error::FrozenDelete { field: attr });
        }
        inst.raw_del(&attr)?;
        Ok(Value::None)
    }))
}

// ---------------------------------------------------------------------------
// Copy

fn bind_copy(name: &str, plan: &CopyPlan, refs: &RefMap) -> Result<FnValue> {
    let cls = ref_cls(refs)?;
    let init_params = plan.init_params.clone();
    let extra_fields = plan.extra_fields.clone();
    Ok(FnValue::new(name, move |args: &CallArgs| {
        let inst = args.instance(0)?;
        if !inst.class().is(&cls) {
            return Err(Error::Type(format!(
                "__copy__ generated for {} does not support subclass {}",
                cls.name(),
                inst.class().name()
            )));
        }
        let mut kw = Vec::with_capacity(init_params.len());
        for p in &init_params {
            kw.push((p.clone(), inst.get_attr(p)?));
        }
        let new = cls.call(CallArgs::keyword(kw))?;
        if let Value::Instance(new_inst) = &new {
            for f in &extra_fields {
                if let Some(v) = inst.dict_get(f) {
                    new_inst.dict_set(f, v);
                }
            }
        }
        Ok(new)
    }))
}

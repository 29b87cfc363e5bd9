//! Compile backend: render an op list to attach-function source
//!
//! The rendered text is the persistent, inspectable form of a generation:
//! one synthesized attach function whose keyword parameters are the
//! flattened ref idents, with every op from the plan spelled out in its
//! body. The execute backend is what actually applies ops; this rendering
//! exists so JIT runs can be inspected and AOT runs can be persisted and
//! diffed against the plan that produced them.

use std::collections::BTreeSet;

use crate::class::Class;
use crate::error::Result;
use crate::value::Value;

use super::method::MethodBody;
use super::{
    cls_ref, CheckTypePlan, CoercePlan, DefaultPlan, IfPresent, Op, OpValue, Prepared, StorePlan,
};

/// A rendered generation, ready to persist or hand to an inspection hook
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub src: String,
    /// Sorted flattened ref idents; the attach function's parameters
    pub params: Vec<String>,
    pub plan_repr: String,
    pub plan_hash: String,
    pub cls_names: Vec<String>,
}

/// Render the prepared ops for one class
pub fn compile(cls: &Class, prepared: &Prepared) -> Result<CompileResult> {
    let mut idents: BTreeSet<String> = BTreeSet::new();
    idents.insert(cls_ref().ident());
    for op in &prepared.ops {
        for r in op.refs() {
            idents.insert(r.ident());
        }
    }
    let params: Vec<String> = idents.into_iter().collect();

    let fn_name = format!("__dataclass_attach__{}", sanitize(&cls.name()));
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("def {fn_name}("));
    lines.push("    *,".into());
    for p in &params {
        lines.push(format!("    {p},"));
    }
    lines.push("):".into());

    let cls_ident = cls_ref().ident();
    for op in &prepared.ops {
        lines.push(String::new());
        render_op(&mut lines, &cls_ident, op);
    }
    if prepared.ops.is_empty() {
        lines.push("    pass".into());
    }
    lines.push(String::new());

    Ok(CompileResult {
        src: lines.join("\n"),
        params,
        plan_repr: prepared.plans.plan_repr(),
        plan_hash: prepared.plans.plan_hash(),
        cls_names: vec![cls.qualname()],
    })
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn render_op(lines: &mut Vec<String>, cls_ident: &str, op: &Op) {
    match op {
        Op::SetAttr {
            name,
            value,
            if_present,
        } => {
            let rendered = match value {
                OpValue::Const(v) => const_text(v),
                OpValue::Ref(r) => r.ident(),
            };
            render_attach(lines, cls_ident, name, *if_present, &rendered);
        }
        Op::AddMethod {
            name,
            body,
            if_present,
            ..
        } => {
            render_body(lines, name, body);
            render_attach(lines, cls_ident, name, *if_present, name);
        }
        Op::AddProperty {
            name,
            getter,
            setter,
            if_present,
            ..
        } => {
            let get_name = format!("_get_{name}");
            let set_name = format!("_set_{name}");
            render_body(lines, &get_name, getter);
            let setter_expr = match setter {
                Some(body) => {
                    render_body(lines, &set_name, body);
                    set_name.clone()
                }
                None => "None".into(),
            };
            let value = format!("property({get_name}, {setter_expr})");
            render_attach(lines, cls_ident, name, *if_present, &value);
        }
    }
}

fn render_attach(
    lines: &mut Vec<String>,
    cls_ident: &str,
    name: &str,
    policy: IfPresent,
    value: &str,
) {
    match policy {
        IfPresent::Replace => {
            lines.push(format!("    setattr({cls_ident}, {name:?}, {value})"));
        }
        IfPresent::Skip => {
            lines.push(format!("    if {name:?} not in {cls_ident}.__dict__:"));
            lines.push(format!("        setattr({cls_ident}, {name:?}, {value})"));
        }
        IfPresent::Error => {
            lines.push(format!("    if {name:?} in {cls_ident}.__dict__:"));
            lines.push(format!(
                "        raise AttributeError('cannot overwrite ' + {name:?})"
            ));
            lines.push(format!("    setattr({cls_ident}, {name:?}, {value})"));
        }
    }
}

/// Literal text for constant op values
fn const_text(v: &Value) -> String {
    v.repr()
}

fn self_tuple(fields: &[String], var: &str) -> String {
    if fields.is_empty() {
        return "()".into();
    }
    let items: Vec<String> = fields.iter().map(|f| format!("{var}.{f}")).collect();
    format!("({},)", items.join(", "))
}

fn render_body(lines: &mut Vec<String>, name: &str, body: &MethodBody) {
    match body {
        MethodBody::Init(plan) => {
            // Factory sentinels are evaluated when the def executes, so they
            // must already be bound in the attach function's scope.
            for (i, f) in plan.fields.iter().enumerate() {
                if matches!(f.default, DefaultPlan::Factory { .. }) {
                    lines.push(format!("    __dataclass_MISSING__{i} = object()"));
                }
            }
            let mut sig: Vec<String> = vec!["self".into()];
            let mut started_kw = false;
            for (i, f) in plan.fields.iter().enumerate() {
                if f.kw_only && !started_kw {
                    sig.push("*".into());
                    started_kw = true;
                }
                match &f.default {
                    DefaultPlan::Missing => sig.push(f.name.clone()),
                    DefaultPlan::Value { r#ref } => {
                        sig.push(format!("{}={}", f.name, r#ref.ident()))
                    }
                    DefaultPlan::Factory { .. } => {
                        sig.push(format!("{}=__dataclass_MISSING__{i}", f.name))
                    }
                }
            }
            lines.push(format!("    def {name}({}):", sig.join(", ")));
            let mut wrote = false;
            for (i, f) in plan.fields.iter().enumerate() {
                let n = &f.name;
                if let DefaultPlan::Factory { r#ref } = &f.default {
                    lines.push(format!(
                        "        if {n} is __dataclass_MISSING__{i}: {n} = {}()",
                        r#ref.ident()
                    ));
                    wrote = true;
                }
                match &f.coerce {
                    Some(CoercePlan::ToType { type_name }) => {
                        lines.push(format!("        {n} = {type_name}({n})"));
                        wrote = true;
                    }
                    Some(CoercePlan::Fn { r#ref }) => {
                        lines.push(format!("        {n} = {}({n})", r#ref.ident()));
                        wrote = true;
                    }
                    None => {}
                }
                match &f.check_type {
                    Some(CheckTypePlan::Type { type_name }) => {
                        lines.push(format!(
                            "        if not isinstance({n}, {type_name}): raise TypeError({n:?})"
                        ));
                        wrote = true;
                    }
                    Some(CheckTypePlan::Types { refs }) => {
                        let types: Vec<String> = refs.iter().map(|r| r.ident()).collect();
                        lines.push(format!(
                            "        if not isinstance({n}, ({})): raise TypeError({n:?})",
                            types.join(", ")
                        ));
                        wrote = true;
                    }
                    None => {}
                }
                if let Some(r) = &f.validate {
                    lines.push(format!(
                        "        if not {}({n}): raise ValueError({n:?})",
                        r.ident()
                    ));
                    wrote = true;
                }
                match f.store {
                    StorePlan::SetAttr => {
                        lines.push(format!("        self.{n} = {n}"));
                        wrote = true;
                    }
                    StorePlan::RawSet => {
                        lines.push(format!("        object.__setattr__(self, {n:?}, {n})"));
                        wrote = true;
                    }
                    StorePlan::DictSet => {
                        lines.push(format!("        self.__dict__[{n:?}] = {n}"));
                        wrote = true;
                    }
                    StorePlan::Skip => {}
                }
            }
            for p in &plan.post_sets {
                let store = match p.store {
                    StorePlan::SetAttr => format!("self.{} = ", p.name),
                    StorePlan::RawSet => {
                        format!("object.__setattr__(self, {:?}, ", p.name)
                    }
                    StorePlan::DictSet => format!("self.__dict__[{:?}] = ", p.name),
                    StorePlan::Skip => continue,
                };
                let close = if matches!(p.store, StorePlan::RawSet) { ")" } else { "" };
                lines.push(format!(
                    "        {store}{}(){close}",
                    p.factory.ident()
                ));
                wrote = true;
            }
            if plan.post_init {
                let params = plan.post_init_params.join(", ");
                lines.push(format!("        self.__post_init__({params})"));
                wrote = true;
            }
            for r in &plan.init_fns {
                lines.push(format!("        {}(self)", r.ident()));
                wrote = true;
            }
            for v in &plan.validate_fns {
                let params = v.params.join(", ");
                lines.push(format!(
                    "        if not {}({params}): raise ValueError({:?})",
                    v.r#ref.ident(),
                    v.r#ref.0
                ));
                wrote = true;
            }
            if !wrote {
                lines.push("        pass".into());
            }
        }
        MethodBody::Repr(plan) => {
            lines.push(format!("    def {name}(self):"));
            lines.push("        parts = []".into());
            for f in &plan.fields {
                let n = &f.name;
                let value_expr = match &f.fn_ref {
                    Some(r) => format!("{}(self.{n})", r.ident()),
                    None => format!("repr(self.{n})"),
                };
                if f.positional {
                    lines.push(format!("        parts.append({value_expr})"));
                } else {
                    lines.push(format!("        parts.append('{n}=' + {value_expr})"));
                }
            }
            let head = if plan.with_id {
                "f'{self.__class__.__qualname__}@{id(self):x}'"
            } else {
                "self.__class__.__qualname__"
            };
            lines.push(format!(
                "        return {head} + '(' + ', '.join(parts) + ')'"
            ));
        }
        MethodBody::Eq(plan) => {
            lines.push(format!("    def {name}(self, other):"));
            lines.push("        if self is other: return True".into());
            lines.push(
                "        if self.__class__ is not other.__class__: return NotImplemented".into(),
            );
            lines.push(format!(
                "        return {} == {}",
                self_tuple(&plan.fields, "self"),
                self_tuple(&plan.fields, "other")
            ));
        }
        MethodBody::Cmp { fields, op } => {
            lines.push(format!("    def {name}(self, other):"));
            lines.push(
                "        if self.__class__ is not other.__class__: return NotImplemented".into(),
            );
            lines.push(format!(
                "        return {} {} {}",
                self_tuple(fields, "self"),
                op.symbol(),
                self_tuple(fields, "other")
            ));
        }
        MethodBody::Hash { fields, cache } => {
            lines.push(format!("    def {name}(self):"));
            if *cache {
                lines.push(format!(
                    "        h = self.__dict__.get({:?})",
                    crate::class::HASH_CACHE_ATTR
                ));
                lines.push("        if h is not None: return h".into());
            }
            lines.push(format!("        h = hash({})", self_tuple(fields, "self")));
            if *cache {
                lines.push(format!(
                    "        self.__dict__[{:?}] = h",
                    crate::class::HASH_CACHE_ATTR
                ));
            }
            lines.push("        return h".into());
        }
        MethodBody::FrozenSetAttr(plan) | MethodBody::FrozenDelAttr(plan) => {
            let cls_ident = cls_ref().ident();
            let (sig, raise, fallthrough) = match body {
                MethodBody::FrozenSetAttr(_) => (
                    "self, name, value",
                    "FrozenInstanceError",
                    "object.__setattr__(self, name, value)",
                ),
                _ => (
                    "self, name",
                    "FrozenInstanceError",
                    "object.__delattr__(self, name)",
                ),
            };
            let field_set: Vec<String> = plan.fields.iter().map(|f| format!("{f:?}")).collect();
            lines.push(format!("    def {name}({sig}):"));
            if plan.allow_dynamic_dunder_attrs {
                lines.push(format!(
                    "        if name not in ({},) and name.startswith('__') and name.endswith('__'):",
                    field_set.join(", ")
                ));
                lines.push(format!("            {fallthrough}"));
                lines.push("            return".into());
            }
            lines.push(format!(
                "        if type(self) is {cls_ident} or name in ({},):",
                field_set.join(", ")
            ));
            lines.push(format!("            raise {raise}(name)"));
            lines.push(format!("        {fallthrough}"));
        }
        MethodBody::Copy(plan) => {
            let cls_ident = cls_ref().ident();
            lines.push(format!("    def {name}(self):"));
            lines.push(format!(
                "        if self.__class__ is not {cls_ident}: raise TypeError(self)"
            ));
            let kw: Vec<String> = plan
                .init_params
                .iter()
                .map(|p| format!("{p}=self.{p}"))
                .collect();
            lines.push(format!("        new = {cls_ident}({})", kw.join(", ")));
            for f in &plan.extra_fields {
                lines.push(format!("        new.__dict__[{f:?}] = self.__dict__[{f:?}]"));
            }
            lines.push("        return new".into());
        }
        MethodBody::DictGetter { field } => {
            lines.push(format!("    def {name}(self):"));
            lines.push(format!("        return self.__dict__[{field:?}]"));
        }
        MethodBody::DictSetter { field } => {
            lines.push(format!("    def {name}(self, value):"));
            lines.push(format!("        self.__dict__[{field:?}] = value"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{EqPlan, OpRef, Plans, RefMap};

    fn prepared_with(ops: Vec<Op>) -> Prepared {
        Prepared {
            plans: Plans::new(vec![]),
            refs: RefMap::new(),
            ops,
        }
    }

    #[test]
    fn test_params_are_sorted_ref_idents_plus_cls() {
        let cls = Class::new("Point");
        let op = Op::AddMethod {
            name: "__eq__".into(),
            body: MethodBody::Eq(EqPlan { fields: vec!["x".into()] }),
            refs: vec![OpRef::new("cls"), OpRef::new("init.fields.0.default")],
            if_present: IfPresent::Error,
        };
        let out = compile(&cls, &prepared_with(vec![op])).unwrap();
        assert_eq!(
            out.params,
            vec![
                "__dataclass__cls".to_string(),
                "__dataclass__init__fields__0__default".to_string(),
            ]
        );
        assert!(out.src.contains("def __dataclass_attach__Point("));
        assert!(out.src.contains("def __eq__(self, other):"));
        assert_eq!(out.cls_names, vec!["Point".to_string()]);
    }

    #[test]
    fn test_empty_op_list_renders_pass() {
        let cls = Class::new("Empty");
        let out = compile(&cls, &prepared_with(vec![])).unwrap();
        assert!(out.src.contains("    pass"));
    }

    #[test]
    fn test_empty_compare_tuple_renders_unit() {
        // every compare field may be opted out while eq stays on
        let cls = Class::new("Bare");
        let op = Op::AddMethod {
            name: "__eq__".into(),
            body: MethodBody::Eq(EqPlan { fields: vec![] }),
            refs: vec![],
            if_present: IfPresent::Error,
        };
        let out = compile(&cls, &prepared_with(vec![op])).unwrap();
        assert!(out.src.contains("return () == ()"));
        assert!(!out.src.contains("(,)"));
    }

    #[test]
    fn test_factory_sentinels_defined_before_init() {
        use crate::generate::{DefaultPlan, InitFieldPlan, InitPlan, StorePlan};
        let cls = Class::new("C");
        let op = Op::AddMethod {
            name: "__init__".into(),
            body: MethodBody::Init(InitPlan {
                fields: vec![InitFieldPlan {
                    name: "xs".into(),
                    annotation: "list".into(),
                    kw_only: false,
                    init_var: false,
                    default: DefaultPlan::Factory {
                        r#ref: OpRef::new("init.fields.0.default_factory"),
                    },
                    coerce: None,
                    check_type: None,
                    validate: None,
                    store: StorePlan::SetAttr,
                }],
                post_sets: vec![],
                frozen: false,
                post_init: false,
                post_init_params: vec![],
                init_fns: vec![],
                validate_fns: vec![],
            }),
            refs: vec![OpRef::new("init.fields.0.default_factory")],
            if_present: IfPresent::Error,
        };
        let out = compile(&cls, &prepared_with(vec![op])).unwrap();
        let sentinel_def = out
            .src
            .find("    __dataclass_MISSING__0 = object()")
            .expect("sentinel not defined");
        let init_def = out.src.find("def __init__(").expect("no init");
        assert!(sentinel_def < init_def);
        assert!(out.src.contains("xs=__dataclass_MISSING__0"));
    }

    #[test]
    fn test_set_attr_const_renders_literal() {
        let cls = Class::new("C");
        let op = Op::SetAttr {
            name: "__hash__".into(),
            value: OpValue::Const(Value::None),
            if_present: IfPresent::Replace,
        };
        let out = compile(&cls, &prepared_with(vec![op])).unwrap();
        assert!(out.src.contains("setattr(__dataclass__cls, \"__hash__\", None)"));
    }
}

//! Field harvesting
//!
//! Bridges the declarative spec model and a concrete class declaration:
//! resolves declared defaults out of the class body, classifies field kinds
//! from annotation markers, threads the keyword-only flag through `KW_ONLY`
//! sentinels, and merges inherited field tables base-to-derived the way the
//! eventual `__init__` signature needs them.

use std::collections::{BTreeMap, HashMap};

use crate::annotations::{AnnMarker, Annotation};
use crate::class::Class;
use crate::error::{Error, Result};
use crate::spec::{Coerce, FieldDefault, FieldKind, FieldSpec, TypeCheck};
use crate::value::{FnValue, Value};

/// Extension attributes carried alongside the standard per-field record so
/// spec round-trips lose nothing.
#[derive(Debug, Clone, Default)]
pub struct FieldExtras {
    pub coerce: Coerce,
    pub validate: Option<FnValue>,
    pub check_type: TypeCheck,
    pub override_: bool,
    pub repr_fn: Option<FnValue>,
    pub repr_priority: Option<i64>,
    pub doc: Option<String>,
}

/// The resolved per-field record the generators consume. Unlike `FieldSpec`
/// its `kw_only` is a settled bool and its default has been reconciled with
/// the class body.
#[derive(Debug, Clone)]
pub struct StdField {
    pub name: String,
    pub annotation: Annotation,
    pub default: FieldDefault,
    pub init: bool,
    pub repr: bool,
    pub hash: Option<bool>,
    pub compare: bool,
    pub kw_only: bool,
    pub kind: FieldKind,
    pub metadata: BTreeMap<String, Value>,
    pub extras: FieldExtras,
}

impl StdField {
    pub fn from_spec(spec: &FieldSpec, kw_only_default: bool) -> Self {
        StdField {
            name: spec.name.clone(),
            annotation: spec.annotation.clone(),
            default: spec.default.clone(),
            init: spec.init,
            repr: spec.repr,
            hash: spec.hash,
            compare: spec.compare,
            kw_only: spec.kw_only.unwrap_or(kw_only_default),
            kind: spec.kind,
            metadata: spec.metadata.clone(),
            extras: FieldExtras {
                coerce: spec.coerce.clone(),
                validate: spec.validate.clone(),
                check_type: spec.check_type.clone(),
                override_: spec.override_,
                repr_fn: spec.repr_fn.clone(),
                repr_priority: spec.repr_priority,
                doc: spec.doc.clone(),
            },
        }
    }

    pub fn to_spec(&self) -> FieldSpec {
        FieldSpec {
            name: self.name.clone(),
            annotation: self.annotation.clone(),
            default: self.default.clone(),
            init: self.init,
            repr: self.repr,
            hash: self.hash,
            compare: self.compare,
            kw_only: Some(self.kw_only),
            metadata: self.metadata.clone(),
            kind: self.kind,
            coerce: self.extras.coerce.clone(),
            validate: self.extras.validate.clone(),
            check_type: self.extras.check_type.clone(),
            override_: self.extras.override_,
            repr_fn: self.extras.repr_fn.clone(),
            repr_priority: self.extras.repr_priority,
            doc: self.extras.doc.clone(),
        }
    }

    /// Hash eligibility: `compare` unless `hash` is set explicitly
    pub fn hash_eligible(&self) -> bool {
        self.hash.unwrap_or(self.compare)
    }

    /// Participates in the generated `__init__` signature
    pub fn in_init(&self) -> bool {
        self.init && self.kind != FieldKind::ClassVar
    }

    /// Stored on the instance (class-vars and init-vars are not)
    pub fn stored(&self) -> bool {
        self.kind == FieldKind::Instance
    }
}

/// Resolve one annotated name into a `StdField`, reconciling any declared
/// default sitting in the class body (a field placeholder or a plain value).
pub fn build_std_field(
    cls: &Class,
    spec: &FieldSpec,
    kw_only_default: bool,
) -> Result<StdField> {
    let mut spec = spec.clone();
    match cls.own(&spec.name) {
        Some(Value::FieldDecl(decl)) => {
            // A placeholder in the class body supersedes any spec-list entry
            // for the same name, but the annotation comes from the class.
            let ann = spec.annotation.clone();
            spec = decl.as_ref().clone();
            spec.annotation = ann;
        }
        Some(v) => {
            if spec.default.is_missing() {
                spec.default = FieldDefault::Value(v);
            }
        }
        None => {}
    }
    spec.kind = match spec.annotation.marker() {
        Some(AnnMarker::ClassVar(_)) => FieldKind::ClassVar,
        Some(AnnMarker::InitVar(_)) => FieldKind::InitVar,
        _ => FieldKind::Instance,
    };
    if spec.kind == FieldKind::Instance {
        if let FieldDefault::Value(v) = &spec.default {
            if v.try_hash().is_err() {
                return Err(Error::Spec(format!(
                    "field {:?}: mutable default {} is not allowed, use a default factory",
                    spec.name,
                    v.type_name()
                )));
            }
        }
    }
    Ok(StdField::from_spec(&spec, kw_only_default))
}

/// Build the class's complete resolved field table: inherited tables merged
/// base-to-derived (most-derived wins, original position kept), then local
/// annotations in declaration order with `KW_ONLY` sentinel threading.
/// Reconciles class-body field placeholders into plain defaults.
pub fn build_cls_std_fields(cls: &Class, cs: &crate::spec::ClassSpec) -> Result<Vec<StdField>> {
    let mut fields: Vec<StdField> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut upsert = |fields: &mut Vec<StdField>, index: &mut HashMap<String, usize>, f: StdField| {
        match index.get(&f.name) {
            Some(&i) => fields[i] = f,
            None => {
                index.insert(f.name.clone(), fields.len());
                fields.push(f);
            }
        }
    };

    let mro = cls.mro();
    for base in mro.iter().skip(1).rev() {
        if let Some(base_fields) = base.fields() {
            for f in base_fields {
                upsert(&mut fields, &mut index, f);
            }
        }
    }

    let mut kw_only = cs.params.kw_only;
    let mut saw_marker = false;
    for (name, ann) in cls.annotations() {
        if ann.is_kw_only() {
            if saw_marker {
                return Err(Error::Type(format!(
                    "{}: only one KW_ONLY marker is allowed per class",
                    cls.name()
                )));
            }
            saw_marker = true;
            kw_only = true;
            continue;
        }
        let spec = match cs.field(&name) {
            Some(s) => s.as_ref().clone(),
            None => FieldSpec::builder(name.clone(), ann.clone()).build()?,
        };
        let mut spec = spec;
        spec.annotation = ann;
        let f = build_std_field(cls, &spec, kw_only)?;
        upsert(&mut fields, &mut index, f);
    }

    // A field placeholder in the class body without a matching annotation is
    // an error; with one it gets replaced by its resolved default (or
    // removed when there is none).
    let decls: Vec<(String, std::rc::Rc<FieldSpec>)> = cls
        .data()
        .namespace
        .iter()
        .filter_map(|(k, v)| match v {
            Value::FieldDecl(d) => Some((k.clone(), d.clone())),
            _ => None,
        })
        .collect();
    for (name, _) in &decls {
        if !index.contains_key(name) {
            return Err(Error::Type(format!(
                "{:?} is a field but has no type annotation",
                name
            )));
        }
        match &fields[index[name]].default {
            FieldDefault::Value(v) => cls.set(name.clone(), v.clone()),
            _ => {
                cls.remove(name);
            }
        }
    }

    Ok(fields)
}

/// Field-table introspection beyond the flat list: which class declared each
/// field, and concretized annotations for fields declared on generic
/// ancestors.
#[derive(Debug, Clone)]
pub struct FieldsInspection {
    pub owners: BTreeMap<String, Class>,
    pub generic_replaced_annotations: BTreeMap<String, Annotation>,
}

impl FieldsInspection {
    pub fn build(cls: &Class) -> Self {
        let mut owners: BTreeMap<String, Class> = BTreeMap::new();
        for c in cls.mro() {
            for (name, ann) in c.annotations() {
                if ann.is_kw_only() {
                    continue;
                }
                owners.entry(name).or_insert_with(|| c.clone());
            }
        }

        // Per-ancestor type-var substitution tables, composed along the
        // inheritance chain from the concrete class outward.
        let mut tables: HashMap<usize, Vec<(String, String)>> = HashMap::new();
        tables.insert(cls.addr(), Vec::new());
        let mut queue = vec![cls.clone()];
        while let Some(c) = queue.pop() {
            let own_table = tables.get(&c.addr()).cloned().unwrap_or_default();
            let (bases, base_args) = {
                let data = c.data();
                (data.bases.clone(), data.base_args.clone())
            };
            for (base, args) in bases.iter().zip(base_args.iter()) {
                if tables.contains_key(&base.addr()) {
                    continue;
                }
                let params = base.data().type_params.clone();
                let table: Vec<(String, String)> = params
                    .iter()
                    .zip(args.iter())
                    .map(|(p, a)| (p.clone(), a.substitute(&own_table).expr))
                    .collect();
                tables.insert(base.addr(), table);
                queue.push(base.clone());
            }
        }

        let mut replaced = BTreeMap::new();
        for (name, owner) in &owners {
            let table = match tables.get(&owner.addr()) {
                Some(t) if !t.is_empty() => t,
                _ => continue,
            };
            if let Some((_, ann)) = owner.annotations().iter().find(|(n, _)| n == name) {
                let sub = ann.substitute(table);
                if sub != *ann {
                    replaced.insert(name.clone(), sub);
                }
            }
        }

        FieldsInspection {
            owners,
            generic_replaced_annotations: replaced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ClassSpec;
    use std::rc::Rc;

    fn spec_of(fields: Vec<FieldSpec>) -> ClassSpec {
        ClassSpec::with_defaults(fields).unwrap()
    }

    #[test]
    fn test_round_trip_spec_std_spec() {
        let spec = FieldSpec::builder("x", "int")
            .default_value(Value::Int(3))
            .compare(false)
            .repr_priority(7)
            .doc("a field")
            .build()
            .unwrap();
        let std = StdField::from_spec(&spec, false);
        let back = std.to_spec();
        assert_eq!(back.name, "x");
        assert_eq!(back.kw_only, Some(false));
        assert_eq!(back.repr_priority, Some(7));
        assert_eq!(back.doc.as_deref(), Some("a field"));
        assert!(!back.compare);
    }

    #[test]
    fn test_class_body_plain_value_becomes_default() {
        let cls = Class::builder("C")
            .annotation("x", "int")
            .attr("x", Value::Int(42))
            .build();
        let fields = build_cls_std_fields(&cls, &spec_of(vec![])).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(matches!(fields[0].default, FieldDefault::Value(Value::Int(42))));
    }

    #[test]
    fn test_field_decl_reconciled_out_of_namespace() {
        let decl = FieldSpec::builder("x", "int")
            .default_value(Value::Int(5))
            .build()
            .unwrap();
        let cls = Class::builder("C")
            .annotation("x", "int")
            .attr("x", Value::FieldDecl(Rc::new(decl)))
            .build();
        let fields = build_cls_std_fields(&cls, &spec_of(vec![])).unwrap();
        assert!(matches!(fields[0].default, FieldDefault::Value(Value::Int(5))));
        assert!(matches!(cls.own("x"), Some(Value::Int(5))));

        let decl = FieldSpec::builder("y", "int").build().unwrap();
        let cls = Class::builder("C")
            .annotation("y", "int")
            .attr("y", Value::FieldDecl(Rc::new(decl)))
            .build();
        build_cls_std_fields(&cls, &spec_of(vec![])).unwrap();
        assert!(cls.own("y").is_none());
    }

    #[test]
    fn test_field_decl_without_annotation_rejected() {
        let decl = FieldSpec::builder("x", "int").build().unwrap();
        let cls = Class::builder("C")
            .attr("x", Value::FieldDecl(Rc::new(decl)))
            .build();
        assert!(build_cls_std_fields(&cls, &spec_of(vec![])).is_err());
    }

    #[test]
    fn test_kw_only_marker_flips_flag_once() {
        let cls = Class::builder("C")
            .annotation("a", "int")
            .annotation("_", "KW_ONLY")
            .annotation("b", "int")
            .build();
        let fields = build_cls_std_fields(&cls, &spec_of(vec![])).unwrap();
        assert!(!fields[0].kw_only);
        assert!(fields[1].kw_only);

        let cls = Class::builder("C")
            .annotation("_", "KW_ONLY")
            .annotation("_2", "dc.KW_ONLY")
            .build();
        assert!(build_cls_std_fields(&cls, &spec_of(vec![])).is_err());
    }

    #[test]
    fn test_inherited_fields_merge_most_derived_wins() {
        let base = Class::builder("B").annotation("x", "int").annotation("y", "int").build();
        let base_fields = build_cls_std_fields(&base, &spec_of(vec![])).unwrap();
        base.data_mut().fields = Some(base_fields);

        let derived = Class::builder("D")
            .base(base)
            .annotation("x", "str")
            .build();
        let fields = build_cls_std_fields(&derived, &spec_of(vec![])).unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["x", "y"]);
        assert_eq!(fields[0].annotation.expr, "str");
    }

    #[test]
    fn test_classvar_and_initvar_classified() {
        let cls = Class::builder("C")
            .annotation("a", "ClassVar[int]")
            .annotation("b", "InitVar[str]")
            .annotation("c", "int")
            .build();
        let fields = build_cls_std_fields(&cls, &spec_of(vec![])).unwrap();
        assert_eq!(fields[0].kind, FieldKind::ClassVar);
        assert_eq!(fields[1].kind, FieldKind::InitVar);
        assert_eq!(fields[2].kind, FieldKind::Instance);
    }

    #[test]
    fn test_generic_annotation_substitution() {
        let base = Class::builder("Box")
            .type_params(vec!["T".into()])
            .annotation("item", "T")
            .build();
        let derived = Class::builder("IntBox")
            .base_with_args(base, vec![Annotation::new("int")])
            .build();
        let insp = FieldsInspection::build(&derived);
        assert_eq!(
            insp.generic_replaced_annotations.get("item").map(|a| a.expr.as_str()),
            Some("int")
        );
    }
}

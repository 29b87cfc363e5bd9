//! Field and class specs
//!
//! `FieldSpec` and `ClassSpec` are the declarative inputs to the transform:
//! what the user wrote, fully validated, before any processing happens.
//! `FieldSpec::build()` is the only way to obtain one, so a constructed spec
//! is always internally consistent; `ClassSpec::new` likewise rejects
//! duplicate field names and contradictory switch combinations up front.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::annotations::{AnnMarker, Annotation};
use crate::error::{Error, Result};
use crate::value::{FnValue, TypeRef, Value};

/// What kind of field a declaration is, classified from its annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Ordinary per-instance field
    Instance,
    /// `ClassVar[...]` — excluded from init/repr/eq, lives on the class
    ClassVar,
    /// `InitVar[...]` — accepted by `__init__` and handed to
    /// `__post_init__`, never stored
    InitVar,
}

/// A field's declared default
#[derive(Debug, Clone)]
pub enum FieldDefault {
    Missing,
    Value(Value),
    Factory(FnValue),
}

impl FieldDefault {
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldDefault::Missing)
    }

    /// True when `__init__` can omit the argument
    pub fn is_present(&self) -> bool {
        !self.is_missing()
    }
}

/// Input coercion applied by generated `__init__` before storage
#[derive(Debug, Clone, Default)]
pub enum Coerce {
    #[default]
    Off,
    /// Coerce to the annotation's builtin type when one is recognized
    ToAnnotation,
    Fn(FnValue),
}

impl Coerce {
    pub fn is_off(&self) -> bool {
        matches!(self, Coerce::Off)
    }
}

/// Runtime type checking applied by generated `__init__`
#[derive(Debug, Clone, Default)]
pub enum TypeCheck {
    #[default]
    Off,
    /// Check against the annotation's builtin type when one is recognized
    Annotation,
    /// Check against an explicit list of acceptable types
    Types(Vec<TypeRef>),
}

impl TypeCheck {
    pub fn is_off(&self) -> bool {
        matches!(self, TypeCheck::Off)
    }
}

/// A fully validated field declaration
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub annotation: Annotation,
    pub default: FieldDefault,
    pub init: bool,
    pub repr: bool,
    /// Tri-state: `None` means "follow `compare`" for hash eligibility
    pub hash: Option<bool>,
    pub compare: bool,
    /// Tri-state: `None` means "inherit the class-level setting"
    pub kw_only: Option<bool>,
    pub metadata: BTreeMap<String, Value>,
    pub kind: FieldKind,
    pub coerce: Coerce,
    pub validate: Option<FnValue>,
    pub check_type: TypeCheck,
    pub override_: bool,
    pub repr_fn: Option<FnValue>,
    pub repr_priority: Option<i64>,
    pub doc: Option<String>,
}

impl FieldSpec {
    pub fn builder(name: impl Into<String>, annotation: impl Into<Annotation>) -> FieldSpecBuilder {
        FieldSpecBuilder {
            spec: FieldSpec {
                name: name.into(),
                annotation: annotation.into(),
                default: FieldDefault::Missing,
                init: true,
                repr: true,
                hash: None,
                compare: true,
                kw_only: None,
                metadata: BTreeMap::new(),
                kind: FieldKind::Instance,
                coerce: Coerce::Off,
                validate: None,
                check_type: TypeCheck::Off,
                override_: false,
                repr_fn: None,
                repr_priority: None,
                doc: None,
            },
            explicit_kind: false,
        }
    }

    /// Hash eligibility: `compare` unless `hash` is set explicitly
    pub fn hash_eligible(&self) -> bool {
        self.hash.unwrap_or(self.compare)
    }
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Validating builder; `build()` is the only way to get a `FieldSpec`.
pub struct FieldSpecBuilder {
    spec: FieldSpec,
    explicit_kind: bool,
}

impl FieldSpecBuilder {
    pub fn default_value(mut self, v: Value) -> Self {
        self.spec.default = FieldDefault::Value(v);
        self
    }

    pub fn default_factory(mut self, f: FnValue) -> Self {
        self.spec.default = FieldDefault::Factory(f);
        self
    }

    pub fn init(mut self, v: bool) -> Self {
        self.spec.init = v;
        self
    }

    pub fn repr(mut self, v: bool) -> Self {
        self.spec.repr = v;
        self
    }

    pub fn hash(mut self, v: Option<bool>) -> Self {
        self.spec.hash = v;
        self
    }

    pub fn compare(mut self, v: bool) -> Self {
        self.spec.compare = v;
        self
    }

    pub fn kw_only(mut self, v: Option<bool>) -> Self {
        self.spec.kw_only = v;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, v: Value) -> Self {
        self.spec.metadata.insert(key.into(), v);
        self
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.spec.kind = kind;
        self.explicit_kind = true;
        self
    }

    pub fn coerce(mut self, c: Coerce) -> Self {
        self.spec.coerce = c;
        self
    }

    pub fn validate(mut self, f: FnValue) -> Self {
        self.spec.validate = Some(f);
        self
    }

    pub fn check_type(mut self, t: TypeCheck) -> Self {
        self.spec.check_type = t;
        self
    }

    pub fn override_(mut self, v: bool) -> Self {
        self.spec.override_ = v;
        self
    }

    pub fn repr_fn(mut self, f: FnValue) -> Self {
        self.spec.repr_fn = Some(f);
        self
    }

    pub fn repr_priority(mut self, p: i64) -> Self {
        self.spec.repr_priority = Some(p);
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.spec.doc = Some(doc.into());
        self
    }

    pub fn build(mut self) -> Result<FieldSpec> {
        if !is_identifier(&self.spec.name) {
            return Err(Error::Spec(format!(
                "field name is not a valid identifier: {:?}",
                self.spec.name
            )));
        }
        if !self.explicit_kind {
            self.spec.kind = match self.spec.annotation.marker() {
                Some(AnnMarker::ClassVar(_)) => FieldKind::ClassVar,
                Some(AnnMarker::InitVar(_)) => FieldKind::InitVar,
                _ => FieldKind::Instance,
            };
        }
        let s = &self.spec;
        match s.kind {
            FieldKind::ClassVar | FieldKind::InitVar => {
                if matches!(s.default, FieldDefault::Factory(_)) {
                    return Err(Error::Spec(format!(
                        "field {:?}: class-var and init-var fields cannot have a default factory",
                        s.name
                    )));
                }
            }
            FieldKind::Instance => {}
        }
        if s.kind == FieldKind::ClassVar {
            if s.kw_only.is_some() {
                return Err(Error::Spec(format!(
                    "field {:?}: class-var fields cannot be keyword-only",
                    s.name
                )));
            }
            if !s.coerce.is_off() || s.validate.is_some() || !s.check_type.is_off() {
                return Err(Error::Spec(format!(
                    "field {:?}: class-var fields cannot coerce, validate, or type-check",
                    s.name
                )));
            }
        }
        if s.kind == FieldKind::Instance {
            if let FieldDefault::Value(v) = &s.default {
                if v.try_hash().is_err() {
                    return Err(Error::Spec(format!(
                        "field {:?}: mutable default {} is not allowed, use a default factory",
                        s.name,
                        v.type_name()
                    )));
                }
            }
        }
        Ok(self.spec)
    }
}

/// The standard class-level switches
#[derive(Debug, Clone, Copy)]
pub struct ClassParams {
    pub init: bool,
    pub repr: bool,
    pub eq: bool,
    pub order: bool,
    pub unsafe_hash: bool,
    pub frozen: bool,
    pub match_args: bool,
    pub kw_only: bool,
    pub slots: bool,
    pub weakref_slot: bool,
}

impl Default for ClassParams {
    fn default() -> Self {
        Self {
            init: true,
            repr: true,
            eq: true,
            order: false,
            unsafe_hash: false,
            frozen: false,
            match_args: true,
            kw_only: false,
            slots: false,
            weakref_slot: false,
        }
    }
}

/// Extension switches beyond the standard set
#[derive(Debug, Clone, Default)]
pub struct ClassParamsExtras {
    /// Move defaultless params ahead of defaulted ones in `__init__`
    pub reorder: bool,
    /// Memoize `__hash__` into a reserved instance slot
    pub cache_hash: bool,
    /// Concretize annotations inherited from generic ancestors
    pub generic_init: bool,
    /// Generate per-field properties backed by the instance dict
    pub override_: bool,
    /// Frozen guard admits non-field dunder attributes
    pub allow_dynamic_dunder_attrs: bool,
    /// Include the instance address in generated reprs
    pub repr_id: bool,
    /// Terse repr: init order, positional fields without `name=`
    pub terse_repr: bool,
    /// Class-wide fallback repr fn for fields without their own
    pub default_repr_fn: Option<FnValue>,
    pub allow_redundant_decorator: bool,
}

/// A whole-object validator plus the field names it wants as arguments
#[derive(Debug, Clone)]
pub struct SpecValidateFn {
    pub fn_: FnValue,
    pub params: Vec<String>,
}

/// The full declarative input for one class transform
#[derive(Clone)]
pub struct ClassSpec {
    pub fields: Vec<Rc<FieldSpec>>,
    pub params: ClassParams,
    pub extras: ClassParamsExtras,
    /// Ordered opaque metadata; later entries shadow earlier ones per type
    pub metadata: Vec<Rc<dyn Any>>,
    /// Extra callables run at the end of generated `__init__`
    pub init_fns: Vec<FnValue>,
    pub validate_fns: Vec<SpecValidateFn>,
}

impl std::fmt::Debug for ClassSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassSpec")
            .field("fields", &self.fields)
            .field("params", &self.params)
            .field("extras", &self.extras)
            .field("metadata", &format_args!("[{} entries]", self.metadata.len()))
            .field("init_fns", &self.init_fns)
            .field("validate_fns", &self.validate_fns)
            .finish()
    }
}

impl ClassSpec {
    pub fn new(
        fields: Vec<FieldSpec>,
        params: ClassParams,
        extras: ClassParamsExtras,
    ) -> Result<Self> {
        if params.order && !params.eq {
            return Err(Error::Spec("order requires eq".into()));
        }
        if params.weakref_slot && !params.slots {
            return Err(Error::Spec("weakref_slot requires slots".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for f in &fields {
            if !seen.insert(f.name.clone()) {
                return Err(Error::Spec(format!("duplicate field name: {:?}", f.name)));
            }
        }
        Ok(Self {
            fields: fields.into_iter().map(Rc::new).collect(),
            params,
            extras,
            metadata: Vec::new(),
            init_fns: Vec::new(),
            validate_fns: Vec::new(),
        })
    }

    pub fn with_defaults(fields: Vec<FieldSpec>) -> Result<Self> {
        Self::new(fields, ClassParams::default(), ClassParamsExtras::default())
    }

    pub fn field(&self, name: &str) -> Option<&Rc<FieldSpec>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn add_metadata(&mut self, item: Rc<dyn Any>) {
        self.metadata.push(item);
    }

    /// Most recently attached metadata entry of type `T`
    pub fn get_last_metadata<T: 'static>(&self) -> Option<Rc<T>> {
        self.metadata
            .iter()
            .rev()
            .find_map(|m| m.clone().downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_bad_identifier() {
        assert!(FieldSpec::builder("", "int").build().is_err());
        assert!(FieldSpec::builder("1x", "int").build().is_err());
        assert!(FieldSpec::builder("x y", "int").build().is_err());
        assert!(FieldSpec::builder("_ok2", "int").build().is_ok());
    }

    #[test]
    fn test_kind_classified_from_annotation() {
        let f = FieldSpec::builder("x", "ClassVar[int]").build().unwrap();
        assert_eq!(f.kind, FieldKind::ClassVar);
        let f = FieldSpec::builder("x", "InitVar[str]").build().unwrap();
        assert_eq!(f.kind, FieldKind::InitVar);
        let f = FieldSpec::builder("x", "int").build().unwrap();
        assert_eq!(f.kind, FieldKind::Instance);
    }

    #[test]
    fn test_classvar_restrictions() {
        assert!(FieldSpec::builder("x", "ClassVar[int]")
            .default_factory(FnValue::new("f", |_| Ok(Value::Int(0))))
            .build()
            .is_err());
        assert!(FieldSpec::builder("x", "ClassVar[int]")
            .kw_only(Some(true))
            .build()
            .is_err());
        assert!(FieldSpec::builder("x", "ClassVar[int]")
            .check_type(TypeCheck::Annotation)
            .build()
            .is_err());
        assert!(FieldSpec::builder("x", "ClassVar[int]")
            .default_value(Value::Int(3))
            .build()
            .is_ok());
    }

    #[test]
    fn test_mutable_default_rejected() {
        let err = FieldSpec::builder("xs", "list")
            .default_value(Value::list(vec![]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mutable default"));
        assert!(FieldSpec::builder("xs", "list")
            .default_factory(FnValue::new("list", |_| Ok(Value::list(vec![]))))
            .build()
            .is_ok());
    }

    #[test]
    fn test_class_spec_invariants() {
        let f = |n: &str| FieldSpec::builder(n, "int").build().unwrap();
        assert!(ClassSpec::with_defaults(vec![f("a"), f("a")]).is_err());

        let params = ClassParams {
            order: true,
            eq: false,
            ..Default::default()
        };
        assert!(ClassSpec::new(vec![f("a")], params, Default::default()).is_err());

        let params = ClassParams {
            weakref_slot: true,
            slots: false,
            ..Default::default()
        };
        assert!(ClassSpec::new(vec![f("a")], params, Default::default()).is_err());
    }

    #[test]
    fn test_last_metadata_wins() {
        let mut cs = ClassSpec::with_defaults(vec![]).unwrap();
        cs.add_metadata(Rc::new(1i64));
        cs.add_metadata(Rc::new("tag"));
        cs.add_metadata(Rc::new(2i64));
        assert_eq!(*cs.get_last_metadata::<i64>().unwrap(), 2);
        assert_eq!(*cs.get_last_metadata::<&str>().unwrap(), "tag");
        assert!(cs.get_last_metadata::<f64>().is_none());
    }

    #[test]
    fn test_hash_eligibility_follows_compare() {
        let f = FieldSpec::builder("x", "int").compare(false).build().unwrap();
        assert!(!f.hash_eligible());
        let f = FieldSpec::builder("x", "int")
            .compare(false)
            .hash(Some(true))
            .build()
            .unwrap();
        assert!(f.hash_eligible());
    }
}

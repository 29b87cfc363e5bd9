//! Runtime values — the host object model's value universe
//!
//! The transform engine operates on an explicit dynamic object model rather
//! than a reflective host. `Value` is the closed sum of everything that can
//! sit in a class namespace, an instance dict, a field default, or a ref-map:
//! scalars, immutable tuples, mutable containers (deliberately unhashable,
//! which is what rejects mutable field defaults), callables, properties,
//! classes, instances, and field-declaration placeholders.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::class::{Class, Instance};
use crate::error::{Error, Result};
use crate::spec::FieldSpec;

/// Positional and keyword arguments for a callable
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub pos: Vec<Value>,
    pub kw: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(pos: Vec<Value>) -> Self {
        Self { pos, kw: Vec::new() }
    }

    pub fn keyword(kw: Vec<(String, Value)>) -> Self {
        Self { pos: Vec::new(), kw }
    }

    /// Required positional argument at `idx`
    pub fn arg(&self, idx: usize) -> Result<&Value> {
        self.pos
            .get(idx)
            .ok_or_else(|| Error::Call(format!("missing positional argument {idx}")))
    }

    /// Required positional argument at `idx`, as an instance
    pub fn instance(&self, idx: usize) -> Result<Instance> {
        match self.arg(idx)? {
            Value::Instance(inst) => Ok(inst.clone()),
            other => Err(Error::Call(format!(
                "argument {idx} expected an instance, got {}",
                other.type_name()
            ))),
        }
    }
}

/// A native callable value
#[derive(Clone)]
pub struct FnValue {
    pub name: String,
    pub is_abstract: bool,
    f: Rc<dyn Fn(&CallArgs) -> Result<Value>>,
}

impl FnValue {
    pub fn new(name: impl Into<String>, f: impl Fn(&CallArgs) -> Result<Value> + 'static) -> Self {
        Self {
            name: name.into(),
            is_abstract: false,
            f: Rc::new(f),
        }
    }

    /// An abstract method stub: recorded in the class's abstract set, calling
    /// it is an error.
    pub fn new_abstract(name: impl Into<String>) -> Self {
        let name = name.into();
        let msg = format!("abstract method {name} called");
        Self {
            name,
            is_abstract: true,
            f: Rc::new(move |_| Err(Error::Call(msg.clone()))),
        }
    }

    pub fn call(&self, args: &CallArgs) -> Result<Value> {
        (self.f)(args)
    }

    /// Convenience for simple positional calls (factories, validators)
    pub fn call_pos(&self, pos: Vec<Value>) -> Result<Value> {
        self.call(&CallArgs::positional(pos))
    }

    /// Identity comparison; two fn values are the same only if they share
    /// the underlying closure.
    pub fn is(&self, other: &FnValue) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for FnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name)
    }
}

/// A property: getter plus optional setter, consulted by the instance
/// attribute protocol before the instance dict.
#[derive(Debug, Clone)]
pub struct PropertyValue {
    pub get: FnValue,
    pub set: Option<FnValue>,
}

/// A runtime type reference, used by generated isinstance checks
#[derive(Debug, Clone)]
pub enum TypeRef {
    None,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Map,
    Class(Class),
}

impl TypeRef {
    pub fn name(&self) -> String {
        match self {
            TypeRef::None => "NoneType".into(),
            TypeRef::Bool => "bool".into(),
            TypeRef::Int => "int".into(),
            TypeRef::Float => "float".into(),
            TypeRef::Str => "str".into(),
            TypeRef::Tuple => "tuple".into(),
            TypeRef::List => "list".into(),
            TypeRef::Map => "map".into(),
            TypeRef::Class(c) => c.name(),
        }
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeRef::Class(a), TypeRef::Class(b)) => a.is(b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

/// A runtime value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    /// Comparison-protocol sentinel returned by generated `__eq__` when the
    /// operand classes differ.
    NotImplemented,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Immutable, hashable sequence
    Tuple(Rc<Vec<Value>>),
    /// Mutable, unhashable sequence
    List(Rc<RefCell<Vec<Value>>>),
    /// Mutable, unhashable mapping
    Map(Rc<RefCell<BTreeMap<String, Value>>>),
    Type(TypeRef),
    Fn(FnValue),
    Property(Rc<PropertyValue>),
    Class(Class),
    Instance(Instance),
    /// A field declaration sitting in a class body where a plain default
    /// value would otherwise be; reconciled away during field harvesting.
    FieldDecl(Rc<FieldSpec>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(items: BTreeMap<String, Value>) -> Value {
        Value::Map(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::NotImplemented => "NotImplementedType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::List(_) => "list".into(),
            Value::Map(_) => "map".into(),
            Value::Type(_) => "type".into(),
            Value::Fn(_) => "function".into(),
            Value::Property(_) => "property".into(),
            Value::Class(_) => "type".into(),
            Value::Instance(i) => i.class().name(),
            Value::FieldDecl(_) => "field".into(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None | Value::NotImplemented => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            _ => true,
        }
    }

    /// Structural equality; instances dispatch through their class `__eq__`.
    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_value(y))
            }
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_value(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.eq_value(vb))
            }
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Fn(a), Value::Fn(b)) => a.is(b),
            (Value::Class(a), Value::Class(b)) => a.is(b),
            (Value::Instance(a), Value::Instance(b)) => {
                crate::class::instance_eq(a, b).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Fallible hash; mutable containers and callables are unhashable, which
    /// is what rejects mutable literal field defaults.
    pub fn try_hash(&self) -> Result<u64> {
        let mut h = DefaultHasher::new();
        self.hash_into(&mut h)?;
        Ok(h.finish())
    }

    fn hash_into(&self, h: &mut DefaultHasher) -> Result<()> {
        match self {
            Value::None => 0u8.hash(h),
            Value::NotImplemented => 1u8.hash(h),
            Value::Bool(b) => b.hash(h),
            Value::Int(i) => i.hash(h),
            Value::Float(f) => f.to_bits().hash(h),
            Value::Str(s) => s.hash(h),
            Value::Tuple(t) => {
                for v in t.iter() {
                    v.hash_into(h)?;
                }
            }
            Value::List(_) => {
                return Err(Error::Spec("unhashable type: list".into()));
            }
            Value::Map(_) => {
                return Err(Error::Spec("unhashable type: map".into()));
            }
            Value::Type(t) => t.name().hash(h),
            Value::Fn(_) | Value::Property(_) | Value::FieldDecl(_) => {
                return Err(Error::Spec(format!("unhashable type: {}", self.type_name())));
            }
            Value::Class(c) => c.addr().hash(h),
            Value::Instance(i) => crate::class::instance_hash(i)?.hash(h),
        }
        Ok(())
    }

    /// Ordering comparison for generated order operators
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a
                .partial_cmp(b)
                .ok_or_else(|| Error::Type("unordered float comparison".into())),
            (Value::Int(a), Value::Float(b)) => (*a as f64)
                .partial_cmp(b)
                .ok_or_else(|| Error::Type("unordered float comparison".into())),
            (Value::Float(a), Value::Int(b)) => a
                .partial_cmp(&(*b as f64))
                .ok_or_else(|| Error::Type("unordered float comparison".into())),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Ok(ord),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            (a, b) => Err(Error::Type(format!(
                "'<' not supported between {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// isinstance check against a type reference
    pub fn isinstance(&self, t: &TypeRef) -> bool {
        match (self, t) {
            (Value::None, TypeRef::None) => true,
            (Value::Bool(_), TypeRef::Bool) => true,
            (Value::Int(_), TypeRef::Int) => true,
            (Value::Float(_), TypeRef::Float) => true,
            // bool passes for int, matching the host's numeric tower
            (Value::Bool(_), TypeRef::Int) => true,
            (Value::Int(_), TypeRef::Float) => true,
            (Value::Str(_), TypeRef::Str) => true,
            (Value::Tuple(_), TypeRef::Tuple) => true,
            (Value::List(_), TypeRef::List) => true,
            (Value::Map(_), TypeRef::Map) => true,
            (Value::Instance(i), TypeRef::Class(c)) => {
                i.class().mro().iter().any(|b| b.is(c))
            }
            _ => false,
        }
    }

    /// Source-style display used by generated `__repr__`: strings are
    /// single-quoted, containers recurse.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::NotImplemented => "NotImplemented".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::Tuple(t) => {
                let items: Vec<_> = t.iter().map(Value::repr).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    format!("({})", items.join(", "))
                }
            }
            Value::List(l) => {
                let items: Vec<_> = l.borrow().iter().map(Value::repr).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let items: Vec<_> = m
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Type(t) => format!("<type {}>", t.name()),
            Value::Fn(f) => format!("<fn {}>", f.name),
            Value::Property(_) => "<property>".into(),
            Value::Class(c) => format!("<class {}>", c.qualname()),
            Value::Instance(i) => crate::class::instance_repr(i),
            Value::FieldDecl(f) => format!("<field {}>", f.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_equality() {
        assert!(Value::Int(3).eq_value(&Value::Int(3)));
        assert!(Value::Int(3).eq_value(&Value::Float(3.0)));
        assert!(!Value::str("a").eq_value(&Value::str("b")));
    }

    #[test]
    fn test_mutable_containers_unhashable() {
        assert!(Value::Int(1).try_hash().is_ok());
        assert!(Value::tuple(vec![Value::Int(1), Value::str("x")]).try_hash().is_ok());
        assert!(Value::list(vec![]).try_hash().is_err());
        assert!(Value::map(Default::default()).try_hash().is_err());
    }

    #[test]
    fn test_repr_strings_single_quoted() {
        assert_eq!(Value::str("hi").repr(), "'hi'");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(Value::None.repr(), "None");
        assert_eq!(
            Value::tuple(vec![Value::Int(1)]).repr(),
            "(1,)"
        );
    }

    #[test]
    fn test_tuple_compare_lexicographic() {
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&a).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_isinstance_numeric_tower() {
        assert!(Value::Bool(true).isinstance(&TypeRef::Int));
        assert!(Value::Int(1).isinstance(&TypeRef::Float));
        assert!(!Value::Float(1.0).isinstance(&TypeRef::Int));
    }
}

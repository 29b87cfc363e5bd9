//! The class/instance object model the transform acts on
//!
//! A reflective host hands the transform a live class object; here the class
//! is an explicit shared handle: namespace, ordered local annotations, an
//! explicit ancestor chain (instead of runtime MRO discovery), optional
//! `__slots__`, and the field table / params snapshot the transform fills in.
//!
//! The instance attribute protocol is where generated methods bite:
//! `set_attr`/`del_attr` dispatch through class-level `__setattr__`/
//! `__delattr__` hooks (the frozen guards), properties shadow the instance
//! dict, and `raw_set`/`dict_set` give generated `__init__` the storage
//! bypasses it needs for frozen and override fields.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;

use crate::annotations::Annotation;
use crate::error::{Error, Result};
use crate::reflect::StdField;
use crate::spec::ClassParams;
use crate::value::{CallArgs, FnValue, Value};

/// Reserved prefix for internally generated attribute names; user fields may
/// not collide with it.
pub const RESERVED_PREFIX: &str = "__dataclass";

/// Instance-dict key used by hash-cache memoization
pub const HASH_CACHE_ATTR: &str = "__dataclass_hash__";

pub const POST_INIT_NAME: &str = "__post_init__";

#[derive(Debug)]
pub struct ClassData {
    pub name: String,
    pub module: String,
    pub qualname: String,
    pub bases: Vec<Class>,
    /// Generic arguments supplied to each base, parallel to `bases`
    pub base_args: Vec<Vec<Annotation>>,
    /// Generic type parameters declared by this class
    pub type_params: Vec<String>,
    pub namespace: BTreeMap<String, Value>,
    /// Locally declared annotations, in declaration order
    pub annotations: Vec<(String, Annotation)>,
    pub slots: Option<Vec<String>>,
    pub abstract_methods: BTreeSet<String>,
    pub doc: Option<String>,
    /// Resolved field table, set by the transform
    pub fields: Option<Vec<StdField>>,
    /// Transform params snapshot, set by the transform; read by
    /// frozen-inheritance checks on subclasses
    pub params: Option<ClassParams>,
}

/// Shared mutable class handle
#[derive(Clone)]
pub struct Class(Rc<RefCell<ClassData>>);

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<class {}>", self.qualname())
    }
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Class(Rc::new(RefCell::new(ClassData {
            qualname: name.clone(),
            name,
            module: "__main__".into(),
            bases: Vec::new(),
            base_args: Vec::new(),
            type_params: Vec::new(),
            namespace: BTreeMap::new(),
            annotations: Vec::new(),
            slots: None,
            abstract_methods: BTreeSet::new(),
            doc: None,
            fields: None,
            params: None,
        })))
    }

    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder { cls: Class::new(name) }
    }

    pub fn from_data(data: ClassData) -> Self {
        Class(Rc::new(RefCell::new(data)))
    }

    pub fn data(&self) -> std::cell::Ref<'_, ClassData> {
        self.0.borrow()
    }

    pub fn data_mut(&self) -> std::cell::RefMut<'_, ClassData> {
        self.0.borrow_mut()
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn module(&self) -> String {
        self.0.borrow().module.clone()
    }

    pub fn qualname(&self) -> String {
        self.0.borrow().qualname.clone()
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Identity comparison
    pub fn is(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Self followed by linearized ancestors, most-derived first
    pub fn mro(&self) -> Vec<Class> {
        let mut out: Vec<Class> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        fn walk(cls: &Class, out: &mut Vec<Class>, seen: &mut HashSet<usize>) {
            if !seen.insert(cls.addr()) {
                return;
            }
            out.push(cls.clone());
            let bases = cls.0.borrow().bases.clone();
            for b in &bases {
                walk(b, out, seen);
            }
        }
        walk(self, &mut out, &mut seen);
        out
    }

    /// Attribute defined directly on this class, not inherited
    pub fn own(&self, name: &str) -> Option<Value> {
        self.0.borrow().namespace.get(name).cloned()
    }

    /// Attribute lookup along the ancestor chain
    pub fn lookup(&self, name: &str) -> Option<Value> {
        for cls in self.mro() {
            if let Some(v) = cls.own(name) {
                return Some(v);
            }
        }
        None
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().namespace.insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().namespace.remove(name)
    }

    /// `set_new_attribute` semantics: returns true (and leaves the class
    /// untouched) when the name is already present in the class's own
    /// namespace.
    pub fn set_new(&self, name: &str, value: Value) -> bool {
        if self.0.borrow().namespace.contains_key(name) {
            return true;
        }
        self.set(name, value);
        false
    }

    pub fn annotations(&self) -> Vec<(String, Annotation)> {
        self.0.borrow().annotations.clone()
    }

    pub fn fields(&self) -> Option<Vec<StdField>> {
        self.0.borrow().fields.clone()
    }

    pub fn field(&self, name: &str) -> Option<StdField> {
        self.0
            .borrow()
            .fields
            .as_ref()
            .and_then(|fs| fs.iter().find(|f| f.name == name).cloned())
    }

    pub fn params(&self) -> Option<ClassParams> {
        self.0.borrow().params.clone()
    }

    pub fn slots(&self) -> Option<Vec<String>> {
        self.0.borrow().slots.clone()
    }

    /// Slot names available to instances of this class, across the chain
    pub fn all_slots(&self) -> Option<BTreeSet<String>> {
        let mut any = false;
        let mut out = BTreeSet::new();
        for cls in self.mro() {
            if let Some(sl) = cls.slots() {
                any = true;
                out.extend(sl);
            }
        }
        any.then_some(out)
    }

    /// Recompute the abstract-method set: a name is abstract when its
    /// most-derived definition along the chain is still an abstract stub.
    pub fn update_abstract_methods(&self) {
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for cls in self.mro() {
            for (name, v) in cls.0.borrow().namespace.iter() {
                if matches!(v, Value::Fn(f) if f.is_abstract) {
                    candidates.insert(name.clone());
                }
            }
        }
        let resolved: BTreeSet<String> = candidates
            .into_iter()
            .filter(|name| matches!(self.lookup(name), Some(Value::Fn(f)) if f.is_abstract))
            .collect();
        self.0.borrow_mut().abstract_methods = resolved;
    }

    /// Construct an instance: reject abstract classes, allocate, run
    /// `__init__` when present.
    pub fn call(&self, args: CallArgs) -> Result<Value> {
        {
            let data = self.0.borrow();
            if !data.abstract_methods.is_empty() {
                return Err(Error::Type(format!(
                    "Can't instantiate abstract class {} with abstract methods {}",
                    data.name,
                    data.abstract_methods
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }
        let inst = Instance::alloc(self.clone());
        match self.lookup("__init__") {
            Some(Value::Fn(init)) => {
                let mut full = args;
                full.pos.insert(0, Value::Instance(inst.clone()));
                init.call(&full)?;
            }
            Some(other) => {
                return Err(Error::Type(format!(
                    "__init__ of {} is not callable: {}",
                    self.name(),
                    other.type_name()
                )));
            }
            None => {
                if !args.pos.is_empty() || !args.kw.is_empty() {
                    return Err(Error::Type(format!(
                        "{}() takes no arguments",
                        self.name()
                    )));
                }
            }
        }
        Ok(Value::Instance(inst))
    }
}

/// Fluent construction for class declarations, mainly used by front ends
/// and tests.
pub struct ClassBuilder {
    cls: Class,
}

impl ClassBuilder {
    pub fn module(self, module: impl Into<String>) -> Self {
        self.cls.0.borrow_mut().module = module.into();
        self
    }

    pub fn qualname(self, qualname: impl Into<String>) -> Self {
        self.cls.0.borrow_mut().qualname = qualname.into();
        self
    }

    pub fn base(self, base: Class) -> Self {
        self.base_with_args(base, Vec::new())
    }

    pub fn base_with_args(self, base: Class, args: Vec<Annotation>) -> Self {
        {
            let mut data = self.cls.0.borrow_mut();
            data.bases.push(base);
            data.base_args.push(args);
        }
        self
    }

    pub fn type_params(self, params: Vec<String>) -> Self {
        self.cls.0.borrow_mut().type_params = params;
        self
    }

    pub fn annotation(self, name: impl Into<String>, ann: impl Into<Annotation>) -> Self {
        self.cls
            .0
            .borrow_mut()
            .annotations
            .push((name.into(), ann.into()));
        self
    }

    pub fn attr(self, name: impl Into<String>, value: Value) -> Self {
        self.cls.0.borrow_mut().namespace.insert(name.into(), value);
        self
    }

    pub fn doc(self, doc: impl Into<String>) -> Self {
        self.cls.0.borrow_mut().doc = Some(doc.into());
        self
    }

    pub fn build(self) -> Class {
        self.cls
    }
}

#[derive(Debug)]
pub struct InstanceData {
    pub class: Class,
    pub dict: BTreeMap<String, Value>,
}

/// Shared mutable instance handle
#[derive(Clone)]
pub struct Instance(Rc<RefCell<InstanceData>>);

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} instance>", self.class().qualname())
    }
}

impl Instance {
    pub fn alloc(class: Class) -> Self {
        Instance(Rc::new(RefCell::new(InstanceData {
            class,
            dict: BTreeMap::new(),
        })))
    }

    pub fn class(&self) -> Class {
        self.0.borrow().class.clone()
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn is(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Attribute read: class properties first, then the instance dict, then
    /// class attributes.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        let class = self.class();
        if let Some(Value::Property(prop)) = class.lookup(name) {
            return prop.get.call_pos(vec![Value::Instance(self.clone())]);
        }
        if let Some(v) = self.0.borrow().dict.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = class.lookup(name) {
            return Ok(v);
        }
        Err(Error::Attribute {
            class: class.name(),
            name: name.into(),
        })
    }

    /// Attribute write through the class `__setattr__` hook when one exists
    /// (generated frozen guards live there), else a property setter, else
    /// raw storage.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        let class = self.class();
        if let Some(Value::Fn(hook)) = class.lookup("__setattr__") {
            hook.call_pos(vec![
                Value::Instance(self.clone()),
                Value::str(name),
                value,
            ])?;
            return Ok(());
        }
        if let Some(Value::Property(prop)) = class.lookup(name) {
            return match &prop.set {
                Some(set) => {
                    set.call_pos(vec![Value::Instance(self.clone()), value])?;
                    Ok(())
                }
                None => Err(Error::Attribute {
                    class: class.name(),
                    name: format!("{name} (read-only property)"),
                }),
            };
        }
        self.raw_set(name, value)
    }

    /// Attribute delete through the class `__delattr__` hook when one exists
    pub fn del_attr(&self, name: &str) -> Result<()> {
        let class = self.class();
        if let Some(Value::Fn(hook)) = class.lookup("__delattr__") {
            hook.call_pos(vec![Value::Instance(self.clone()), Value::str(name)])?;
            return Ok(());
        }
        self.raw_del(name)
    }

    /// Storage write bypassing hooks and properties but honoring slots
    pub fn raw_set(&self, name: &str, value: Value) -> Result<()> {
        let class = self.class();
        if let Some(slots) = class.all_slots() {
            if !slots.contains(name) && name != HASH_CACHE_ATTR {
                return Err(Error::Attribute {
                    class: class.name(),
                    name: format!("{name} (not in __slots__)"),
                });
            }
        }
        self.0.borrow_mut().dict.insert(name.into(), value);
        Ok(())
    }

    pub fn raw_del(&self, name: &str) -> Result<()> {
        let class = self.class();
        match self.0.borrow_mut().dict.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::Attribute {
                class: class.name(),
                name: name.into(),
            }),
        }
    }

    /// Unconditional instance-dict write: override-field storage, hash cache
    pub fn dict_set(&self, name: &str, value: Value) {
        self.0.borrow_mut().dict.insert(name.into(), value);
    }

    pub fn dict_get(&self, name: &str) -> Option<Value> {
        self.0.borrow().dict.get(name).cloned()
    }
}

/// Dispatch `__repr__`; falls back to a default object form. Guards against
/// recursive structures the way a reentrancy-tracking repr wrapper would.
pub fn instance_repr(inst: &Instance) -> String {
    thread_local! {
        static IN_REPR: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
    }
    let addr = inst.addr();
    let entered = IN_REPR.with(|s| s.borrow_mut().insert(addr));
    if !entered {
        return "...".into();
    }
    let out = match inst.class().lookup("__repr__") {
        Some(Value::Fn(f)) => match f.call_pos(vec![Value::Instance(inst.clone())]) {
            Ok(Value::Str(s)) => s,
            _ => format!("<{} instance>", inst.class().qualname()),
        },
        _ => format!("<{} object>", inst.class().qualname()),
    };
    IN_REPR.with(|s| {
        s.borrow_mut().remove(&addr);
    });
    out
}

/// Dispatch `__eq__` with the NotImplemented reflection protocol; final
/// fallback is identity.
pub fn instance_eq(a: &Instance, b: &Instance) -> Result<bool> {
    for (x, y) in [(a, b), (b, a)] {
        if let Some(Value::Fn(eq)) = x.class().lookup("__eq__") {
            match eq.call_pos(vec![Value::Instance(x.clone()), Value::Instance(y.clone())])? {
                Value::NotImplemented => continue,
                v => return Ok(v.truthy()),
            }
        }
    }
    Ok(a.is(b))
}

/// Dispatch `__hash__`: an explicit `None` entry means unhashable; absent
/// means identity hash.
pub fn instance_hash(inst: &Instance) -> Result<u64> {
    match inst.class().lookup("__hash__") {
        Some(Value::None) => Err(Error::Type(format!(
            "unhashable type: {}",
            inst.class().name()
        ))),
        Some(Value::Fn(f)) => {
            match f.call_pos(vec![Value::Instance(inst.clone())])? {
                Value::Int(i) => Ok(i as u64),
                other => Err(Error::Type(format!(
                    "__hash__ returned non-int: {}",
                    other.type_name()
                ))),
            }
        }
        _ => Ok(inst.addr() as u64),
    }
}

/// Dispatch `__copy__`
pub fn instance_copy(inst: &Instance) -> Result<Value> {
    match inst.class().lookup("__copy__") {
        Some(Value::Fn(f)) => f.call_pos(vec![Value::Instance(inst.clone())]),
        _ => Err(Error::Type(format!(
            "{} does not support __copy__",
            inst.class().name()
        ))),
    }
}

/// Make a bound-method value from a closure taking `CallArgs`
pub fn method(name: &str, f: impl Fn(&CallArgs) -> Result<Value> + 'static) -> Value {
    Value::Fn(FnValue::new(name, f))
}

//! Processing context, per-invocation options, and the item registry
//!
//! Processors and generators never compute shared analyses twice: anything
//! derived from the class-plus-spec pair (the resolved field table, the
//! init-signature ordering, generic inspection) is an *item*, produced by a
//! registered factory the first time some consumer asks for it and cached on
//! the context for the rest of the transform.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use crate::class::Class;
use crate::error::{Error, Result};
use crate::generate::aot::ArtifactRegistry;
use crate::generate::compile::CompileResult;
use crate::reflect::{build_cls_std_fields, FieldsInspection, StdField};
use crate::spec::ClassSpec;

/// Option: stop after planning, apply nothing
#[derive(Debug, Clone, Copy)]
pub struct PlanOnly;

/// Option: emit debug-level detail while processing
#[derive(Debug, Clone, Copy)]
pub struct Verbose;

/// Option: which generation backend applies the op list
#[derive(Clone)]
pub enum CodegenStyle {
    /// Compile the op list to source for inspection, then apply it in-process
    Jit,
    /// Reuse a registered ahead-of-time artifact when the plan matches;
    /// otherwise generate live and persist source plus manifest under
    /// `out_dir`.
    Aot {
        out_dir: PathBuf,
        artifacts: Rc<ArtifactRegistry>,
        on_compile: Option<Rc<dyn Fn(&CompileResult)>>,
    },
}

impl std::fmt::Debug for CodegenStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenStyle::Jit => write!(f, "Jit"),
            CodegenStyle::Aot { out_dir, .. } => {
                write!(f, "Aot {{ out_dir: {} }}", out_dir.display())
            }
        }
    }
}

/// Typed per-invocation option set
#[derive(Default, Clone)]
pub struct Options {
    map: HashMap<TypeId, Rc<dyn Any>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: 'static>(mut self, opt: T) -> Self {
        self.map.insert(TypeId::of::<T>(), Rc::new(opt));
        self
    }

    pub fn set<T: 'static>(&mut self, opt: T) {
        self.map.insert(TypeId::of::<T>(), Rc::new(opt));
    }

    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }
}

type ItemFactory = Rc<dyn Fn(&ProcessingContext) -> Result<Rc<dyn Any>>>;

/// Registry of item factories. Frozen before processing starts; late
/// registration is an error.
#[derive(Default, Clone)]
pub struct ItemRegistry {
    factories: RefCell<HashMap<TypeId, ItemFactory>>,
    frozen: Cell<bool>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: 'static>(
        &self,
        f: impl Fn(&ProcessingContext) -> Result<T> + 'static,
    ) -> Result<()> {
        if self.frozen.get() {
            return Err(Error::Registry(
                "item registry is frozen, cannot register".into(),
            ));
        }
        let prev = self.factories.borrow_mut().insert(
            TypeId::of::<T>(),
            Rc::new(move |ctx| Ok(Rc::new(f(ctx)?) as Rc<dyn Any>)),
        );
        if prev.is_some() {
            return Err(Error::Registry(format!(
                "item factory already registered: {}",
                std::any::type_name::<T>()
            )));
        }
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    fn factory(&self, id: TypeId) -> Option<ItemFactory> {
        self.factories.borrow().get(&id).cloned()
    }
}

/// The resolved field table, as an item
#[derive(Debug, Clone)]
pub struct ClassFields(pub Vec<StdField>);

/// Generic/ownership inspection of the field table, as an item
#[derive(Debug, Clone)]
pub struct Inspection(pub FieldsInspection);

/// Init-participating fields in final signature order. Computing this is
/// where the defaultless-after-defaulted rule is enforced (or repaired by
/// `reorder`).
#[derive(Debug, Clone)]
pub struct InitFields(pub Vec<StdField>);

/// The stock item registry, frozen
pub fn standard_items() -> Result<Rc<ItemRegistry>> {
    let reg = ItemRegistry::new();
    reg.register(|ctx: &ProcessingContext| {
        Ok(ClassFields(build_cls_std_fields(&ctx.cls, &ctx.cs)?))
    })?;
    reg.register(|ctx: &ProcessingContext| Ok(Inspection(FieldsInspection::build(&ctx.cls))))?;
    reg.register(|ctx: &ProcessingContext| {
        let fields = ctx.item::<ClassFields>()?;
        let mut pos: Vec<StdField> = Vec::new();
        let mut kw: Vec<StdField> = Vec::new();
        for f in fields.0.iter().filter(|f| f.in_init()) {
            if f.kw_only {
                kw.push(f.clone());
            } else {
                pos.push(f.clone());
            }
        }
        if ctx.cs.extras.reorder {
            let (no_default, with_default): (Vec<_>, Vec<_>) =
                pos.into_iter().partition(|f| f.default.is_missing());
            pos = no_default;
            pos.extend(with_default);
        } else {
            let mut seen_default: Option<String> = None;
            for f in &pos {
                if f.default.is_present() {
                    seen_default = Some(f.name.clone());
                } else if let Some(prev) = &seen_default {
                    return Err(Error::Type(format!(
                        "non-default argument {:?} follows default argument {:?}",
                        f.name, prev
                    )));
                }
            }
        }
        pos.extend(kw);
        Ok(InitFields(pos))
    })?;
    reg.freeze();
    Ok(Rc::new(reg))
}

/// Everything one transform invocation carries: the class under
/// construction, its spec, the options, and the lazy item cache.
pub struct ProcessingContext {
    pub cls: Class,
    pub cs: Rc<ClassSpec>,
    pub options: Options,
    registry: Rc<ItemRegistry>,
    items: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    resolving: RefCell<HashSet<TypeId>>,
}

impl ProcessingContext {
    pub fn new(
        cls: Class,
        cs: Rc<ClassSpec>,
        options: Options,
        registry: Rc<ItemRegistry>,
    ) -> Self {
        Self {
            cls,
            cs,
            options,
            registry,
            items: RefCell::new(HashMap::new()),
            resolving: RefCell::new(HashSet::new()),
        }
    }

    /// Compute-once item access. Factories may request other items; a cycle
    /// among factories is an error, not a hang.
    pub fn item<T: 'static>(&self) -> Result<Rc<T>> {
        let id = TypeId::of::<T>();
        if let Some(v) = self.items.borrow().get(&id) {
            return v
                .clone()
                .downcast::<T>()
                .map_err(|_| Error::Registry("item cache type confusion".into()));
        }
        let factory = self.registry.factory(id).ok_or_else(|| {
            Error::Registry(format!(
                "no item factory registered for {}",
                std::any::type_name::<T>()
            ))
        })?;
        if !self.resolving.borrow_mut().insert(id) {
            return Err(Error::Registry(format!(
                "cyclic item dependency on {}",
                std::any::type_name::<T>()
            )));
        }
        let out = factory(self);
        self.resolving.borrow_mut().remove(&id);
        let v = out?;
        self.items.borrow_mut().insert(id, v.clone());
        v.downcast::<T>()
            .map_err(|_| Error::Registry("item factory returned wrong type".into()))
    }

    pub fn option<T: 'static>(&self) -> Option<Rc<T>> {
        self.options.get::<T>()
    }

    pub fn verbose(&self) -> bool {
        self.options.has::<Verbose>()
    }
}

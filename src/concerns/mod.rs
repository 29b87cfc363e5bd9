//! Concern generators
//!
//! One generator per generated concern. Each looks at the context during
//! planning, declines when its concern does not apply (switched off, or a
//! hand-written method already occupies the class's own namespace), and
//! otherwise produces a pure plan plus the refs its methods close over.

pub mod copies;
pub mod eq;
pub mod frozen;
pub mod hash;
pub mod init;
pub mod overrides;
pub mod reprs;

use std::rc::Rc;

use crate::class::Class;
use crate::error::Result;
use crate::generate::{cls_ref, GeneratorRegistry, RefMap};
use crate::reflect::StdField;
use crate::value::Value;

/// The stock generator set, frozen
pub fn standard_generators() -> Result<Rc<GeneratorRegistry>> {
    let reg = GeneratorRegistry::new();
    reg.register(Rc::new(init::InitGenerator))?;
    reg.register(Rc::new(overrides::OverridesGenerator))?;
    reg.register(Rc::new(reprs::ReprGenerator))?;
    reg.register(Rc::new(eq::EqGenerator))?;
    reg.register(Rc::new(eq::OrderGenerator))?;
    reg.register(Rc::new(frozen::FrozenGenerator))?;
    reg.register(Rc::new(hash::HashGenerator))?;
    reg.register(Rc::new(copies::CopyGenerator))?;
    reg.freeze();
    Ok(Rc::new(reg))
}

/// A hand-written entry in the class's own namespace blocks generation of
/// that name; inherited entries do not.
pub(crate) fn own_defines(cls: &Class, name: &str) -> bool {
    cls.own(name).is_some()
}

/// Ref-map seeded with the class itself, for generators whose methods need
/// exact-class identity checks.
pub(crate) fn refs_with_cls(cls: &Class) -> Result<RefMap> {
    let mut refs = RefMap::new();
    refs.insert(cls_ref(), Value::Class(cls.clone()))?;
    Ok(refs)
}

/// Names of the stored fields that take part in comparisons
pub(crate) fn compare_field_names(fields: &[StdField]) -> Vec<String> {
    fields
        .iter()
        .filter(|f| f.stored() && f.compare)
        .map(|f| f.name.clone())
        .collect()
}

//! Execute backend: apply ops to a class natively
//!
//! Binds each method body against the resolved ref-map and writes the
//! results into the class namespace, honoring each op's presence policy.

use std::rc::Rc;

use crate::class::Class;
use crate::error::{Error, Result};
use crate::value::{PropertyValue, Value};

use super::{IfPresent, Op, RefMap};

/// Presence policy gate: `Ok(true)` means go ahead and write.
fn should_write(cls: &Class, name: &str, if_present: IfPresent) -> Result<bool> {
    if cls.own(name).is_none() {
        return Ok(true);
    }
    match if_present {
        IfPresent::Skip => Ok(false),
        IfPresent::Replace => Ok(true),
        IfPresent::Error => Err(Error::CannotOverwrite {
            class: cls.name(),
            name: name.into(),
        }),
    }
}

/// Apply one op
pub fn apply_op(cls: &Class, op: &Op, refs: &RefMap) -> Result<()> {
    match op {
        Op::SetAttr {
            name,
            value,
            if_present,
        } => {
            if should_write(cls, name, *if_present)? {
                cls.set(name.clone(), value.resolve(refs)?);
            }
        }
        Op::AddMethod {
            name,
            body,
            if_present,
            ..
        } => {
            if should_write(cls, name, *if_present)? {
                cls.set(name.clone(), Value::Fn(body.bind(name, refs)?));
            }
        }
        Op::AddProperty {
            name,
            getter,
            setter,
            if_present,
            ..
        } => {
            if should_write(cls, name, *if_present)? {
                let get = getter.bind(name, refs)?;
                let set = match setter {
                    Some(body) => Some(body.bind(name, refs)?),
                    None => None,
                };
                cls.set(name.clone(), Value::Property(Rc::new(PropertyValue { get, set })));
            }
        }
    }
    Ok(())
}

/// Apply a whole op list in order; the first failure aborts with the class
/// left partially written (the driver treats any error as fatal to the
/// transform).
pub fn apply(cls: &Class, ops: &[Op], refs: &RefMap) -> Result<()> {
    for op in ops {
        tracing::trace!(op = op.name(), "apply");
        apply_op(cls, op, refs)?;
    }
    Ok(())
}

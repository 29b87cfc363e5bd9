//! Processing pipeline
//!
//! The transform is a fixed sequence of processors, each owning one phase of
//! turning a declared class plus spec into a finished class. Ordering is
//! `(phase, priority, registration index)`, so it is deterministic and
//! independent of registration call sites. Each processor may veto early in
//! `check` and may return a replacement class from `process`; the driver
//! threads whatever class comes back.

pub mod abstracts;
pub mod doc;
pub mod fields;
pub mod generator;
pub mod match_args;
pub mod params;
pub mod replace;
pub mod slots;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::class::Class;
use crate::context::ProcessingContext;
use crate::error::{Error, Result};
use crate::generate::GeneratorRegistry;

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Field harvesting and invariant checks
    Bootstrap,
    /// The plan/op/apply pipeline
    Generation,
    /// Concerns layered on the generated class
    PostGeneration,
    /// Slots installation
    Slots,
    /// Abstractness bookkeeping
    Finalize,
}

/// One pipeline step
pub trait Processor {
    fn name(&self) -> &'static str;

    fn phase(&self) -> Phase;

    /// Tie-break within a phase; lower runs first
    fn priority(&self) -> i32 {
        0
    }

    /// Pre-flight invariant assertion; all checks run before any processing
    fn check(&self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class>;
}

/// Ordered processor registry with the shared freeze discipline
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: RefCell<Vec<Rc<dyn Processor>>>,
    frozen: Cell<bool>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, p: Rc<dyn Processor>) -> Result<()> {
        if self.frozen.get() {
            return Err(Error::Registry(
                "processor registry is frozen, cannot register".into(),
            ));
        }
        self.entries.borrow_mut().push(p);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    /// Execution order: `(phase, priority, registration index)`
    pub fn ordered(&self) -> Vec<Rc<dyn Processor>> {
        let mut indexed: Vec<(usize, Rc<dyn Processor>)> =
            self.entries.borrow().iter().cloned().enumerate().collect();
        indexed.sort_by_key(|(i, p)| (p.phase(), p.priority(), *i));
        indexed.into_iter().map(|(_, p)| p).collect()
    }
}

/// The stock processor set, frozen
pub fn standard_processors(generators: Rc<GeneratorRegistry>) -> Result<Rc<ProcessorRegistry>> {
    let reg = ProcessorRegistry::new();
    reg.register(Rc::new(fields::FieldsProcessor))?;
    reg.register(Rc::new(params::ParamsProcessor))?;
    reg.register(Rc::new(generator::GeneratorProcessor::new(generators)))?;
    reg.register(Rc::new(match_args::MatchArgsProcessor))?;
    reg.register(Rc::new(replace::ReplaceProcessor))?;
    reg.register(Rc::new(doc::DocProcessor))?;
    reg.register(Rc::new(slots::SlotsProcessor))?;
    reg.register(Rc::new(abstracts::AbstractProcessor))?;
    reg.freeze();
    Ok(Rc::new(reg))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, Phase, i32);

    impl Processor for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn phase(&self) -> Phase {
            self.1
        }
        fn priority(&self) -> i32 {
            self.2
        }
        fn process(&self, _ctx: &ProcessingContext, cls: Class) -> Result<Class> {
            Ok(cls)
        }
    }

    #[test]
    fn test_ordering_by_phase_priority_index() {
        let reg = ProcessorRegistry::new();
        reg.register(Rc::new(Named("late", Phase::Finalize, 0))).unwrap();
        reg.register(Rc::new(Named("second", Phase::Bootstrap, 5))).unwrap();
        reg.register(Rc::new(Named("first", Phase::Bootstrap, 0))).unwrap();
        reg.register(Rc::new(Named("tied-a", Phase::Generation, 0))).unwrap();
        reg.register(Rc::new(Named("tied-b", Phase::Generation, 0))).unwrap();
        let names: Vec<_> = reg.ordered().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["first", "second", "tied-a", "tied-b", "late"]);
    }

    #[test]
    fn test_frozen_rejects_registration() {
        let reg = ProcessorRegistry::new();
        reg.freeze();
        assert!(reg.register(Rc::new(Named("x", Phase::Bootstrap, 0))).is_err());
    }
}

//! Pipeline driver

use std::rc::Rc;

use crate::class::Class;
use crate::concerns::standard_generators;
use crate::context::{standard_items, ItemRegistry, Options, ProcessingContext};
use crate::error::Result;
use crate::generate::GeneratorRegistry;
use crate::process::{standard_processors, ProcessorRegistry};
use crate::spec::ClassSpec;

/// The three frozen registries a transform runs with
pub struct Registries {
    pub items: Rc<ItemRegistry>,
    pub processors: Rc<ProcessorRegistry>,
    pub generators: Rc<GeneratorRegistry>,
}

impl Registries {
    /// The stock set: standard items, generators, and processors
    pub fn standard() -> Result<Self> {
        let generators = standard_generators()?;
        Ok(Self {
            items: standard_items()?,
            processors: standard_processors(generators.clone())?,
            generators,
        })
    }
}

/// Transform one class according to its spec: build the context, run every
/// processor's pre-flight check, then thread the class through the
/// processors in order. The first error aborts with no rollback.
pub fn drive_with(
    cls: Class,
    cs: ClassSpec,
    options: Options,
    registries: &Registries,
) -> Result<Class> {
    let span = tracing::debug_span!("transform", class = %cls.name());
    let _guard = span.enter();

    let ctx = ProcessingContext::new(cls.clone(), Rc::new(cs), options, registries.items.clone());
    let processors = registries.processors.ordered();
    for p in &processors {
        p.check(&ctx)?;
    }
    let mut cur = cls;
    for p in &processors {
        tracing::trace!(processor = p.name(), "process");
        cur = p.process(&ctx, cur)?;
    }
    Ok(cur)
}

/// [`drive_with`] against the stock registries
pub fn drive(cls: Class, cs: ClassSpec, options: Options) -> Result<Class> {
    drive_with(cls, cs, options, &Registries::standard()?)
}

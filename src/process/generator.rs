//! Generation processor
//!
//! Runs the whole plan/lower/apply pipeline as one processor so every
//! concern generator sees the same class snapshot. Which backend applies
//! the ops depends on the codegen-style option: plain execute, JIT (compile
//! for inspection, then execute), or AOT (reuse a registered artifact on an
//! exact plan match, otherwise generate live and persist module plus
//! manifest).

use std::rc::Rc;

use crate::class::Class;
use crate::context::{CodegenStyle, PlanOnly, ProcessingContext};
use crate::error::Result;
use crate::generate::aot::{emit_module, ArtifactMeta, Manifest};
use crate::generate::compile::compile;
use crate::generate::execute::apply;
use crate::generate::{prepare, GeneratorRegistry, Prepared};

use super::{Phase, Processor};

pub struct GeneratorProcessor {
    generators: Rc<GeneratorRegistry>,
}

impl GeneratorProcessor {
    pub fn new(generators: Rc<GeneratorRegistry>) -> Self {
        Self { generators }
    }

    fn apply_aot(
        &self,
        ctx: &ProcessingContext,
        cls: &Class,
        prepared: &Prepared,
        out_dir: &std::path::Path,
        artifacts: &crate::generate::aot::ArtifactRegistry,
        on_compile: Option<&dyn Fn(&crate::generate::compile::CompileResult)>,
    ) -> Result<()> {
        let plan_repr = prepared.plans.plan_repr();
        if let Some((meta, factory)) = artifacts.lookup(&plan_repr) {
            // A registered factory with an exactly matching plan applies the
            // ops itself; nothing is compiled. Refs are resolved fresh from
            // this class, never reused from the run that built the factory.
            tracing::debug!(class = %cls.name(), hash = %meta.plan_hash, "artifact hit");
            return factory(cls, &prepared.refs);
        }
        if ctx.verbose() {
            tracing::debug!(class = %cls.name(), "artifact miss, generating live");
        }
        apply(cls, &prepared.ops, &prepared.refs)?;
        let compiled = compile(cls, prepared)?;
        let meta = ArtifactMeta::from_compile(&compiled);
        emit_module(out_dir, &compiled, &meta)?;
        let mut manifest = Manifest::load(out_dir)?.unwrap_or_default();
        manifest.upsert(meta);
        manifest.save(out_dir)?;
        if let Some(cb) = on_compile {
            cb(&compiled);
        }
        Ok(())
    }
}

impl Processor for GeneratorProcessor {
    fn name(&self) -> &'static str {
        "generator"
    }

    fn phase(&self) -> Phase {
        Phase::Generation
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        let prepared = prepare(ctx, &self.generators)?;
        if ctx.options.has::<PlanOnly>() {
            return Ok(cls);
        }
        match ctx.option::<CodegenStyle>().as_deref() {
            None => apply(&cls, &prepared.ops, &prepared.refs)?,
            Some(CodegenStyle::Jit) => {
                let compiled = compile(&cls, &prepared)?;
                tracing::trace!(src = %compiled.src, "jit source");
                apply(&cls, &prepared.ops, &prepared.refs)?;
            }
            Some(CodegenStyle::Aot {
                out_dir,
                artifacts,
                on_compile,
            }) => {
                self.apply_aot(
                    ctx,
                    &cls,
                    &prepared,
                    out_dir,
                    artifacts,
                    on_compile.as_deref(),
                )?;
            }
        }
        Ok(cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concerns::standard_generators;
    use crate::context::{standard_items, Options};
    use crate::spec::ClassSpec;
    use crate::value::Value;

    fn run(cls: Class, options: Options) -> Class {
        let ctx = ProcessingContext::new(
            cls.clone(),
            Rc::new(ClassSpec::with_defaults(vec![]).unwrap()),
            options,
            standard_items().unwrap(),
        );
        GeneratorProcessor::new(standard_generators().unwrap())
            .process(&ctx, cls)
            .unwrap()
    }

    #[test]
    fn test_plan_only_applies_nothing() {
        let cls = Class::builder("C").annotation("x", "int").build();
        let out = run(cls, Options::new().with(PlanOnly));
        assert!(out.own("__init__").is_none());
        assert!(out.own("__repr__").is_none());
    }

    #[test]
    fn test_execute_attaches_generated_methods() {
        let cls = Class::builder("C").annotation("x", "int").build();
        let out = run(cls, Options::new());
        assert!(matches!(out.own("__init__"), Some(Value::Fn(_))));
        assert!(matches!(out.own("__repr__"), Some(Value::Fn(_))));
        assert!(matches!(out.own("__eq__"), Some(Value::Fn(_))));
        // eq without frozen marks the class unhashable
        assert!(matches!(out.own("__hash__"), Some(Value::None)));
    }
}

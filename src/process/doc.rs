//! Docstring synthesis
//!
//! Classes without a docstring get the constructor signature as one, the
//! same text a signature-printing help system would show.

use crate::class::Class;
use crate::context::{InitFields, ProcessingContext};
use crate::error::Result;
use crate::spec::FieldDefault;

use super::{Phase, Processor};

pub struct DocProcessor;

fn signature_doc(name: &str, fields: &crate::context::InitFields) -> String {
    let mut parts = Vec::with_capacity(fields.0.len());
    let mut started_kw = false;
    for f in &fields.0 {
        if f.kw_only && !started_kw {
            parts.push("*".to_string());
            started_kw = true;
        }
        let mut part = format!("{}: {}", f.name, f.annotation.expr);
        match &f.default {
            FieldDefault::Missing => {}
            FieldDefault::Value(v) => part.push_str(&format!(" = {}", v.repr())),
            FieldDefault::Factory(func) => part.push_str(&format!(" = {}()", func.name)),
        }
        parts.push(part);
    }
    format!("{name}({})", parts.join(", "))
}

impl Processor for DocProcessor {
    fn name(&self) -> &'static str {
        "doc"
    }

    fn phase(&self) -> Phase {
        Phase::PostGeneration
    }

    fn priority(&self) -> i32 {
        20
    }

    fn process(&self, ctx: &ProcessingContext, cls: Class) -> Result<Class> {
        if cls.data().doc.is_some() {
            return Ok(cls);
        }
        let init_fields = ctx.item::<InitFields>()?;
        let doc = signature_doc(&cls.name(), &init_fields);
        cls.data_mut().doc = Some(doc);
        Ok(cls)
    }
}

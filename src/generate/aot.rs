//! Ahead-of-time artifact layer
//!
//! An AOT run persists each compiled generation as a source module plus a
//! manifest entry, and lets a later process short-circuit generation by
//! registering *attach factories*: native functions (typically compiled from
//! a previously emitted module) keyed by the exact plan repr they were
//! generated from. A factory hit applies the ops without compiling anything;
//! a manifest entry alone is diagnostic and never skips regeneration.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::class::Class;
use crate::error::{Error, Result};

use super::compile::CompileResult;
use super::RefMap;

pub const MANIFEST_FILE: &str = ".dcgen_meta.yaml";
pub const MANIFEST_VERSION: u32 = 1;

/// Everything recorded about one emitted artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactMeta {
    /// Canonical plan serialization; the cache key
    pub plan_repr: String,
    /// Truncated content hash of the repr, also the module file stem
    pub plan_hash: String,
    /// Flattened ref idents the attach function takes
    pub op_ref_idents: Vec<String>,
    /// Qualified names of the classes this generation was produced for
    pub cls_names: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
}

impl ArtifactMeta {
    pub fn from_compile(result: &CompileResult) -> Self {
        Self {
            plan_repr: result.plan_repr.clone(),
            plan_hash: result.plan_hash.clone(),
            op_ref_idents: result.params.clone(),
            cls_names: result.cls_names.clone(),
            generated_at: Utc::now(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

/// A previously compiled attach function: applies a known op list to a class
/// given freshly resolved refs.
pub type AttachFactory = Rc<dyn Fn(&Class, &RefMap) -> Result<()>>;

/// In-process registry of attach factories keyed by plan repr
#[derive(Default)]
pub struct ArtifactRegistry {
    entries: RefCell<BTreeMap<String, (ArtifactMeta, AttachFactory)>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for the plan repr in its meta; re-registering the
    /// same plan replaces the previous factory.
    pub fn register(&self, meta: ArtifactMeta, factory: AttachFactory) {
        let key = meta.plan_repr.clone();
        if self
            .entries
            .borrow_mut()
            .insert(key, (meta, factory))
            .is_some()
        {
            tracing::debug!("replaced existing artifact factory");
        }
    }

    /// Exact plan-repr lookup
    pub fn lookup(&self, plan_repr: &str) -> Option<(ArtifactMeta, AttachFactory)> {
        self.entries.borrow().get(plan_repr).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// The on-disk manifest listing every artifact an output directory holds
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    pub version: u32,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactMeta>,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            tool_version: crate::VERSION.to_string(),
            generated_at: Utc::now(),
            artifacts: Vec::new(),
        }
    }

    pub fn load(dir: &Path) -> Result<Option<Manifest>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let manifest: Manifest = serde_norway::from_str(&text)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Error::Yaml(format!(
                "unsupported manifest version {} in {}",
                manifest.version,
                path.display()
            )));
        }
        Ok(Some(manifest))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let text = serde_norway::to_string(self)?;
        fs::write(dir.join(MANIFEST_FILE), text)?;
        Ok(())
    }

    /// Add or replace the entry for this meta's plan, keyed by plan repr
    pub fn upsert(&mut self, meta: ArtifactMeta) {
        match self
            .artifacts
            .iter_mut()
            .find(|a| a.plan_repr == meta.plan_repr)
        {
            Some(slot) => *slot = meta,
            None => self.artifacts.push(meta),
        }
        self.generated_at = Utc::now();
    }

    pub fn find(&self, plan_repr: &str) -> Option<&ArtifactMeta> {
        self.artifacts.iter().find(|a| a.plan_repr == plan_repr)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

/// File stem for a plan hash (`sha256:abcd...` becomes `abcd...`)
fn module_stem(plan_hash: &str) -> &str {
    plan_hash.split(':').next_back().unwrap_or(plan_hash)
}

/// Write the rendered module for one compile result and return its path.
/// The module carries a registry-style metadata block ahead of the attach
/// function so a reader can match it back to its plan without the manifest.
pub fn emit_module(out_dir: &Path, result: &CompileResult, meta: &ArtifactMeta) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!("{}.py", module_stem(&result.plan_hash)));

    let mut out = String::new();
    out.push_str("# AUTO-GENERATED - do not edit\n");
    out.push_str(&format!("# tool: dcgen {}\n", meta.tool_version));
    out.push_str(&format!(
        "# generated: {}\n\n",
        meta.generated_at.to_rfc3339()
    ));
    if result.src.contains("FrozenInstanceError") {
        out.push_str("from dataclasses import FrozenInstanceError\n\n");
    }
    out.push_str("REGISTRY = {\n");
    out.push_str(&format!("    {}: {{\n", py_str(&meta.plan_repr)));
    out.push_str(&format!(
        "        'plan_hash': {},\n",
        py_str(&meta.plan_hash)
    ));
    out.push_str(&format!(
        "        'op_ref_idents': ({}),\n",
        meta.op_ref_idents
            .iter()
            .map(|s| format!("{}, ", py_str(s)))
            .collect::<String>()
    ));
    out.push_str(&format!(
        "        'cls_names': ({}),\n",
        meta.cls_names
            .iter()
            .map(|s| format!("{}, ", py_str(s)))
            .collect::<String>()
    ));
    out.push_str("    },\n");
    out.push_str("}\n\n\n");
    out.push_str(&result.src);
    out.push('\n');

    fs::write(&path, out)?;
    tracing::debug!(path = %path.display(), "emitted module");
    Ok(path)
}

fn py_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

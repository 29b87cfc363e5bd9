// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # dcgen
//!
//! A dataclass transform engine: given a class declaration (annotations,
//! body attributes, bases) and a validated spec of per-field and per-class
//! switches, dcgen synthesizes the class's special methods — constructor,
//! repr, equality and ordering, hashing, frozen guards, copy, override
//! properties — plus the surrounding concerns (match-args, replace,
//! docstring, slots, abstractness).
//!
//! ## Architecture
//!
//! - [`spec`] — validated declarative inputs ([`spec::FieldSpec`],
//!   [`spec::ClassSpec`]);
//! - [`value`] / [`class`] — the explicit object model the transform acts
//!   on;
//! - [`reflect`] — field harvesting: class body plus spec to resolved field
//!   table;
//! - [`context`] — per-invocation context, options, compute-once items;
//! - [`process`] — the ordered processor pipeline;
//! - [`generate`] — plan/op generation core with execute, JIT, and AOT
//!   backends;
//! - [`concerns`] — one generator per synthesized concern;
//! - [`drive`] — the entry point tying it together.
//!
//! ## Example
//!
//! ```
//! use dcgen::class::Class;
//! use dcgen::context::Options;
//! use dcgen::spec::ClassSpec;
//! use dcgen::value::{CallArgs, Value};
//!
//! let cls = Class::builder("Point")
//!     .annotation("x", "int")
//!     .annotation("y", "int")
//!     .build();
//! let cls = dcgen::drive(cls, ClassSpec::with_defaults(vec![])?, Options::new())?;
//!
//! let p = cls.call(CallArgs::positional(vec![Value::Int(1), Value::Int(2)]))?;
//! assert_eq!(p.repr(), "Point(x=1, y=2)");
//! # Ok::<(), dcgen::Error>(())
//! ```

pub mod annotations;
pub mod class;
pub mod concerns;
pub mod context;
pub mod drive;
pub mod error;
pub mod generate;
pub mod process;
pub mod reflect;
pub mod spec;
pub mod value;

pub use drive::{drive, drive_with, Registries};
pub use error::{Error, Result};

/// Version of the dcgen library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

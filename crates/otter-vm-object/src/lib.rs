//! # Otter VM Object Model
//!
//! Shape-based dynamic objects, function objects and resumable generator
//! bodies for the Otter JavaScript runtime.
//!
//! ## Design Principles
//!
//! - **Hidden classes**: objects with the same property history share one
//!   immutable [`Shape`], found through a process-wide transition tree
//! - **Thread-safe**: shapes are immutable `Arc`s, objects swap shape and
//!   storage under one lock, generator activations reject concurrent resumes
//! - **Computed properties**: function `length`, `name` and `prototype` are
//!   proxy properties resolved by a single match, never stored copies
//! - **Internal slots**: engine state lives in a per-kind slot table, not in
//!   the property map
//! - **Resumable bodies**: generators re-enter a statement block at a
//!   recorded index instead of switching stacks

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod arguments;
pub mod bound_function;
pub mod error;
pub mod function;
pub mod generator;
pub mod ic;
pub mod object;
pub mod property;
pub mod realm;
pub mod shape;
pub mod value;

pub use bound_function::bind;
pub use error::{ObjectError, ObjectResult};
pub use function::{ArgumentBundle, CallTarget, FunctionBody, FunctionData, FunctionFlags};
pub use generator::{Flow, GeneratorState, IteratorResult, ResumableBlock, Statement};
pub use ic::PropertyCache;
pub use object::{JsObject, ObjectRef};
pub use property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
pub use realm::{Realm, RealmConfig, RealmRegistry};
pub use shape::{ObjectClass, Shape, ShapeTree};
pub use value::Value;

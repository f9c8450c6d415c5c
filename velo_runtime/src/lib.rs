//! Runtime value and object model for the Velo engine
//!
//! Values are small tagged unions; everything bigger lives in the [`Heap`]
//! behind refcounted handles. Reference counting reclaims acyclic garbage
//! immediately; the incremental mark/sweep collector picks up cycles and a
//! bump-allocated nursery keeps short-lived allocations cheap.

pub mod gc;
pub mod heap;
pub mod value;

pub use gc::{GcConfig, GcPhase, GcStats};
pub use heap::{ArrayKey, CallableKind, ClassDef, Heap, HeapKind, MethodDef, PropertyDef};
pub use value::{Handle, Value};

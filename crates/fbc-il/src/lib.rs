//! IL text emission, name mangling, and runtime-call wrapping.
//!
//! [`il_builder`] is the low-level textual writer. [`symbol_mapper`]
//! owns name mangling and per-function scope tracking. [`runtime`]
//! wraps calls into the BASIC runtime library by canonical name.

pub mod error;
pub mod il_builder;
pub mod runtime;
pub mod symbol_mapper;

pub use error::{IlError, IlResult};
pub use il_builder::{IlBuilder, Param};
pub use runtime::RuntimeLibrary;
pub use symbol_mapper::SymbolMapper;

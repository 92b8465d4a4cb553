//! C Code Generation
//!
//! Emits a single ISO C99 translation unit that links against the Strada
//! runtime library. The generation is split into focused submodules:
//!
//! - `state.rs`: the `CodeGen` struct, scopes, temporaries, name mangling
//! - `program.rs`: translation-unit assembly (prologue, struct typedefs,
//!   forward declarations, module init hook, `main` wrapper)
//! - `statements.rs`: statement dispatch and control flow lowering
//! - `expr.rs`: expression lowering, boxing/unboxing, builtin calls
//! - `closures.rs`: lifted lambdas, capture environments, funcref thunks
//! - `runtime.rs`: the documented runtime entry points and builtin tables
//! - `error.rs`: error types
//!
//! # Value ownership in the emitted C
//!
//! Every runtime call that returns a value transfers one reference to the
//! caller; arguments are borrowed (container writes acquire internally).
//! Codegen therefore:
//!
//! - binds each runtime-valued intermediate to a fresh temporary and
//!   releases statement temporaries at end of statement;
//! - releases block locals (scalar/str/array/hash) in reverse declaration
//!   order at block exit, and releases live locals before `return`;
//! - copies on assignment (`strada_copy` and friends) so variables never
//!   alias, and moves owned temporaries instead of copying.
//!
//! Struct instances and closure environments come from the runtime arena
//! (`strada_alloc`) and are not block-released.

mod closures;
mod error;
mod expr;
mod program;
mod runtime;
mod state;
mod statements;

pub use error::CodeGenError;
pub use state::CodeGen;

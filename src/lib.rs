//! LLVM back end for the Cinder compiler.
//!
//! Takes a typed mid-level IR (a control-flow graph of basic blocks over
//! typed locals) and lowers it to LLVM IR through [`codegen::CodeGen`].
//! [`mir`] defines the input IR, [`diagnostics`] the error surface, and
//! [`jit`] an in-process execution path for the finished module.

pub mod codegen;
pub mod diagnostics;
pub mod jit;
pub mod mir;

pub use codegen::CodeGen;
pub use diagnostics::{CodegenError, ErrorCategory};

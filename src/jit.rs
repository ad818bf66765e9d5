//! In-process execution of a lowered module.
//!
//! Verifies the module, spins up an LLVM JIT engine, and runs the entry
//! function. Intended for tests and the quick-iteration path; ahead-of-time
//! emission goes through the usual target machinery instead.

use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target};
use inkwell::OptimizationLevel;

use crate::diagnostics::CodegenError;

/// Verifies `module` and executes its entry function, returning the process
/// exit code the entry produced.
pub fn execute(module: &Module<'_>, entry: &str) -> Result<i32, CodegenError> {
    Target::initialize_native(&InitializationConfig::default())
        .map_err(|e| CodegenError::verification(format!("native target init failed: {}", e)))?;

    module.verify().map_err(|message| {
        CodegenError::verification(format!(
            "module verification failed: {}",
            message.to_string()
        ))
    })?;

    let engine = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .map_err(|e| {
            CodegenError::verification(format!("execution engine creation failed: {}", e))
        })?;

    let function = unsafe { engine.get_function::<unsafe extern "C" fn() -> i32>(entry) }
        .map_err(|e| {
            CodegenError::verification(format!("entry `{}` not found in module: {}", entry, e))
        })?;
    Ok(unsafe { function.call() })
}

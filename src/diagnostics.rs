//! Backend error type and reporting helpers.

use std::fmt;

use crate::mir::BlockId;

/// Broad failure classes; policy differs per class (see the constructors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown/missing type or struct definition. Callers usually degrade to
    /// a default type instead of propagating these.
    TypeResolution,
    /// Malformed IR: missing blocks, unresolvable places, bad call targets.
    Structure,
    /// Compilation guard trip; fatal to the compilation unit.
    ResourceExhaustion,
    /// The assembled module failed LLVM verification.
    Verification,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::TypeResolution => "type resolution",
            ErrorCategory::Structure => "structure",
            ErrorCategory::ResourceExhaustion => "resource exhaustion",
            ErrorCategory::Verification => "verification",
        };
        f.write_str(s)
    }
}

/// The single error type every fatal lowering path propagates.
#[derive(Debug, Clone)]
pub struct CodegenError {
    pub category: ErrorCategory,
    pub message: String,
    pub function: Option<String>,
    pub block: Option<BlockId>,
}

impl CodegenError {
    pub fn structure(message: impl Into<String>) -> Self {
        CodegenError {
            category: ErrorCategory::Structure,
            message: message.into(),
            function: None,
            block: None,
        }
    }

    pub fn type_resolution(message: impl Into<String>) -> Self {
        CodegenError {
            category: ErrorCategory::TypeResolution,
            message: message.into(),
            function: None,
            block: None,
        }
    }

    pub fn guard(function: impl Into<String>, block: BlockId, message: impl Into<String>) -> Self {
        CodegenError {
            category: ErrorCategory::ResourceExhaustion,
            message: message.into(),
            function: Some(function.into()),
            block: Some(block),
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        CodegenError {
            category: ErrorCategory::Verification,
            message: message.into(),
            function: None,
            block: None,
        }
    }

    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.category, self.message)?;
        if let Some(func) = &self.function {
            write!(f, " (in `{}`", func)?;
            if let Some(block) = self.block {
                write!(f, ", bb{}", block)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for CodegenError {}

impl From<inkwell::builder::BuilderError> for CodegenError {
    fn from(err: inkwell::builder::BuilderError) -> Self {
        CodegenError::structure(format!("instruction builder failure: {}", err))
    }
}

//! WASM module validation: bridge ABI compatibility checks.
//!
//! Validates that a compiled module can be driven by the bridge before it is
//! instantiated. Checks:
//!
//! 1. Memory export present
//! 2. Required allocator and scratch-stack exports with correct signatures
//! 3. Optional exports, when present, have correct signatures
//! 4. All imports are functions from the `host` module; no WASI

use wasmtime::{ExternType, Module, ValType};

use crate::error::SandboxError;
use crate::linker::HOST_MODULE;

fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, i32 param count, i32 result count).
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    ("bridge_malloc", 1, 1),
    ("bridge_free", 2, 0),
    ("bridge_add_to_stack_pointer", 1, 1),
];

/// Checked only when the module exports them.
const OPTIONAL_EXPORTS: &[(&str, usize, usize)] = &[
    ("bridge_realloc", 3, 1),
    ("bridge_exn_store", 1, 0),
];

pub const FUNCTION_TABLE: &str = "__indirect_function_table";

/// Validate that a module meets the bridge ABI.
pub fn validate_module(module: &Module) -> Result<(), SandboxError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn check_signature(
    module: &Module,
    name: &str,
    expected_params: usize,
    expected_results: usize,
    required: bool,
) -> Result<(), SandboxError> {
    let Some(export) = module.exports().find(|e| e.name() == name) else {
        return if required {
            Err(SandboxError::ValidationError(format!(
                "missing required export: {}",
                name
            )))
        } else {
            Ok(())
        };
    };

    let func_ty = match export.ty() {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(SandboxError::ValidationError(format!(
                "export '{}' must be a function",
                name
            )));
        }
    };

    let params: Vec<ValType> = func_ty.params().collect();
    let results: Vec<ValType> = func_ty.results().collect();

    if params.len() != expected_params || !params.iter().all(is_i32) {
        return Err(SandboxError::ValidationError(format!(
            "export '{}' has wrong param signature: expected {} i32 params, got {} params",
            name,
            expected_params,
            params.len()
        )));
    }

    if results.len() != expected_results || !results.iter().all(is_i32) {
        return Err(SandboxError::ValidationError(format!(
            "export '{}' has wrong result signature: expected {} i32 results, got {} results",
            name,
            expected_results,
            results.len()
        )));
    }
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), SandboxError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(SandboxError::ValidationError(
            "module must export 'memory'".into(),
        ));
    }

    for &(name, params, results) in REQUIRED_EXPORTS {
        check_signature(module, name, params, results, true)?;
    }
    for &(name, params, results) in OPTIONAL_EXPORTS {
        check_signature(module, name, params, results, false)?;
    }

    if let Some(export) = module.exports().find(|e| e.name() == FUNCTION_TABLE) {
        if !matches!(export.ty(), ExternType::Table(_)) {
            return Err(SandboxError::ValidationError(format!(
                "export '{}' must be a table",
                FUNCTION_TABLE
            )));
        }
    }
    Ok(())
}

/// Check that all imports are functions from `host` and none are WASI.
fn validate_imports(module: &Module) -> Result<(), SandboxError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(SandboxError::ValidationError(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != HOST_MODULE {
            return Err(SandboxError::ValidationError(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                HOST_MODULE,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(SandboxError::ValidationError(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}

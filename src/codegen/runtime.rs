//! Declarations for the externally-provided runtime-call surface.
//!
//! The backend only emits calls to these symbols by fixed name and
//! signature; the implementations are linked in at load time. Every accessor
//! declares lazily and is idempotent.

use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::FunctionValue;

use super::CodeGen;

impl<'a> CodeGen<'a> {
    fn declare_if_missing(
        &self,
        name: &str,
        params: &[BasicMetadataTypeEnum<'a>],
        ret: Option<BasicTypeEnum<'a>>,
    ) -> FunctionValue<'a> {
        if let Some(f) = self.module.get_function(name) {
            return f;
        }
        let fn_type = match ret {
            Some(ret) => match ret {
                BasicTypeEnum::IntType(t) => t.fn_type(params, false),
                BasicTypeEnum::FloatType(t) => t.fn_type(params, false),
                BasicTypeEnum::PointerType(t) => t.fn_type(params, false),
                BasicTypeEnum::StructType(t) => t.fn_type(params, false),
                BasicTypeEnum::ArrayType(t) => t.fn_type(params, false),
                BasicTypeEnum::VectorType(t) => t.fn_type(params, false),
            },
            None => self.context.void_type().fn_type(params, false),
        };
        self.module.add_function(name, fn_type, None)
    }

    pub fn rt_format_int(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_format_int", &[self.i32_t.into()], Some(self.ptr_t.into()))
    }

    pub fn rt_format_uint(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_format_uint", &[self.i32_t.into()], Some(self.ptr_t.into()))
    }

    pub fn rt_format_double(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_format_double",
            &[self.f64_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_format_bool(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_format_bool", &[self.i8_t.into()], Some(self.ptr_t.into()))
    }

    pub fn rt_format_char(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_format_char", &[self.i8_t.into()], Some(self.ptr_t.into()))
    }

    pub fn rt_format_hex(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_format_hex", &[self.i64_t.into()], Some(self.ptr_t.into()))
    }

    pub fn rt_format_hex_upper(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_format_hex_upper",
            &[self.i64_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_format_octal(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_format_octal",
            &[self.i64_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_format_binary(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_format_binary",
            &[self.i64_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_format_double_precision(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_format_double_precision",
            &[self.f64_t.into(), self.i32_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_string_concat(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_string_concat",
            &[self.ptr_t.into(), self.ptr_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_string_compare(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_string_compare",
            &[self.ptr_t.into(), self.ptr_t.into()],
            Some(self.i32_t.into()),
        )
    }

    pub fn rt_string_to_slice(&self) -> FunctionValue<'a> {
        self.declare_if_missing(
            "cinder_string_to_slice",
            &[self.ptr_t.into()],
            Some(self.ptr_t.into()),
        )
    }

    pub fn rt_print_str(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_print_str", &[self.ptr_t.into()], None)
    }

    pub fn rt_println_str(&self) -> FunctionValue<'a> {
        self.declare_if_missing("cinder_println_str", &[self.ptr_t.into()], None)
    }
}

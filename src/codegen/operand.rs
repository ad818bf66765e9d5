//! Constant and operand materialization.
//!
//! Operands reference places and constants, never other operands, so
//! resolution is a flat dispatch; unreadable inputs degrade to typed undef
//! sentinels rather than aborting the unit.

use inkwell::types::BasicTypeEnum;
use inkwell::values::{BasicValue, BasicValueEnum};

use super::{CodeGen, FnCx, Slot};
use crate::diagnostics::CodegenError;
use crate::mir::{ConstValue, Constant, Operand, Place, Ty};

impl<'a> CodeGen<'a> {
    /// Materializes an operand into an LLVM value. Struct-typed results are
    /// the struct's address, never an aggregate load.
    pub(crate) fn lower_operand(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        operand: &Operand,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        match operand {
            Operand::Constant(constant) => self.lower_constant(constant),
            Operand::FunctionRef(name) => Ok(self.function_ref_value(name)),
            Operand::Copy(place) | Operand::Move(place) => self.lower_place_value(fcx, place),
        }
    }

    /// Reads a place as a value, honoring the address-backed/SSA split.
    fn lower_place_value(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        place: &Place,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        if place.projections.is_empty() {
            let ty = fcx.mir.local(place.local).map(|l| l.ty.clone());
            return match fcx.slots.get(&place.local).cloned() {
                Some(Slot::Value(value)) => Ok(value),
                Some(Slot::Addr(addr)) => self.load_typed(addr, ty.as_ref()),
                None => {
                    log::error!(
                        target: "codegen::block",
                        "read of local _{} with no storage in `{}`",
                        place.local,
                        fcx.mir.name
                    );
                    Ok(self.undef_of(ty.as_ref()))
                }
            };
        }
        match self.resolve_place(fcx, place)? {
            Some((addr, ty)) => self.load_typed(addr, Some(&ty)),
            None => Ok(self.undef_of(self.place_ty(fcx, place).as_ref())),
        }
    }

    /// Loads from a typed address; struct and fixed-array values are handled
    /// by reference, so the address itself is returned.
    fn load_typed(
        &self,
        addr: inkwell::values::PointerValue<'a>,
        ty: Option<&Ty>,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        if let Some(ty) = ty {
            let by_reference = matches!(ty, Ty::Array(_, Some(_)))
                || matches!(ty, Ty::Named(name) if self.struct_defs.borrow().contains_key(name));
            if by_reference {
                return Ok(addr.into());
            }
        }
        let loaded_ty = self.lower_type(ty);
        let addr = self.ptr_cast(addr, self.pointer_to(loaded_ty), "load.addr")?;
        Ok(self.builder.build_load(addr, "load")?)
    }

    /// Builds a constant value per the literal's own type tag.
    pub fn lower_constant(&self, constant: &Constant) -> Result<BasicValueEnum<'a>, CodegenError> {
        let ty = constant.ty.as_ref();
        match &constant.value {
            ConstValue::Bool(b) => Ok(self.i8_t.const_int(u64::from(*b), false).into()),
            ConstValue::Int(v) => {
                if let Some(ty) = ty {
                    if ty.is_float() {
                        return Ok(self.float_const(*v as f64, ty));
                    }
                    if ty.is_pointer_like() && *v == 0 {
                        return Ok(self.ptr_t.const_null().into());
                    }
                }
                let int_ty = match self.lower_type(ty) {
                    BasicTypeEnum::IntType(t) => t,
                    _ => self.i32_t,
                };
                Ok(int_ty.const_int(*v as u64, true).into())
            }
            ConstValue::Uint(v) => {
                let int_ty = match self.lower_type(ty) {
                    BasicTypeEnum::IntType(t) => t,
                    _ => self.i32_t,
                };
                Ok(int_ty.const_int(*v, false).into())
            }
            ConstValue::Float(v) => Ok(self.float_const(*v, ty.unwrap_or(&Ty::F64))),
            ConstValue::Str(s) => Ok(self.string_literal(s)?.into()),
            ConstValue::Null => match ty {
                Some(t) if t.is_integer() => Ok(self.lower_type(ty).into_int_type().const_zero().into()),
                Some(t) if t.is_float() => Ok(self.float_const(0.0, t)),
                // Pointer types get a null pointer, not a zero integer.
                _ => Ok(self.ptr_t.const_null().into()),
            },
        }
    }

    fn float_const(&self, v: f64, ty: &Ty) -> BasicValueEnum<'a> {
        match ty {
            Ty::F32 => self.f32_t.const_float(v).into(),
            _ => self.f64_t.const_float(v).into(),
        }
    }

    /// Interned pointer to immutable string data.
    pub(crate) fn string_literal(
        &self,
        value: &str,
    ) -> Result<inkwell::values::PointerValue<'a>, CodegenError> {
        if let Some(ptr) = self.string_literals.borrow().get(value) {
            return Ok(*ptr);
        }
        let id = self.next_str_id.get();
        self.next_str_id.set(id + 1);
        let global = self
            .builder
            .build_global_string_ptr(value, &format!(".str.{}", id))?;
        let ptr = global.as_pointer_value();
        self.string_literals.borrow_mut().insert(value.to_string(), ptr);
        Ok(ptr)
    }

    fn function_ref_value(&self, name: &str) -> BasicValueEnum<'a> {
        let direct = self.functions.borrow().get(name).copied();
        let resolved = direct.or_else(|| {
            let decls = self.fn_decls.borrow();
            let functions = self.functions.borrow();
            decls
                .iter()
                .find(|(_, sig)| sig.base == name)
                .and_then(|(symbol, _)| functions.get(symbol).copied())
        });
        match resolved {
            Some(f) => f
                .as_global_value()
                .as_pointer_value()
                .as_basic_value_enum(),
            None => {
                log::error!(target: "codegen::block", "function reference to unknown `{}`", name);
                self.ptr_t.const_null().into()
            }
        }
    }

    /// Static type of an operand, when the IR carries enough information.
    pub(crate) fn operand_ty(&self, fcx: &FnCx<'_, 'a>, operand: &Operand) -> Option<Ty> {
        match operand {
            Operand::Constant(c) => c.ty.clone().or(match &c.value {
                ConstValue::Bool(_) => Some(Ty::Bool),
                ConstValue::Int(_) => Some(Ty::I32),
                ConstValue::Uint(_) => Some(Ty::U32),
                ConstValue::Float(_) => Some(Ty::F64),
                ConstValue::Str(_) => Some(Ty::Str),
                ConstValue::Null => None,
            }),
            Operand::Copy(place) | Operand::Move(place) => self.place_ty(fcx, place),
            Operand::FunctionRef(_) => None,
        }
    }

    /// A well-typed undefined-value sentinel for degraded paths.
    pub(crate) fn undef_of(&self, ty: Option<&Ty>) -> BasicValueEnum<'a> {
        match self.lower_type(ty) {
            BasicTypeEnum::IntType(t) => t.get_undef().into(),
            BasicTypeEnum::FloatType(t) => t.get_undef().into(),
            BasicTypeEnum::PointerType(t) => t.get_undef().into(),
            BasicTypeEnum::StructType(t) => t.get_undef().into(),
            BasicTypeEnum::ArrayType(t) => t.get_undef().into(),
            BasicTypeEnum::VectorType(t) => t.get_undef().into(),
        }
    }
}

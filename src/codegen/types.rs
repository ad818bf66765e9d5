//! Type mapping from semantic MIR types to LLVM types.
//!
//! The mapping is total: an unknown or unregistered type degrades to `i32`
//! instead of failing, since the front end is expected to have resolved every
//! type before handing the program over.

use inkwell::types::{BasicType, BasicTypeEnum, StructType};
use inkwell::AddressSpace;

use super::CodeGen;
use crate::mir::{StructDef, Ty};

impl<'a> CodeGen<'a> {
    /// Maps a semantic type to its LLVM storage type. `None` is the unknown
    /// type marker and maps to `i32`.
    pub fn lower_type(&self, ty: Option<&Ty>) -> BasicTypeEnum<'a> {
        let Some(ty) = ty else {
            return self.i32_t.into();
        };
        match ty {
            // Void only appears as a return type; callers special-case it.
            Ty::Void => self.i32_t.into(),
            // Booleans and chars live in whole bytes: aggregate layouts need
            // byte addressability, so i1 never appears in storage.
            Ty::Bool | Ty::Char | Ty::I8 | Ty::U8 => self.i8_t.into(),
            Ty::I16 | Ty::U16 => self.i16_t.into(),
            Ty::I32 | Ty::U32 => self.i32_t.into(),
            Ty::I64 | Ty::U64 | Ty::Isize | Ty::Usize => self.i64_t.into(),
            Ty::F32 => self.f32_t.into(),
            Ty::F64 => self.f64_t.into(),
            // Strings, pointers, references, slices and function values all
            // collapse to one pointer type; calls recover signatures
            // separately.
            Ty::Str | Ty::Ptr(_) | Ty::Ref(_) | Ty::Func(_, _) | Ty::Array(_, None) => {
                self.ptr_t.into()
            }
            Ty::Array(elem, Some(len)) => {
                self.lower_type(Some(elem)).array_type(*len).into()
            }
            Ty::Named(name) => self.lower_named_type(name),
        }
    }

    fn lower_named_type(&self, name: &str) -> BasicTypeEnum<'a> {
        if let Some(st) = self.structs.borrow().get(name) {
            return (*st).into();
        }
        if self.struct_defs.borrow().contains_key(name) {
            // First reference: create the opaque placeholder; the second
            // registration pass fills the body.
            let st = self.context.opaque_struct_type(name);
            self.structs.borrow_mut().insert(name.to_string(), st);
            return st.into();
        }
        if self.interface_defs.borrow().contains_key(name) {
            return self.fat_ptr_type(name).into();
        }
        log::warn!(target: "codegen::types", "unregistered type `{}`, defaulting to i32", name);
        self.i32_t.into()
    }

    /// The cached `{data, vtable}` fat-pointer aggregate for an interface.
    pub fn fat_ptr_type(&self, interface: &str) -> StructType<'a> {
        if let Some(st) = self.interfaces.borrow().get(interface) {
            return *st;
        }
        let st = self.context.opaque_struct_type(&format!("{}_fat_ptr", interface));
        st.set_body(&[self.ptr_t.into(), self.ptr_t.into()], false);
        self.interfaces.borrow_mut().insert(interface.to_string(), st);
        st
    }

    /// Two-pass struct registration: create every named type opaquely, then
    /// fill field lists. Required because fields may reference structs that
    /// are registered later (including mutual references through pointers).
    pub fn register_struct_types(&self, structs: &[StructDef]) {
        for def in structs {
            self.struct_defs.borrow_mut().insert(def.name.clone(), def.clone());
        }
        for def in structs {
            if !self.structs.borrow().contains_key(&def.name) {
                let st = self.context.opaque_struct_type(&def.name);
                self.structs.borrow_mut().insert(def.name.clone(), st);
            }
        }
        for def in structs {
            let st = match self.structs.borrow().get(&def.name) {
                Some(st) => *st,
                None => continue,
            };
            let fields: Vec<BasicTypeEnum<'a>> = def
                .fields
                .iter()
                .map(|f| self.lower_type(Some(&f.ty)))
                .collect();
            st.set_body(&fields, false);
            log::debug!(
                target: "codegen::types",
                "registered struct `{}` with {} fields",
                def.name,
                def.fields.len()
            );
        }
    }

    /// Byte size of a value of `ty` when used as a pointer arithmetic
    /// element. Must agree with the width rules in `lower_type`.
    pub fn element_size(&self, ty: &Ty) -> u64 {
        match ty {
            Ty::Bool | Ty::Char | Ty::I8 | Ty::U8 => 1,
            Ty::I16 | Ty::U16 => 2,
            Ty::I32 | Ty::U32 | Ty::F32 => 4,
            Ty::I64 | Ty::U64 | Ty::Isize | Ty::Usize | Ty::F64 => 8,
            Ty::Array(elem, Some(len)) => self.element_size(elem) * u64::from(*len),
            // Anything pointer-shaped, including named aggregates handled by
            // reference.
            _ => 8,
        }
    }

    /// The parameter type a function's declared signature uses for `ty`.
    /// Structs and fixed arrays pass by reference; interfaces pass as
    /// fat-pointer values.
    pub(crate) fn abi_param_type(&self, ty: &Ty) -> BasicTypeEnum<'a> {
        match ty {
            Ty::Named(name) if self.struct_defs.borrow().contains_key(name) => self.ptr_t.into(),
            Ty::Named(name) if self.interface_defs.borrow().contains_key(name) => {
                self.fat_ptr_type(name).into()
            }
            Ty::Array(_, Some(_)) => self.ptr_t.into(),
            _ => self.lower_type(Some(ty)),
        }
    }

    /// Pointer type used when taking the address of a value of `ty`.
    pub(crate) fn pointer_to(&self, ty: BasicTypeEnum<'a>) -> inkwell::types::PointerType<'a> {
        ty.ptr_type(AddressSpace::default())
    }
}

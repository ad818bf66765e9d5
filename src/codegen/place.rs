//! Place resolution: walking projection chains down to a typed address.

use inkwell::values::{BasicValueEnum, PointerValue};

use super::{CodeGen, FnCx, Slot};
use crate::diagnostics::CodegenError;
use crate::mir::{Place, Projection, Ty};

impl<'a> CodeGen<'a> {
    /// Resolves a place to `(address, value type)`. Returns `Ok(None)` when
    /// the place has no address: a bare SSA local (the operand materializer
    /// handles those), or a projection chain that cannot be resolved, in
    /// which case the defect has been logged and the caller degrades.
    pub(crate) fn resolve_place(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        place: &Place,
    ) -> Result<Option<(PointerValue<'a>, Ty)>, CodegenError> {
        let Some(local) = fcx.mir.local(place.local) else {
            log::error!(
                target: "codegen::block",
                "place references unknown local _{} in `{}`",
                place.local,
                fcx.mir.name
            );
            return Ok(None);
        };
        let local_ty = local.ty.clone();

        let (mut addr, mut cur_ty) = match fcx.slots.get(&place.local).cloned() {
            Some(Slot::Addr(ptr)) => (ptr, local_ty),
            Some(Slot::Value(value)) => {
                if place.projections.is_empty() {
                    return Ok(None);
                }
                match value {
                    // By-reference parameters (structs, fixed arrays) and
                    // raw pointers: the SSA value is already an address.
                    BasicValueEnum::PointerValue(ptr) => (ptr, local_ty),
                    // Any other SSA value gets spilled so projections have
                    // storage to walk.
                    other => {
                        let slot = self.builder.build_alloca(other.get_type(), "spill")?;
                        self.builder.build_store(slot, other)?;
                        fcx.slots.insert(place.local, Slot::Addr(slot));
                        (slot, local_ty)
                    }
                }
            }
            None => {
                log::error!(
                    target: "codegen::block",
                    "local _{} has no storage in `{}`",
                    place.local,
                    fcx.mir.name
                );
                return Ok(None);
            }
        };

        for projection in &place.projections {
            match projection {
                Projection::Field(index) => {
                    let Ty::Named(struct_name) = &cur_ty else {
                        log::error!(
                            target: "codegen::block",
                            "field projection on non-struct type {:?}",
                            cur_ty
                        );
                        return Ok(None);
                    };
                    let def = self.struct_defs.borrow().get(struct_name).cloned();
                    let Some(def) = def else {
                        log::error!(
                            target: "codegen::block",
                            "field projection on unregistered struct `{}`",
                            struct_name
                        );
                        return Ok(None);
                    };
                    let Some(field) = def.fields.get(*index as usize) else {
                        log::error!(
                            target: "codegen::block",
                            "field index {} out of range for `{}`",
                            index,
                            struct_name
                        );
                        return Ok(None);
                    };
                    let st = match self.lower_type(Some(&cur_ty)) {
                        inkwell::types::BasicTypeEnum::StructType(st) => st,
                        _ => return Ok(None),
                    };
                    let base = self.ptr_cast(addr, self.pointer_to(st.into()), "field.base")?;
                    addr = self.builder.build_struct_gep(
                        base,
                        *index,
                        &format!("{}.{}", struct_name, field.name),
                    )?;
                    cur_ty = field.ty.clone();
                }
                Projection::Index(index_local) => {
                    let index = self.index_value(fcx, *index_local)?;
                    match cur_ty.clone() {
                        Ty::Array(elem, Some(len)) => {
                            let arr_ty = self.lower_type(Some(&Ty::Array(elem.clone(), Some(len))));
                            let base =
                                self.ptr_cast(addr, self.pointer_to(arr_ty), "index.base")?;
                            let zero = self.i64_t.const_zero();
                            addr = unsafe {
                                self.builder.build_in_bounds_gep(
                                    base,
                                    &[zero, index],
                                    "index.elem",
                                )?
                            };
                            cur_ty = *elem;
                        }
                        Ty::Array(elem, None) | Ty::Ptr(elem) | Ty::Ref(elem) => {
                            // The storage holds a pointer to the elements.
                            let slot =
                                self.ptr_cast(addr, self.pointer_to(self.ptr_t.into()), "index.slot")?;
                            let data = self
                                .builder
                                .build_load(slot, "index.data")?
                                .into_pointer_value();
                            let elem_ty = self.lower_type(Some(&elem));
                            let data = self.ptr_cast(data, self.pointer_to(elem_ty), "index.ptr")?;
                            addr = unsafe {
                                self.builder.build_in_bounds_gep(
                                    data,
                                    &[index],
                                    "index.elem",
                                )?
                            };
                            cur_ty = *elem;
                        }
                        other => {
                            log::error!(
                                target: "codegen::block",
                                "index projection on non-array type {:?}",
                                other
                            );
                            return Ok(None);
                        }
                    }
                }
                Projection::Deref => {
                    let slot = self.ptr_cast(addr, self.pointer_to(self.ptr_t.into()), "deref.slot")?;
                    addr = self
                        .builder
                        .build_load(slot, "deref")?
                        .into_pointer_value();
                    cur_ty = match cur_ty {
                        Ty::Ptr(inner) | Ty::Ref(inner) => *inner,
                        Ty::Array(elem, None) => *elem,
                        Ty::Str => Ty::Char,
                        other => {
                            // The static type carries no more indirection;
                            // degrade to the default rather than abort.
                            log::error!(
                                target: "codegen::block",
                                "deref projection on non-pointer type {:?}",
                                other
                            );
                            Ty::I32
                        }
                    };
                }
            }
        }
        Ok(Some((addr, cur_ty)))
    }

    /// Loads an index local and widens it to the address-computation width.
    fn index_value(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        local: crate::mir::LocalId,
    ) -> Result<inkwell::values::IntValue<'a>, CodegenError> {
        let ty = fcx.mir.local(local).map(|l| l.ty.clone()).unwrap_or(Ty::I64);
        let raw = match fcx.slots.get(&local).cloned() {
            Some(Slot::Addr(ptr)) => {
                let loaded_ty = self.lower_type(Some(&ty));
                let ptr = self.ptr_cast(ptr, self.pointer_to(loaded_ty), "idx.addr")?;
                self.builder.build_load(ptr, "idx")?
            }
            Some(Slot::Value(value)) => value,
            None => self.i64_t.const_zero().into(),
        };
        let value = match raw {
            BasicValueEnum::IntValue(v) => v,
            other => {
                log::error!(target: "codegen::block", "non-integer index value {:?}", other);
                self.i64_t.const_zero()
            }
        };
        if value.get_type().get_bit_width() < 64 {
            if ty.is_unsigned() {
                Ok(self.builder.build_int_z_extend(value, self.i64_t, "idx.ext")?)
            } else {
                Ok(self.builder.build_int_s_extend(value, self.i64_t, "idx.ext")?)
            }
        } else {
            Ok(value)
        }
    }

    /// Pure type walk over a place, without emitting code. Used by call
    /// lowering to recover static argument types.
    pub(crate) fn place_ty(&self, fcx: &FnCx<'_, 'a>, place: &Place) -> Option<Ty> {
        let mut ty = fcx.mir.local(place.local)?.ty.clone();
        for projection in &place.projections {
            ty = match projection {
                Projection::Field(index) => {
                    let Ty::Named(name) = &ty else { return None };
                    self.struct_defs
                        .borrow()
                        .get(name)?
                        .fields
                        .get(*index as usize)?
                        .ty
                        .clone()
                }
                Projection::Index(_) => match ty {
                    Ty::Array(elem, _) | Ty::Ptr(elem) | Ty::Ref(elem) => *elem,
                    _ => return None,
                },
                Projection::Deref => match ty {
                    Ty::Ptr(inner) | Ty::Ref(inner) => *inner,
                    Ty::Array(elem, None) => *elem,
                    Ty::Str => Ty::Char,
                    _ => return None,
                },
            };
        }
        Some(ty)
    }
}

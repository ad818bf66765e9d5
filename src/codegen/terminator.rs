//! Terminator lowering: branches, switches, returns, and the full call path
//! (overload resolution, interface dispatch, ABI coercion).

use inkwell::types::{BasicType, BasicTypeEnum};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValueEnum, CallableValue, FunctionValue, PointerValue,
};

use super::{CodeGen, DeclaredSig, FnCx};
use crate::diagnostics::CodegenError;
use crate::mir::{BlockId, Operand, Place, Terminator, Ty};

/// One short code per primitive kind; named aggregates carry their name so
/// distinct overloads never collide.
pub fn mangle_code(ty: &Ty) -> String {
    match ty {
        Ty::Void => "v".into(),
        Ty::Bool => "b".into(),
        Ty::Char => "c".into(),
        Ty::I8 => "t".into(),
        Ty::U8 => "yt".into(),
        Ty::I16 => "h".into(),
        Ty::U16 => "yh".into(),
        Ty::I32 => "i".into(),
        Ty::U32 => "yi".into(),
        Ty::I64 => "l".into(),
        Ty::U64 => "yl".into(),
        Ty::Isize => "z".into(),
        Ty::Usize => "yz".into(),
        Ty::F32 => "f".into(),
        Ty::F64 => "d".into(),
        Ty::Str => "s".into(),
        Ty::Ptr(_) | Ty::Ref(_) | Ty::Array(_, _) | Ty::Func(_, _) => "p".into(),
        Ty::Named(name) => format!("S{}", name),
    }
}

/// Deterministic overload suffix; zero-parameter functions keep their base
/// name.
pub fn mangled_name(base: &str, params: &[Ty]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let suffix: String = params.iter().map(|t| mangle_code(t)).collect();
    format!("{}_{}", base, suffix)
}

impl<'a> CodeGen<'a> {
    pub(crate) fn lower_terminator(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        terminator: &Terminator,
    ) -> Result<(), CodegenError> {
        match terminator {
            Terminator::Goto { target } => {
                let target = self.thread_goto_target(fcx, *target)?;
                match fcx.blocks.get(&target) {
                    Some(bb) => {
                        self.builder.build_unconditional_branch(*bb)?;
                    }
                    None => {
                        log::error!(
                            target: "codegen::block",
                            "goto to missing bb{} in `{}`",
                            target,
                            fcx.mir.name
                        );
                        self.emit_return(fcx)?;
                    }
                }
                Ok(())
            }
            Terminator::SwitchInt { discr, targets, otherwise } => {
                let discr_val = self.lower_operand(fcx, discr)?;
                let discr_int = match discr_val {
                    BasicValueEnum::IntValue(i) => i,
                    other => self.to_bool(other)?,
                };
                let Some(else_bb) = fcx.blocks.get(otherwise).copied() else {
                    log::error!(
                        target: "codegen::block",
                        "switch otherwise target bb{} missing in `{}`",
                        otherwise,
                        fcx.mir.name
                    );
                    self.emit_return(fcx)?;
                    return Ok(());
                };
                let discr_ty = discr_int.get_type();
                let mut cases = Vec::with_capacity(targets.len());
                for (value, block) in targets {
                    match fcx.blocks.get(block) {
                        Some(bb) => cases.push((discr_ty.const_int(*value as u64, true), *bb)),
                        None => log::error!(
                            target: "codegen::block",
                            "switch case target bb{} missing in `{}`",
                            block,
                            fcx.mir.name
                        ),
                    }
                }
                self.builder.build_switch(discr_int, else_bb, &cases)?;
                Ok(())
            }
            Terminator::Return => self.emit_return(fcx),
            Terminator::Unreachable => {
                self.builder.build_unreachable()?;
                Ok(())
            }
            Terminator::Call {
                func,
                args,
                destination,
                success,
                interface_name,
                method_name,
                is_virtual,
            } => self.lower_call(
                fcx,
                func,
                args,
                destination.as_ref(),
                *success,
                interface_name.as_deref(),
                method_name.as_deref(),
                *is_virtual,
            ),
        }
    }

    /// Follows chains of empty `Goto` blocks to their first real target.
    /// Every hop is counted by the compilation guard, so a progress-free
    /// cycle trips the visit threshold instead of spinning forever.
    fn thread_goto_target(
        &self,
        fcx: &FnCx<'_, 'a>,
        mut target: BlockId,
    ) -> Result<BlockId, CodegenError> {
        loop {
            let Some(block) = fcx.mir.block(target) else {
                return Ok(target);
            };
            if !block.statements.is_empty() {
                return Ok(target);
            }
            match &block.terminator {
                Terminator::Goto { target: next } => {
                    self.guard.borrow_mut().enter_block(&fcx.mir.name, target)?;
                    target = *next;
                }
                _ => return Ok(target),
            }
        }
    }

    /// Loads and returns the return local; the entry function always
    /// produces an i32 exit code, defaulting to zero.
    pub(crate) fn emit_return(&self, fcx: &mut FnCx<'_, 'a>) -> Result<(), CodegenError> {
        let ret_ty = fcx.mir.return_ty().clone();
        if fcx.is_entry {
            if ret_ty == Ty::Void {
                self.builder.build_return(Some(&self.i32_t.const_zero()))?;
                return Ok(());
            }
            let value = self.lower_operand(fcx, &Operand::Copy(Place::local(fcx.mir.return_local)))?;
            let code = match value {
                BasicValueEnum::IntValue(i) => self.int_resize(i, self.i32_t, false)?,
                _ => self.i32_t.const_zero(),
            };
            self.builder.build_return(Some(&code))?;
            return Ok(());
        }
        if ret_ty == Ty::Void {
            self.builder.build_return(None)?;
            return Ok(());
        }
        let value = self.lower_operand(fcx, &Operand::Copy(Place::local(fcx.mir.return_local)))?;
        let value = self.coerce_return_value(fcx, value, &ret_ty)?;
        self.builder.build_return(Some(&value))?;
        Ok(())
    }

    /// Struct returns leave the function as aggregates even though the
    /// materializer handles struct reads by address.
    fn coerce_return_value(
        &self,
        fcx: &FnCx<'_, 'a>,
        value: BasicValueEnum<'a>,
        ret_ty: &Ty,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let declared = fcx.func.get_type().get_return_type();
        match (value, declared) {
            (BasicValueEnum::PointerValue(p), Some(BasicTypeEnum::StructType(st))) => {
                let addr = self.ptr_cast(p, self.pointer_to(st.into()), "ret.addr")?;
                Ok(self.builder.build_load(addr, "ret.val")?)
            }
            (BasicValueEnum::IntValue(i), Some(BasicTypeEnum::IntType(t))) => {
                Ok(self.int_resize(i, t, ret_ty.is_unsigned())?.into())
            }
            (v, _) => Ok(v),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_call(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        func: &Operand,
        args: &[Operand],
        destination: Option<&Place>,
        success: Option<BlockId>,
        interface_name: Option<&str>,
        method_name: Option<&str>,
        is_virtual: bool,
    ) -> Result<(), CodegenError> {
        let arg_tys: Vec<Option<Ty>> = args.iter().map(|a| self.operand_ty(fcx, a)).collect();

        let result = if is_virtual {
            match (interface_name, method_name) {
                (Some(iface), Some(method)) => {
                    self.lower_virtual_call(fcx, iface, method, args)?
                }
                _ => {
                    log::error!(
                        target: "codegen::block",
                        "virtual call without interface/method names in `{}`",
                        fcx.mir.name
                    );
                    None
                }
            }
        } else {
            match callee_name(func) {
                Some("println") => {
                    self.lower_print_call(fcx, args, &arg_tys, true)?;
                    None
                }
                Some("print") => {
                    self.lower_print_call(fcx, args, &arg_tys, false)?;
                    None
                }
                Some("format") => Some(self.lower_format_call(fcx, args, &arg_tys)?.into()),
                Some(base) => self.lower_direct_call(fcx, base, args, &arg_tys)?,
                None => self.lower_indirect_call(fcx, func, args, destination)?,
            }
        };

        if let (Some(place), Some(value)) = (destination, result) {
            self.store_to_place(fcx, place, value)?;
        }

        match success.and_then(|s| fcx.blocks.get(&s).copied()) {
            Some(bb) => {
                self.builder.build_unconditional_branch(bb)?;
            }
            // A call with no valid successor ends the function.
            None => self.emit_return(fcx)?,
        }
        Ok(())
    }

    fn lower_direct_call(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        base: &str,
        args: &[Operand],
        arg_tys: &[Option<Ty>],
    ) -> Result<Option<BasicValueEnum<'a>>, CodegenError> {
        let Some((callee, sig)) = self.resolve_callee(base, arg_tys) else {
            log::error!(
                target: "codegen::block",
                "unresolved call target `{}` in `{}`",
                base,
                fcx.mir.name
            );
            return Ok(None);
        };
        let call_args = self.build_call_args(fcx, callee, sig.as_ref(), args, arg_tys)?;
        let site = self.builder.build_call(callee, &call_args, "call")?;
        Ok(site.try_as_basic_value().left())
    }

    /// Overload resolution: exact mangled match, then the unsuffixed base,
    /// then an interface-compatibility scan over declared overloads.
    pub(crate) fn resolve_callee(
        &self,
        base: &str,
        arg_tys: &[Option<Ty>],
    ) -> Option<(FunctionValue<'a>, Option<DeclaredSig>)> {
        let mangled = mangled_name(
            base,
            &arg_tys
                .iter()
                .map(|t| t.clone().unwrap_or(Ty::I32))
                .collect::<Vec<_>>(),
        );
        let functions = self.functions.borrow();
        let decls = self.fn_decls.borrow();
        if let Some(f) = functions.get(&mangled) {
            return Some((*f, decls.get(&mangled).cloned()));
        }
        if let Some(f) = functions.get(base) {
            return Some((*f, decls.get(base).cloned()));
        }
        if let Some(f) = self.module.get_function(base) {
            return Some((f, decls.get(base).cloned()));
        }

        // Polymorphic overloads: the call site's concrete struct type can
        // differ from a declared interface parameter. Candidates survive
        // only when every argument is exactly compatible with the declared
        // parameter, interfaces included.
        let survivors: Vec<(&String, &DeclaredSig)> = decls
            .iter()
            .filter(|(_, sig)| sig.base == base && sig.params.len() == arg_tys.len())
            .filter(|(_, sig)| {
                sig.params
                    .iter()
                    .zip(arg_tys.iter())
                    .all(|(param, arg)| self.param_compatible(param, arg.as_ref()))
            })
            .collect();
        match survivors.as_slice() {
            [(symbol, sig)] => functions.get(*symbol).map(|f| (*f, Some((*sig).clone()))),
            [] => None,
            many => {
                log::error!(
                    target: "codegen::block",
                    "ambiguous overload for `{}`: {} candidates",
                    base,
                    many.len()
                );
                None
            }
        }
    }

    fn param_compatible(&self, param: &Ty, arg: Option<&Ty>) -> bool {
        let Some(arg) = arg else {
            // Unknown argument types degrade rather than reject.
            return true;
        };
        match (param, arg) {
            (Ty::Named(p), Ty::Named(a)) => {
                p == a
                    || (self.interface_defs.borrow().contains_key(p)
                        && self.vtables.borrow().contains_key(&format!("{}_{}", a, p)))
            }
            (Ty::Named(_), _) | (_, Ty::Named(_)) => false,
            (p, a) => mangle_code(p) == mangle_code(a),
        }
    }

    /// Lowers arguments and applies the ABI: fat-pointer wrapping for
    /// struct-to-interface passing, then width/kind coercion per the
    /// declared parameter.
    fn build_call_args(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        callee: FunctionValue<'a>,
        sig: Option<&DeclaredSig>,
        args: &[Operand],
        arg_tys: &[Option<Ty>],
    ) -> Result<Vec<BasicMetadataValueEnum<'a>>, CodegenError> {
        let expected: Vec<BasicTypeEnum<'a>> = callee
            .get_type()
            .get_param_types()
            .iter()
            .filter_map(|t| BasicTypeEnum::try_from(*t).ok())
            .collect();
        let mut out = Vec::with_capacity(args.len());
        for (index, operand) in args.iter().enumerate() {
            let value = self.lower_operand(fcx, operand)?;
            let declared = sig.and_then(|s| s.params.get(index));
            let arg_ty = arg_tys.get(index).and_then(|t| t.as_ref());

            if let (Some(Ty::Named(param_name)), Some(Ty::Named(arg_name))) = (declared, arg_ty) {
                let is_interface_param =
                    self.interface_defs.borrow().contains_key(param_name);
                let is_struct_arg = self.struct_defs.borrow().contains_key(arg_name);
                if is_interface_param && is_struct_arg {
                    let fat = self.wrap_fat_pointer(value, arg_name, param_name)?;
                    out.push(fat.into());
                    continue;
                }
            }

            let coerced = self.coerce_value(value, declared, expected.get(index).copied())?;
            out.push(coerced.into());
        }
        Ok(out)
    }

    /// Wraps a concrete struct value into `{data, vtable}` for an interface
    /// parameter, spilling to a stack slot when the value has no address.
    pub(crate) fn wrap_fat_pointer(
        &self,
        value: BasicValueEnum<'a>,
        struct_name: &str,
        interface_name: &str,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let data = match value {
            BasicValueEnum::PointerValue(p) => p,
            other => {
                let slot = self.builder.build_alloca(other.get_type(), "fat.spill")?;
                self.builder.build_store(slot, other)?;
                slot
            }
        };
        let data = self.ptr_cast(data, self.ptr_t, "fat.data")?;

        let key = format!("{}_{}", struct_name, interface_name);
        let vtable = match self.vtables.borrow().get(&key) {
            Some(global) => self.ptr_cast(global.as_pointer_value(), self.ptr_t, "fat.vt")?,
            None => {
                log::error!(
                    target: "codegen::vtable",
                    "no vtable registered for `{}`",
                    key
                );
                self.ptr_t.const_null()
            }
        };

        let fat_ty = self.fat_ptr_type(interface_name);
        let slot = self.builder.build_alloca(fat_ty, "fat.tmp")?;
        let data_slot = self.builder.build_struct_gep(slot, 0, "fat.data.slot")?;
        self.builder.build_store(data_slot, data)?;
        let vt_slot = self.builder.build_struct_gep(slot, 1, "fat.vt.slot")?;
        self.builder.build_store(vt_slot, vtable)?;
        Ok(self.builder.build_load(slot, "fat")?)
    }

    /// Dynamic dispatch: method index by declared order, vtable pointer
    /// offset by `index * pointer-size` bytes, function pointer loaded and
    /// invoked with the data pointer prepended.
    fn lower_virtual_call(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        interface: &str,
        method: &str,
        args: &[Operand],
    ) -> Result<Option<BasicValueEnum<'a>>, CodegenError> {
        let def = self.interface_defs.borrow().get(interface).cloned();
        let Some(def) = def else {
            log::error!(
                target: "codegen::block",
                "virtual call through unknown interface `{}`",
                interface
            );
            return Ok(None);
        };
        let Some(index) = def.methods.iter().position(|m| m.name == method) else {
            log::error!(
                target: "codegen::block",
                "method `{}` not declared on interface `{}`",
                method,
                interface
            );
            return Ok(None);
        };
        let sig = &def.methods[index];

        let Some(receiver) = args.first() else {
            log::error!(target: "codegen::block", "virtual call without a receiver");
            return Ok(None);
        };
        let receiver_val = self.lower_operand(fcx, receiver)?;
        let fat_ty = self.fat_ptr_type(interface);
        let (data, vtable) = match receiver_val {
            BasicValueEnum::StructValue(fat) => {
                let data = self.builder.build_extract_value(fat, 0, "vcall.data")?;
                let vtable = self.builder.build_extract_value(fat, 1, "vcall.vt")?;
                (data.into_pointer_value(), vtable.into_pointer_value())
            }
            BasicValueEnum::PointerValue(fat_addr) => {
                let fat_addr =
                    self.ptr_cast(fat_addr, self.pointer_to(fat_ty.into()), "vcall.fat")?;
                let data_slot =
                    self.builder.build_struct_gep(fat_addr, 0, "vcall.data.slot")?;
                let data = self
                    .builder
                    .build_load(data_slot, "vcall.data")?
                    .into_pointer_value();
                let vt_slot =
                    self.builder.build_struct_gep(fat_addr, 1, "vcall.vt.slot")?;
                let vtable = self
                    .builder
                    .build_load(vt_slot, "vcall.vt")?
                    .into_pointer_value();
                (data, vtable)
            }
            other => {
                log::error!(
                    target: "codegen::block",
                    "virtual receiver is not a fat pointer: {:?}",
                    other
                );
                return Ok(None);
            }
        };

        let vt_base = self.ptr_cast(vtable, self.pointer_to(self.i8_t.into()), "vt.base")?;
        let offset = self.i64_t.const_int(index as u64 * 8, false);
        let slot = unsafe {
            self.builder
                .build_in_bounds_gep(vt_base, &[offset], "vt.slot")?
        };
        let slot = self.ptr_cast(slot, self.pointer_to(self.ptr_t.into()), "vt.slot.ptr")?;
        let fn_ptr = self
            .builder
            .build_load(slot, "vt.fn")?
            .into_pointer_value();

        let mut param_types: Vec<inkwell::types::BasicMetadataTypeEnum<'a>> =
            vec![self.ptr_t.into()];
        for p in &sig.params {
            param_types.push(self.abi_param_type(p).into());
        }
        let fn_type = if sig.ret == Ty::Void {
            self.context.void_type().fn_type(&param_types, false)
        } else {
            self.lower_type(Some(&sig.ret)).fn_type(&param_types, false)
        };

        let mut call_args: Vec<BasicMetadataValueEnum<'a>> = vec![data.into()];
        for (index, operand) in args.iter().enumerate().skip(1) {
            let value = self.lower_operand(fcx, operand)?;
            let declared = sig.params.get(index - 1);
            let expected = declared.map(|t| self.abi_param_type(t));
            call_args.push(self.coerce_value(value, declared, expected)?.into());
        }

        let fn_ptr = self.ptr_cast(
            fn_ptr,
            fn_type.ptr_type(inkwell::AddressSpace::default()),
            "vt.fn.typed",
        )?;
        let callee = CallableValue::try_from(fn_ptr)
            .map_err(|_| CodegenError::structure("virtual slot is not a callable pointer"))?;
        let site = self.builder.build_call(callee, &call_args, "vcall")?;
        Ok(site.try_as_basic_value().left())
    }

    /// Calls through a function-pointer value; the signature is rebuilt from
    /// the static argument and destination types.
    fn lower_indirect_call(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        func: &Operand,
        args: &[Operand],
        destination: Option<&Place>,
    ) -> Result<Option<BasicValueEnum<'a>>, CodegenError> {
        let callee = self.lower_operand(fcx, func)?;
        let BasicValueEnum::PointerValue(fn_ptr) = callee else {
            log::error!(
                target: "codegen::block",
                "indirect call through non-pointer value in `{}`",
                fcx.mir.name
            );
            return Ok(None);
        };

        let declared = match func_sig_ty(self, fcx, func) {
            Some(Ty::Func(params, ret)) => Some((params, *ret)),
            _ => None,
        };

        // A known static signature dictates parameter types and the argument
        // coercions, exactly as for direct calls; without one the signature
        // is rebuilt from the lowered arguments and the destination type.
        let mut values: Vec<BasicMetadataValueEnum<'a>> = Vec::with_capacity(args.len());
        let mut param_types: Vec<inkwell::types::BasicMetadataTypeEnum<'a>> = Vec::new();
        for (index, operand) in args.iter().enumerate() {
            let value = self.lower_operand(fcx, operand)?;
            match declared.as_ref().and_then(|(params, _)| params.get(index)) {
                Some(param) => {
                    let expected = self.abi_param_type(param);
                    let coerced = self.coerce_value(value, Some(param), Some(expected))?;
                    param_types.push(expected.into());
                    values.push(coerced.into());
                }
                None => {
                    param_types.push(value.get_type().into());
                    values.push(value.into());
                }
            }
        }

        let ret_ty = match &declared {
            Some((_, ret)) => ret.clone(),
            None => destination
                .and_then(|p| self.place_ty(fcx, p))
                .unwrap_or(Ty::Void),
        };
        let fn_type = if ret_ty == Ty::Void {
            self.context.void_type().fn_type(&param_types, false)
        } else {
            self.lower_type(Some(&ret_ty)).fn_type(&param_types, false)
        };
        let fn_ptr = self.ptr_cast(
            fn_ptr,
            fn_type.ptr_type(inkwell::AddressSpace::default()),
            "fnptr",
        )?;
        let callee = CallableValue::try_from(fn_ptr)
            .map_err(|_| CodegenError::structure("indirect callee is not a callable pointer"))?;
        let site = self.builder.build_call(callee, &values, "icall")?;
        Ok(site.try_as_basic_value().left())
    }

    /// The print/format intrinsic pipeline: every value is rendered through
    /// the runtime formatters and folded left-to-right with concatenation.
    fn lower_print_call(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        args: &[Operand],
        arg_tys: &[Option<Ty>],
        newline: bool,
    ) -> Result<(), CodegenError> {
        let text = self.fold_format_args(fcx, args, arg_tys)?;
        let printer = if newline { self.rt_println_str() } else { self.rt_print_str() };
        self.builder.build_call(printer, &[text.into()], "")?;
        Ok(())
    }

    fn lower_format_call(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        args: &[Operand],
        arg_tys: &[Option<Ty>],
    ) -> Result<PointerValue<'a>, CodegenError> {
        self.fold_format_args(fcx, args, arg_tys)
    }

    fn fold_format_args(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        args: &[Operand],
        arg_tys: &[Option<Ty>],
    ) -> Result<PointerValue<'a>, CodegenError> {
        let mut parts = args.iter().zip(arg_tys.iter());
        let mut acc = match parts.next() {
            Some((operand, ty)) => {
                let value = self.lower_operand(fcx, operand)?;
                self.to_string_value(value, ty.as_ref())?
            }
            None => self.string_literal("")?,
        };
        for (operand, ty) in parts {
            let value = self.lower_operand(fcx, operand)?;
            let part = self.to_string_value(value, ty.as_ref())?;
            acc = self
                .call_value(
                    self.rt_string_concat(),
                    &[acc.into(), part.into()],
                    "fmt.concat",
                )?
                .into_pointer_value();
        }
        Ok(acc)
    }

    /// Coerces a lowered value to a declared parameter/slot type: integer
    /// widths extend or truncate per signedness, floats extend or truncate,
    /// pointers are freely compatible, and a primitive passed where a
    /// pointer is expected is spilled to a stack slot.
    pub(crate) fn coerce_value(
        &self,
        value: BasicValueEnum<'a>,
        declared: Option<&Ty>,
        expected: Option<BasicTypeEnum<'a>>,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let Some(expected) = expected else {
            return Ok(value);
        };
        let unsigned = declared.map(Ty::is_unsigned).unwrap_or(false);
        match (value, expected) {
            (BasicValueEnum::IntValue(i), BasicTypeEnum::IntType(t)) => {
                Ok(self.int_resize(i, t, unsigned)?.into())
            }
            (BasicValueEnum::FloatValue(f), BasicTypeEnum::FloatType(t)) => {
                if f.get_type() == t {
                    Ok(f.into())
                } else if t == self.f64_t {
                    Ok(self.builder.build_float_ext(f, t, "fpext")?.into())
                } else {
                    Ok(self.builder.build_float_trunc(f, t, "fptrunc")?.into())
                }
            }
            (BasicValueEnum::IntValue(i), BasicTypeEnum::FloatType(t)) => {
                if unsigned {
                    Ok(self.builder.build_unsigned_int_to_float(i, t, "uitofp")?.into())
                } else {
                    Ok(self.builder.build_signed_int_to_float(i, t, "sitofp")?.into())
                }
            }
            (BasicValueEnum::FloatValue(f), BasicTypeEnum::IntType(t)) => {
                Ok(self.builder.build_float_to_signed_int(f, t, "fptosi")?.into())
            }
            (BasicValueEnum::PointerValue(p), BasicTypeEnum::PointerType(t)) => {
                Ok(self.ptr_cast(p, t, "argcast")?.into())
            }
            (BasicValueEnum::PointerValue(p), BasicTypeEnum::IntType(t)) => {
                Ok(self.builder.build_ptr_to_int(p, t, "ptrtoint")?.into())
            }
            (BasicValueEnum::PointerValue(p), BasicTypeEnum::StructType(st)) => {
                // An addressed aggregate passed by value.
                let addr = self.ptr_cast(p, self.pointer_to(st.into()), "agg.addr")?;
                Ok(self.builder.build_load(addr, "agg")?)
            }
            (v, BasicTypeEnum::PointerType(t)) => {
                // Primitive where a pointer is expected: spill and pass the
                // slot address.
                let slot = self.builder.build_alloca(v.get_type(), "arg.spill")?;
                self.builder.build_store(slot, v)?;
                Ok(self.ptr_cast(slot, t, "arg.spill.cast")?.into())
            }
            (v, _) => Ok(v),
        }
    }
}

fn callee_name(func: &Operand) -> Option<&str> {
    match func {
        Operand::Constant(c) => match &c.value {
            crate::mir::ConstValue::Str(name) => Some(name.as_str()),
            _ => None,
        },
        Operand::FunctionRef(name) => Some(name.as_str()),
        _ => None,
    }
}

/// Static function-pointer type of an indirect callee, when known.
fn func_sig_ty<'m, 'a>(cg: &CodeGen<'a>, fcx: &FnCx<'m, 'a>, func: &Operand) -> Option<Ty> {
    cg.operand_ty(fcx, func).filter(|t| matches!(t, Ty::Func(_, _)))
}

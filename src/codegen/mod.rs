//! MIR-to-LLVM lowering engine.
//!
//! `CodeGen` is the per-compilation-unit context: it owns the LLVM module
//! and builder, the cached primitive types, and every symbol table (structs,
//! interfaces, functions, vtables, statics). Assembly runs as one linear
//! pass: struct registration, interface types, function declarations,
//! vtables, then function bodies block by block, all supervised by the
//! compilation guard.

pub mod guard;
mod operand;
mod operators;
mod place;
mod runtime;
pub mod terminator;
mod types;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{
    BasicMetadataTypeEnum, BasicTypeEnum, FloatType, IntType, PointerType, StructType,
};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValueEnum, FunctionValue, GlobalValue, PointerValue,
};
use inkwell::AddressSpace;

pub use guard::{CompilationGuard, GuardConfig};
pub use terminator::{mangle_code, mangled_name};

use crate::diagnostics::CodegenError;
use crate::mir::{
    BasicBlock as MirBlock, BlockId, FormatSpec, InterfaceDef, LocalId, MirFunction, MirProgram,
    Place, Rvalue, Statement, StructDef, Ty,
};

/// Declared signature kept per symbol for overload resolution and argument
/// coercion.
#[derive(Debug, Clone)]
pub struct DeclaredSig {
    pub base: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
}

/// A local's storage during body lowering.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Slot<'a> {
    /// Address-backed: reads load, writes store.
    Addr(PointerValue<'a>),
    /// SSA: the value itself.
    Value(BasicValueEnum<'a>),
}

/// Per-function lowering state.
pub(crate) struct FnCx<'m, 'a> {
    pub mir: &'m MirFunction,
    pub func: FunctionValue<'a>,
    pub slots: HashMap<LocalId, Slot<'a>>,
    pub blocks: HashMap<BlockId, inkwell::basic_block::BasicBlock<'a>>,
    pub is_entry: bool,
}

pub struct CodeGen<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,

    pub i8_t: IntType<'a>,
    pub i16_t: IntType<'a>,
    pub i32_t: IntType<'a>,
    pub i64_t: IntType<'a>,
    pub f32_t: FloatType<'a>,
    pub f64_t: FloatType<'a>,
    pub ptr_t: PointerType<'a>,

    pub(crate) structs: RefCell<HashMap<String, StructType<'a>>>,
    pub(crate) struct_defs: RefCell<HashMap<String, StructDef>>,
    pub(crate) interfaces: RefCell<HashMap<String, StructType<'a>>>,
    pub(crate) interface_defs: RefCell<HashMap<String, InterfaceDef>>,
    pub(crate) functions: RefCell<HashMap<String, FunctionValue<'a>>>,
    pub(crate) fn_decls: RefCell<HashMap<String, DeclaredSig>>,
    pub(crate) vtables: RefCell<HashMap<String, GlobalValue<'a>>>,
    pub(crate) statics: RefCell<HashMap<String, GlobalValue<'a>>>,
    // Identical literals are emitted once and reused.
    pub(crate) string_literals: RefCell<HashMap<String, PointerValue<'a>>>,
    pub(crate) next_str_id: Cell<u32>,
    pub(crate) entry_name: RefCell<String>,

    pub guard: RefCell<CompilationGuard>,
}

impl<'a> CodeGen<'a> {
    pub fn new(context: &'a Context, module_name: &str) -> Self {
        let module = context.create_module(module_name);
        let builder = context.create_builder();
        CodeGen {
            i8_t: context.i8_type(),
            i16_t: context.i16_type(),
            i32_t: context.i32_type(),
            i64_t: context.i64_type(),
            f32_t: context.f32_type(),
            f64_t: context.f64_type(),
            ptr_t: context.i8_type().ptr_type(AddressSpace::default()),
            context,
            module,
            builder,
            structs: RefCell::new(HashMap::new()),
            struct_defs: RefCell::new(HashMap::new()),
            interfaces: RefCell::new(HashMap::new()),
            interface_defs: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
            fn_decls: RefCell::new(HashMap::new()),
            vtables: RefCell::new(HashMap::new()),
            statics: RefCell::new(HashMap::new()),
            string_literals: RefCell::new(HashMap::new()),
            next_str_id: Cell::new(0),
            entry_name: RefCell::new(String::from("main")),
            guard: RefCell::new(CompilationGuard::new()),
        }
    }

    /// Hands the finished module to the consumer; the context performs no
    /// further mutation afterward.
    pub fn into_module(self) -> Module<'a> {
        self.module
    }

    /// Lowers a whole program: types, declarations, vtables, then bodies.
    pub fn lower_program(&self, program: &MirProgram) -> Result<(), CodegenError> {
        self.guard.borrow_mut().reset();
        *self.entry_name.borrow_mut() = program.entry.clone();

        self.register_struct_types(&program.structs);
        for def in &program.interfaces {
            self.interface_defs.borrow_mut().insert(def.name.clone(), def.clone());
        }
        for def in &program.interfaces {
            self.fat_ptr_type(&def.name);
        }

        // Declarations precede every body so forward calls and vtable slots
        // resolve.
        for function in &program.functions {
            self.declare_function(function);
        }
        self.build_vtables(program);

        for function in &program.functions {
            if function.is_extern {
                continue;
            }
            self.lower_function(function).map_err(|e| {
                if e.function.is_none() {
                    e.in_function(&function.name)
                } else {
                    e
                }
            })?;
        }
        Ok(())
    }

    fn symbol_for(&self, function: &MirFunction) -> String {
        let is_entry = function.name == *self.entry_name.borrow();
        if function.is_extern || function.is_variadic || is_entry {
            function.name.clone()
        } else {
            mangled_name(&function.name, &function.arg_tys())
        }
    }

    fn declare_function(&self, function: &MirFunction) -> FunctionValue<'a> {
        let symbol = self.symbol_for(function);
        if let Some(existing) = self.functions.borrow().get(&symbol) {
            return *existing;
        }
        let params = function.arg_tys();
        let param_types: Vec<BasicMetadataTypeEnum<'a>> =
            params.iter().map(|t| self.abi_param_type(t).into()).collect();
        let ret = function.return_ty().clone();
        let is_entry = function.name == *self.entry_name.borrow();
        let fn_type = if is_entry {
            // The entry function is the process entry point: always i32.
            self.i32_t.fn_type(&param_types, function.is_variadic)
        } else if ret == Ty::Void {
            self.context.void_type().fn_type(&param_types, function.is_variadic)
        } else {
            use inkwell::types::BasicType;
            self.lower_type(Some(&ret)).fn_type(&param_types, function.is_variadic)
        };
        let value = self
            .module
            .get_function(&symbol)
            .unwrap_or_else(|| self.module.add_function(&symbol, fn_type, None));
        self.functions.borrow_mut().insert(symbol.clone(), value);
        self.fn_decls
            .borrow_mut()
            .insert(symbol, DeclaredSig { base: function.name.clone(), params, ret });
        value
    }

    /// Looks a function up by symbol, then by declared base name.
    pub(crate) fn find_function(&self, name: &str) -> Option<FunctionValue<'a>> {
        if let Some(f) = self.functions.borrow().get(name) {
            return Some(*f);
        }
        if let Some(f) = self.module.get_function(name) {
            return Some(f);
        }
        let decls = self.fn_decls.borrow();
        let functions = self.functions.borrow();
        decls
            .iter()
            .find(|(_, sig)| sig.base == name)
            .and_then(|(symbol, _)| functions.get(symbol).copied())
    }

    /// Emits one global constant function-pointer array per vtable. Missing
    /// implementations become null slots; a single missing symbol must not
    /// block an otherwise valid build.
    fn build_vtables(&self, program: &MirProgram) {
        for vtable in &program.vtables {
            let entries: Vec<PointerValue<'a>> = vtable
                .entries
                .iter()
                .map(|entry| match entry {
                    Some(name) => match self.find_function(name) {
                        Some(f) => f
                            .as_global_value()
                            .as_pointer_value()
                            .const_cast(self.ptr_t),
                        None => {
                            log::warn!(
                                target: "codegen::vtable",
                                "vtable `{}` references undeclared `{}`, using null",
                                vtable.key(),
                                name
                            );
                            self.ptr_t.const_null()
                        }
                    },
                    None => self.ptr_t.const_null(),
                })
                .collect();
            let array = self.ptr_t.const_array(&entries);
            let global = self.module.add_global(
                self.ptr_t.array_type(entries.len() as u32),
                None,
                &format!("{}_vtable", vtable.key()),
            );
            global.set_initializer(&array);
            global.set_constant(true);
            self.vtables.borrow_mut().insert(vtable.key(), global);
            log::debug!(
                target: "codegen::vtable",
                "vtable `{}` with {} slots",
                vtable.key(),
                entries.len()
            );
        }
    }

    fn lower_function(&self, function: &MirFunction) -> Result<(), CodegenError> {
        let symbol = self.symbol_for(function);
        let Some(func) = self.functions.borrow().get(&symbol).copied() else {
            return Err(CodegenError::structure(format!(
                "function `{}` was never declared",
                function.name
            )));
        };
        self.guard.borrow_mut().begin_function(&function.name);
        let is_entry = function.name == *self.entry_name.borrow();
        let mut fcx = FnCx {
            mir: function,
            func,
            slots: HashMap::new(),
            blocks: HashMap::new(),
            is_entry,
        };

        let entry_bb = self.context.append_basic_block(func, "entry");
        self.builder.position_at_end(entry_bb);

        // Arguments are SSA unless the front end marked them address-backed.
        for (index, arg_id) in function.arg_locals.iter().enumerate() {
            let Some(param) = func.get_nth_param(index as u32) else {
                return Err(CodegenError::structure(format!(
                    "argument {} missing on declared `{}`",
                    index, symbol
                )));
            };
            let address_backed = function
                .local(*arg_id)
                .map(|l| l.is_address_backed)
                .unwrap_or(false);
            if address_backed {
                let slot = self.builder.build_alloca(param.get_type(), "arg")?;
                self.builder.build_store(slot, param)?;
                fcx.slots.insert(*arg_id, Slot::Addr(slot));
            } else {
                fcx.slots.insert(*arg_id, Slot::Value(param));
            }
        }

        let ret_ty = function.return_ty().clone();
        for local in &function.locals {
            if fcx.slots.contains_key(&local.id) {
                continue;
            }
            if local.id == function.return_local {
                if ret_ty != Ty::Void {
                    let slot =
                        self.builder.build_alloca(self.lower_type(Some(&ret_ty)), "retval")?;
                    fcx.slots.insert(local.id, Slot::Addr(slot));
                }
                continue;
            }
            if local.is_static {
                let slot = self.static_slot(function, local)?;
                fcx.slots.insert(local.id, Slot::Addr(slot));
                continue;
            }
            if local.is_address_backed {
                let ty = self.lower_type(Some(&local.ty));
                let name = if local.name.is_empty() {
                    format!("_{}", local.id)
                } else {
                    local.name.clone()
                };
                let slot = self.builder.build_alloca(ty, &name)?;
                fcx.slots.insert(local.id, Slot::Addr(slot));
            }
        }

        for block in &function.blocks {
            let bb = self.context.append_basic_block(func, &format!("bb{}", block.id));
            fcx.blocks.insert(block.id, bb);
        }
        match function.blocks.first() {
            Some(first) => {
                let bb = fcx.blocks[&first.id];
                self.builder.build_unconditional_branch(bb)?;
            }
            None => {
                self.emit_return(&mut fcx)?;
                return Ok(());
            }
        }

        for block in &function.blocks {
            self.lower_block(&mut fcx, block)?;
        }
        Ok(())
    }

    fn lower_block(&self, fcx: &mut FnCx<'_, 'a>, block: &MirBlock) -> Result<(), CodegenError> {
        let bb = fcx.blocks[&block.id];
        self.builder.position_at_end(bb);
        self.guard.borrow_mut().enter_block(&fcx.mir.name, block.id)?;
        log::trace!(
            target: "codegen::block",
            "`{}` bb{}: {} statements",
            fcx.mir.name,
            block.id,
            block.statements.len()
        );
        for statement in &block.statements {
            {
                let mut guard = self.guard.borrow_mut();
                guard.note_statement(statement as *const Statement as usize)?;
                guard.record_instruction(&stmt_fingerprint(statement))?;
            }
            self.lower_statement(fcx, statement)?;
        }
        self.lower_terminator(fcx, &block.terminator)
    }

    fn lower_statement(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        statement: &Statement,
    ) -> Result<(), CodegenError> {
        match statement {
            Statement::Assign(place, rvalue) => {
                let value = self.lower_rvalue(fcx, rvalue)?;
                self.store_to_place(fcx, place, value)
            }
            // Storage markers carry no code; allocas cover the whole frame.
            Statement::StorageLive(_) | Statement::StorageDead(_) | Statement::Nop => Ok(()),
        }
    }

    fn lower_rvalue(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        rvalue: &Rvalue,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        match rvalue {
            Rvalue::Use(operand) => self.lower_operand(fcx, operand),
            Rvalue::BinaryOp(op, lhs, rhs) => self.lower_binary(fcx, *op, lhs, rhs),
            Rvalue::UnaryOp(op, operand) => self.lower_unary(fcx, *op, operand),
            Rvalue::Ref(place) => self.lower_ref(fcx, place),
            Rvalue::Cast(operand, target) => {
                let value = self.lower_operand(fcx, operand)?;
                self.coerce_value(value, Some(target), Some(self.lower_type(Some(target))))
            }
            Rvalue::FormatConvert(operand, spec) => {
                self.lower_format_convert(fcx, operand, *spec)
            }
        }
    }

    /// Address-of. SSA locals are spilled to a fresh slot first; from then
    /// on the local is address-backed.
    fn lower_ref(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        place: &Place,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        if let Some((addr, _)) = self.resolve_place(fcx, place)? {
            return Ok(addr.into());
        }
        if place.projections.is_empty() {
            if let Some(Slot::Value(value)) = fcx.slots.get(&place.local).copied() {
                let slot = self.builder.build_alloca(value.get_type(), "ref.spill")?;
                self.builder.build_store(slot, value)?;
                fcx.slots.insert(place.local, Slot::Addr(slot));
                return Ok(slot.into());
            }
        }
        log::error!(
            target: "codegen::block",
            "cannot take address of place on _{} in `{}`",
            place.local,
            fcx.mir.name
        );
        Ok(self.ptr_t.const_null().into())
    }

    fn lower_format_convert(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        operand: &crate::mir::Operand,
        spec: FormatSpec,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let ty = self.operand_ty(fcx, operand);
        let value = self.lower_operand(fcx, operand)?;
        match spec {
            FormatSpec::Hex | FormatSpec::HexUpper | FormatSpec::Octal | FormatSpec::Binary => {
                let int = match value {
                    BasicValueEnum::IntValue(i) => i,
                    other => {
                        log::error!(
                            target: "codegen::block",
                            "radix format of non-integer value {:?}",
                            other
                        );
                        self.i64_t.const_zero()
                    }
                };
                let unsigned = ty.map(|t| t.is_unsigned()).unwrap_or(false);
                let wide = self.int_resize(int, self.i64_t, unsigned)?;
                let formatter = match spec {
                    FormatSpec::Hex => self.rt_format_hex(),
                    FormatSpec::HexUpper => self.rt_format_hex_upper(),
                    FormatSpec::Octal => self.rt_format_octal(),
                    _ => self.rt_format_binary(),
                };
                self.call_value(formatter, &[wide.into()], "fmt.radix")
            }
            FormatSpec::Precision(digits) => {
                let float = match value {
                    BasicValueEnum::FloatValue(f) if f.get_type() == self.f32_t => {
                        self.builder.build_float_ext(f, self.f64_t, "fmt.ext")?
                    }
                    BasicValueEnum::FloatValue(f) => f,
                    BasicValueEnum::IntValue(i) => {
                        self.builder.build_signed_int_to_float(i, self.f64_t, "fmt.conv")?
                    }
                    other => {
                        log::error!(
                            target: "codegen::block",
                            "precision format of non-numeric value {:?}",
                            other
                        );
                        self.f64_t.const_zero()
                    }
                };
                self.call_value(
                    self.rt_format_double_precision(),
                    &[float.into(), self.i32_t.const_int(u64::from(digits), false).into()],
                    "fmt.prec",
                )
            }
        }
    }

    /// Writes a value into a place, honoring the SSA/address-backed split
    /// and the storage coercions (i1 to byte, width changes, struct copies).
    pub(crate) fn store_to_place(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        place: &Place,
        value: BasicValueEnum<'a>,
    ) -> Result<(), CodegenError> {
        if place.projections.is_empty() {
            let ty = fcx.mir.local(place.local).map(|l| l.ty.clone());
            return match fcx.slots.get(&place.local).copied() {
                Some(Slot::Addr(addr)) => self.store_coerced(addr, value, ty.as_ref()),
                Some(Slot::Value(_)) | None => {
                    if fcx.mir.local(place.local).is_none() {
                        log::error!(
                            target: "codegen::block",
                            "assignment to unknown local _{} in `{}`",
                            place.local,
                            fcx.mir.name
                        );
                        return Ok(());
                    }
                    fcx.slots.insert(place.local, Slot::Value(value));
                    Ok(())
                }
            };
        }
        match self.resolve_place(fcx, place)? {
            Some((addr, ty)) => self.store_coerced(addr, value, Some(&ty)),
            None => Ok(()),
        }
    }

    fn store_coerced(
        &self,
        addr: PointerValue<'a>,
        value: BasicValueEnum<'a>,
        ty: Option<&Ty>,
    ) -> Result<(), CodegenError> {
        let slot_ty = self.lower_type(ty);
        // Struct assignment through an address is a full aggregate copy.
        if let (BasicTypeEnum::StructType(st), BasicValueEnum::PointerValue(src)) =
            (slot_ty, value)
        {
            let src = self.ptr_cast(src, self.pointer_to(st.into()), "copy.src")?;
            let aggregate = self.builder.build_load(src, "copy")?;
            let dst = self.ptr_cast(addr, self.pointer_to(st.into()), "copy.dst")?;
            self.builder.build_store(dst, aggregate)?;
            return Ok(());
        }
        let coerced = self.coerce_value(value, ty, Some(slot_ty))?;
        let addr = self.ptr_cast(addr, self.pointer_to(slot_ty), "store.addr")?;
        self.builder.build_store(addr, coerced)?;
        Ok(())
    }

    /// Module global backing a static local. Cached by function and local id
    /// so same-named statics in one function stay distinct; the symbol keeps
    /// the source name for readability where one exists.
    fn static_slot(
        &self,
        function: &MirFunction,
        local: &crate::mir::LocalDecl,
    ) -> Result<PointerValue<'a>, CodegenError> {
        let key = format!("{}_{}", function.name, local.id);
        if let Some(global) = self.statics.borrow().get(&key) {
            return Ok(global.as_pointer_value());
        }
        let symbol = if local.name.is_empty() {
            key.clone()
        } else {
            format!("{}_{}", function.name, local.name)
        };
        let ty = self.lower_type(Some(&local.ty));
        let global = self.module.add_global(ty, None, &symbol);
        global.set_initializer(&ty.const_zero());
        self.statics.borrow_mut().insert(key, global);
        Ok(global.as_pointer_value())
    }

    /// Builds a call expected to produce a value.
    pub(crate) fn call_value(
        &self,
        function: FunctionValue<'a>,
        args: &[BasicMetadataValueEnum<'a>],
        name: &str,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let site = self.builder.build_call(function, args, name)?;
        site.try_as_basic_value()
            .left()
            .ok_or_else(|| CodegenError::structure(format!("call `{}` produced no value", name)))
    }

    /// No-op when the pointer already has the wanted type.
    pub(crate) fn ptr_cast(
        &self,
        ptr: PointerValue<'a>,
        to: PointerType<'a>,
        name: &str,
    ) -> Result<PointerValue<'a>, CodegenError> {
        if ptr.get_type() == to {
            return Ok(ptr);
        }
        Ok(self.builder.build_pointer_cast(ptr, to, name)?)
    }
}

fn stmt_fingerprint(statement: &Statement) -> String {
    match statement {
        Statement::Assign(place, rvalue) => {
            let tag = match rvalue {
                Rvalue::Use(_) => "use",
                Rvalue::BinaryOp(_, _, _) => "binop",
                Rvalue::UnaryOp(_, _) => "unop",
                Rvalue::Ref(_) => "ref",
                Rvalue::Cast(_, _) => "cast",
                Rvalue::FormatConvert(_, _) => "format",
            };
            format!("assign _{}[{}] {}", place.local, place.projections.len(), tag)
        }
        Statement::StorageLive(local) => format!("live _{}", local),
        Statement::StorageDead(local) => format!("dead _{}", local),
        Statement::Nop => String::from("nop"),
    }
}

//! Binary and unary operator lowering.

use inkwell::values::{BasicValueEnum, FloatValue, IntValue, PointerValue};
use inkwell::{FloatPredicate, IntPredicate};

use super::{CodeGen, FnCx};
use crate::diagnostics::CodegenError;
use crate::mir::{BinOp, Operand, Ty, UnOp};

impl<'a> CodeGen<'a> {
    pub(crate) fn lower_binary(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        op: BinOp,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        // Logical and/or must not evaluate the right operand eagerly.
        if matches!(op, BinOp::And | BinOp::Or) {
            return self.lower_short_circuit(fcx, op, lhs, rhs);
        }

        let lhs_ty = self.operand_ty(fcx, lhs);
        let rhs_ty = self.operand_ty(fcx, rhs);
        let lhs_val = self.lower_operand(fcx, lhs)?;
        let rhs_val = self.lower_operand(fcx, rhs)?;

        // String `+` is concatenation; non-string sides are formatted first.
        if op == BinOp::Add
            && (matches!(lhs_ty, Some(Ty::Str)) || matches!(rhs_ty, Some(Ty::Str)))
        {
            let left = self.to_string_value(lhs_val, lhs_ty.as_ref())?;
            let right = self.to_string_value(rhs_val, rhs_ty.as_ref())?;
            return self.call_value(
                self.rt_string_concat(),
                &[left.into(), right.into()],
                "concat",
            );
        }

        // String equality goes through the runtime, never pointer identity.
        if matches!(op, BinOp::Eq | BinOp::Ne)
            && matches!(lhs_ty, Some(Ty::Str))
            && matches!(rhs_ty, Some(Ty::Str))
        {
            let result = self
                .call_value(
                    self.rt_string_compare(),
                    &[lhs_val.into(), rhs_val.into()],
                    "strcmp",
                )?
                .into_int_value();
            let pred = if op == BinOp::Eq { IntPredicate::EQ } else { IntPredicate::NE };
            return Ok(self
                .builder
                .build_int_compare(pred, result, self.i32_t.const_zero(), "strcmp.res")?
                .into());
        }

        match (lhs_val, rhs_val) {
            (BasicValueEnum::PointerValue(p), BasicValueEnum::IntValue(i)) => {
                self.lower_pointer_int_op(fcx, op, p, i, lhs_ty.as_ref(), false)
            }
            (BasicValueEnum::IntValue(i), BasicValueEnum::PointerValue(p)) => {
                self.lower_pointer_int_op(fcx, op, p, i, rhs_ty.as_ref(), true)
            }
            (BasicValueEnum::PointerValue(l), BasicValueEnum::PointerValue(r)) => {
                self.lower_pointer_pointer_op(op, l, r)
            }
            (l, r) if l.is_float_value() || r.is_float_value() => {
                let (l, r) = self.unify_floats(l, r, lhs_ty.as_ref(), rhs_ty.as_ref())?;
                self.lower_float_op(op, l, r)
            }
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => {
                let lhs_unsigned = lhs_ty.as_ref().map(Ty::is_unsigned).unwrap_or(false);
                let rhs_unsigned = rhs_ty.as_ref().map(Ty::is_unsigned).unwrap_or(false);
                self.lower_int_op(op, l, r, lhs_unsigned, rhs_unsigned)
            }
            (l, _) => {
                log::error!(
                    target: "codegen::block",
                    "unsupported operand kinds for {:?} in `{}`",
                    op,
                    fcx.mir.name
                );
                Ok(l)
            }
        }
    }

    /// Pointer ± integer: the integer is widened to the address width and
    /// scaled by the pointee's element size, then applied as a byte offset.
    fn lower_pointer_int_op(
        &self,
        fcx: &FnCx<'_, 'a>,
        op: BinOp,
        ptr: PointerValue<'a>,
        int: IntValue<'a>,
        ptr_ty: Option<&Ty>,
        int_first: bool,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        match op {
            BinOp::Add | BinOp::Sub => {
                // int - ptr is not meaningful; only ptr-first subtraction.
                if op == BinOp::Sub && int_first {
                    log::error!(
                        target: "codegen::block",
                        "integer minus pointer in `{}`",
                        fcx.mir.name
                    );
                    return Ok(ptr.into());
                }
                let elem_size = ptr_ty
                    .and_then(Ty::pointee)
                    .map(|p| self.element_size(p))
                    .unwrap_or(1);
                let wide = if int.get_type().get_bit_width() < 64 {
                    self.builder.build_int_s_extend(int, self.i64_t, "ptroff.ext")?
                } else {
                    int
                };
                let scaled = self.builder.build_int_mul(
                    wide,
                    self.i64_t.const_int(elem_size, false),
                    "ptroff",
                )?;
                let offset = if op == BinOp::Sub {
                    self.builder.build_int_neg(scaled, "ptroff.neg")?
                } else {
                    scaled
                };
                let base = self.ptr_cast(ptr, self.pointer_to(self.i8_t.into()), "ptr.base")?;
                let gep = unsafe {
                    self.builder
                        .build_in_bounds_gep(base, &[offset], "ptr.add")?
                };
                Ok(gep.into())
            }
            _ if op.is_comparison() => {
                // Null-literal vs. pointer comparisons arrive here: convert
                // the integer to a pointer before comparing.
                let casted =
                    self.builder.build_int_to_ptr(int, ptr.get_type(), "null.cast")?;
                let (l, r) = if int_first { (casted, ptr) } else { (ptr, casted) };
                self.lower_pointer_pointer_op(op, l, r)
            }
            _ => {
                log::error!(
                    target: "codegen::block",
                    "unsupported pointer/integer operator {:?} in `{}`",
                    op,
                    fcx.mir.name
                );
                Ok(ptr.into())
            }
        }
    }

    fn lower_pointer_pointer_op(
        &self,
        op: BinOp,
        lhs: PointerValue<'a>,
        rhs: PointerValue<'a>,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let l = self.builder.build_ptr_to_int(lhs, self.i64_t, "ptr.l")?;
        let r = self.builder.build_ptr_to_int(rhs, self.i64_t, "ptr.r")?;
        match op {
            // Pointer difference is a byte difference at address width.
            BinOp::Sub => Ok(self.builder.build_int_sub(l, r, "ptr.diff")?.into()),
            BinOp::Eq => Ok(self
                .builder
                .build_int_compare(IntPredicate::EQ, l, r, "ptr.eq")?
                .into()),
            BinOp::Ne => Ok(self
                .builder
                .build_int_compare(IntPredicate::NE, l, r, "ptr.ne")?
                .into()),
            BinOp::Lt => Ok(self
                .builder
                .build_int_compare(IntPredicate::ULT, l, r, "ptr.lt")?
                .into()),
            BinOp::Le => Ok(self
                .builder
                .build_int_compare(IntPredicate::ULE, l, r, "ptr.le")?
                .into()),
            BinOp::Gt => Ok(self
                .builder
                .build_int_compare(IntPredicate::UGT, l, r, "ptr.gt")?
                .into()),
            BinOp::Ge => Ok(self
                .builder
                .build_int_compare(IntPredicate::UGE, l, r, "ptr.ge")?
                .into()),
            other => {
                log::error!(target: "codegen::block", "unsupported pointer operator {:?}", other);
                Ok(lhs.into())
            }
        }
    }

    fn unify_floats(
        &self,
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
        lhs_ty: Option<&Ty>,
        rhs_ty: Option<&Ty>,
    ) -> Result<(FloatValue<'a>, FloatValue<'a>), CodegenError> {
        let l = self.to_float(lhs, lhs_ty)?;
        let r = self.to_float(rhs, rhs_ty)?;
        // Promote the narrower side before the op.
        let l_wide = l.get_type() == self.f64_t;
        let r_wide = r.get_type() == self.f64_t;
        match (l_wide, r_wide) {
            (true, false) => Ok((l, self.builder.build_float_ext(r, self.f64_t, "fpext")?)),
            (false, true) => Ok((self.builder.build_float_ext(l, self.f64_t, "fpext")?, r)),
            _ => Ok((l, r)),
        }
    }

    fn to_float(
        &self,
        value: BasicValueEnum<'a>,
        ty: Option<&Ty>,
    ) -> Result<FloatValue<'a>, CodegenError> {
        match value {
            BasicValueEnum::FloatValue(f) => Ok(f),
            BasicValueEnum::IntValue(i) => {
                if ty.map(Ty::is_unsigned).unwrap_or(false) {
                    Ok(self
                        .builder
                        .build_unsigned_int_to_float(i, self.f64_t, "uitofp")?)
                } else {
                    Ok(self.builder.build_signed_int_to_float(i, self.f64_t, "sitofp")?)
                }
            }
            other => {
                log::error!(target: "codegen::block", "non-numeric float operand {:?}", other);
                Ok(self.f64_t.const_zero())
            }
        }
    }

    fn lower_float_op(
        &self,
        op: BinOp,
        l: FloatValue<'a>,
        r: FloatValue<'a>,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let b = &self.builder;
        Ok(match op {
            BinOp::Add => b.build_float_add(l, r, "fadd")?.into(),
            BinOp::Sub => b.build_float_sub(l, r, "fsub")?.into(),
            BinOp::Mul => b.build_float_mul(l, r, "fmul")?.into(),
            BinOp::Div => b.build_float_div(l, r, "fdiv")?.into(),
            BinOp::Rem => b.build_float_rem(l, r, "frem")?.into(),
            BinOp::Eq => b.build_float_compare(FloatPredicate::OEQ, l, r, "fcmp")?.into(),
            BinOp::Ne => b.build_float_compare(FloatPredicate::ONE, l, r, "fcmp")?.into(),
            BinOp::Lt => b.build_float_compare(FloatPredicate::OLT, l, r, "fcmp")?.into(),
            BinOp::Le => b.build_float_compare(FloatPredicate::OLE, l, r, "fcmp")?.into(),
            BinOp::Gt => b.build_float_compare(FloatPredicate::OGT, l, r, "fcmp")?.into(),
            BinOp::Ge => b.build_float_compare(FloatPredicate::OGE, l, r, "fcmp")?.into(),
            other => {
                log::error!(target: "codegen::block", "unsupported float operator {:?}", other);
                l.into()
            }
        })
    }

    fn lower_int_op(
        &self,
        op: BinOp,
        lhs: IntValue<'a>,
        rhs: IntValue<'a>,
        lhs_unsigned: bool,
        rhs_unsigned: bool,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        // Mixed widths unify to the wider operand before any op, including
        // every comparison.
        let (l, r) = self.unify_int_widths(lhs, rhs, lhs_unsigned, rhs_unsigned)?;
        let both_unsigned = lhs_unsigned && rhs_unsigned;
        let b = &self.builder;
        Ok(match op {
            BinOp::Add => b.build_int_add(l, r, "add")?.into(),
            BinOp::Sub => b.build_int_sub(l, r, "sub")?.into(),
            BinOp::Mul => b.build_int_mul(l, r, "mul")?.into(),
            BinOp::Div if both_unsigned => b.build_int_unsigned_div(l, r, "udiv")?.into(),
            BinOp::Div => b.build_int_signed_div(l, r, "sdiv")?.into(),
            BinOp::Rem if both_unsigned => b.build_int_unsigned_rem(l, r, "urem")?.into(),
            BinOp::Rem => b.build_int_signed_rem(l, r, "srem")?.into(),
            BinOp::BitAnd => b.build_and(l, r, "and")?.into(),
            BinOp::BitOr => b.build_or(l, r, "or")?.into(),
            BinOp::BitXor => b.build_xor(l, r, "xor")?.into(),
            BinOp::Shl => b.build_left_shift(l, r, "shl")?.into(),
            BinOp::Shr => b.build_right_shift(l, r, !lhs_unsigned, "shr")?.into(),
            BinOp::Eq => b.build_int_compare(IntPredicate::EQ, l, r, "cmp")?.into(),
            BinOp::Ne => b.build_int_compare(IntPredicate::NE, l, r, "cmp")?.into(),
            BinOp::Lt => {
                let p = if both_unsigned { IntPredicate::ULT } else { IntPredicate::SLT };
                b.build_int_compare(p, l, r, "cmp")?.into()
            }
            BinOp::Le => {
                let p = if both_unsigned { IntPredicate::ULE } else { IntPredicate::SLE };
                b.build_int_compare(p, l, r, "cmp")?.into()
            }
            BinOp::Gt => {
                let p = if both_unsigned { IntPredicate::UGT } else { IntPredicate::SGT };
                b.build_int_compare(p, l, r, "cmp")?.into()
            }
            BinOp::Ge => {
                let p = if both_unsigned { IntPredicate::UGE } else { IntPredicate::SGE };
                b.build_int_compare(p, l, r, "cmp")?.into()
            }
            BinOp::And | BinOp::Or => unreachable!("handled by lower_short_circuit"),
        })
    }

    fn unify_int_widths(
        &self,
        lhs: IntValue<'a>,
        rhs: IntValue<'a>,
        lhs_unsigned: bool,
        rhs_unsigned: bool,
    ) -> Result<(IntValue<'a>, IntValue<'a>), CodegenError> {
        let lw = lhs.get_type().get_bit_width();
        let rw = rhs.get_type().get_bit_width();
        if lw == rw {
            return Ok((lhs, rhs));
        }
        if lw < rw {
            let widened = if lhs_unsigned {
                self.builder.build_int_z_extend(lhs, rhs.get_type(), "zext")?
            } else {
                self.builder.build_int_s_extend(lhs, rhs.get_type(), "sext")?
            };
            Ok((widened, rhs))
        } else {
            let widened = if rhs_unsigned {
                self.builder.build_int_z_extend(rhs, lhs.get_type(), "zext")?
            } else {
                self.builder.build_int_s_extend(rhs, lhs.get_type(), "sext")?
            };
            Ok((lhs, widened))
        }
    }

    /// Short-circuit `&&` / `||` through explicit branching and a phi merge.
    fn lower_short_circuit(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        op: BinOp,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let lhs_val = self.lower_operand(fcx, lhs)?;
        let lhs_bool = self.to_bool(lhs_val)?;
        let lhs_end = self
            .builder
            .get_insert_block()
            .ok_or_else(|| CodegenError::structure("builder has no insertion block"))?;

        let name = if op == BinOp::And { "and" } else { "or" };
        let rhs_bb = self.context.append_basic_block(fcx.func, &format!("{}.rhs", name));
        let merge_bb = self.context.append_basic_block(fcx.func, &format!("{}.end", name));

        if op == BinOp::And {
            self.builder.build_conditional_branch(lhs_bool, rhs_bb, merge_bb)?;
        } else {
            self.builder.build_conditional_branch(lhs_bool, merge_bb, rhs_bb)?;
        }

        self.builder.position_at_end(rhs_bb);
        let rhs_val = self.lower_operand(fcx, rhs)?;
        let rhs_bool = self.to_bool(rhs_val)?;
        let rhs_end = self
            .builder
            .get_insert_block()
            .ok_or_else(|| CodegenError::structure("builder has no insertion block"))?;
        self.builder.build_unconditional_branch(merge_bb)?;

        self.builder.position_at_end(merge_bb);
        let bool_t = self.context.bool_type();
        let phi = self.builder.build_phi(bool_t, &format!("{}.res", name))?;
        let short_value = if op == BinOp::And {
            bool_t.const_zero()
        } else {
            bool_t.const_int(1, false)
        };
        phi.add_incoming(&[(&short_value, lhs_end), (&rhs_bool, rhs_end)]);
        Ok(phi.as_basic_value())
    }

    /// Collapses a value to an i1 truth value.
    pub(crate) fn to_bool(
        &self,
        value: BasicValueEnum<'a>,
    ) -> Result<IntValue<'a>, CodegenError> {
        match value {
            BasicValueEnum::IntValue(i) => {
                if i.get_type().get_bit_width() == 1 {
                    Ok(i)
                } else {
                    Ok(self.builder.build_int_compare(
                        IntPredicate::NE,
                        i,
                        i.get_type().const_zero(),
                        "tobool",
                    )?)
                }
            }
            BasicValueEnum::PointerValue(p) => {
                let addr = self.builder.build_ptr_to_int(p, self.i64_t, "tobool.addr")?;
                Ok(self.builder.build_int_compare(
                    IntPredicate::NE,
                    addr,
                    self.i64_t.const_zero(),
                    "tobool",
                )?)
            }
            BasicValueEnum::FloatValue(f) => Ok(self.builder.build_float_compare(
                FloatPredicate::ONE,
                f,
                f.get_type().const_zero(),
                "tobool",
            )?),
            other => {
                log::error!(target: "codegen::block", "non-scalar truth value {:?}", other);
                Ok(self.context.bool_type().const_zero())
            }
        }
    }

    pub(crate) fn lower_unary(
        &self,
        fcx: &mut FnCx<'_, 'a>,
        op: UnOp,
        operand: &Operand,
    ) -> Result<BasicValueEnum<'a>, CodegenError> {
        let value = self.lower_operand(fcx, operand)?;
        match op {
            // Booleans are stored as bytes, so NOT is a compare against
            // zero, not a bit flip.
            UnOp::Not => {
                let truth = match value {
                    BasicValueEnum::IntValue(i) => self.builder.build_int_compare(
                        IntPredicate::EQ,
                        i,
                        i.get_type().const_zero(),
                        "not",
                    )?,
                    other => {
                        let b = self.to_bool(other)?;
                        self.builder.build_int_compare(
                            IntPredicate::EQ,
                            b,
                            self.context.bool_type().const_zero(),
                            "not",
                        )?
                    }
                };
                Ok(self.builder.build_int_z_extend(truth, self.i8_t, "not.byte")?.into())
            }
            UnOp::Neg => match value {
                BasicValueEnum::IntValue(i) => {
                    Ok(self.builder.build_int_neg(i, "neg")?.into())
                }
                BasicValueEnum::FloatValue(f) => {
                    Ok(self.builder.build_float_neg(f, "fneg")?.into())
                }
                other => {
                    log::error!(
                        target: "codegen::block",
                        "negation of non-numeric value in `{}`",
                        fcx.mir.name
                    );
                    Ok(other)
                }
            },
        }
    }

    /// Formats a value to a runtime string per its static type; pointers are
    /// assumed to already be strings.
    pub(crate) fn to_string_value(
        &self,
        value: BasicValueEnum<'a>,
        ty: Option<&Ty>,
    ) -> Result<PointerValue<'a>, CodegenError> {
        match value {
            BasicValueEnum::PointerValue(p) => Ok(p),
            BasicValueEnum::IntValue(i) => {
                match ty {
                    Some(Ty::Bool) => {
                        let byte = self.int_resize(i, self.i8_t, false)?;
                        Ok(self
                            .call_value(self.rt_format_bool(), &[byte.into()], "fmt.bool")?
                            .into_pointer_value())
                    }
                    Some(Ty::Char) => {
                        let byte = self.int_resize(i, self.i8_t, false)?;
                        Ok(self
                            .call_value(self.rt_format_char(), &[byte.into()], "fmt.char")?
                            .into_pointer_value())
                    }
                    Some(t) if t.is_unsigned() => {
                        let word = self.int_resize(i, self.i32_t, true)?;
                        Ok(self
                            .call_value(self.rt_format_uint(), &[word.into()], "fmt.uint")?
                            .into_pointer_value())
                    }
                    _ => {
                        let word = self.int_resize(i, self.i32_t, false)?;
                        Ok(self
                            .call_value(self.rt_format_int(), &[word.into()], "fmt.int")?
                            .into_pointer_value())
                    }
                }
            }
            BasicValueEnum::FloatValue(f) => {
                let wide = if f.get_type() == self.f32_t {
                    self.builder.build_float_ext(f, self.f64_t, "fmt.ext")?
                } else {
                    f
                };
                Ok(self
                    .call_value(self.rt_format_double(), &[wide.into()], "fmt.double")?
                    .into_pointer_value())
            }
            other => {
                log::error!(target: "codegen::block", "unformattable value {:?}", other);
                self.string_literal("<?>")
            }
        }
    }

    /// Adjusts an integer to a target width; `unsigned` picks zero extension.
    pub(crate) fn int_resize(
        &self,
        value: IntValue<'a>,
        target: inkwell::types::IntType<'a>,
        unsigned: bool,
    ) -> Result<IntValue<'a>, CodegenError> {
        let from = value.get_type().get_bit_width();
        let to = target.get_bit_width();
        if from == to {
            Ok(value)
        } else if from < to {
            // An i1 always widens by zero extension; sign extending a flag
            // would turn true into -1.
            if unsigned || from == 1 {
                Ok(self.builder.build_int_z_extend(value, target, "zext")?)
            } else {
                Ok(self.builder.build_int_s_extend(value, target, "sext")?)
            }
        } else {
            Ok(self.builder.build_int_truncate(value, target, "trunc")?)
        }
    }
}

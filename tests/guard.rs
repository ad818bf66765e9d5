//! Compilation-guard tests over whole programs: degenerate control flow must
//! abort the compilation unit instead of hanging the compiler.

use anyhow::Result;
use inkwell::context::Context;

use cinderc_llvm::codegen::{CodeGen, CompilationGuard, GuardConfig};
use cinderc_llvm::diagnostics::ErrorCategory;
use cinderc_llvm::mir::{
    BasicBlock, LocalDecl, MirFunction, MirProgram, Operand, Place, Rvalue, Statement,
    Terminator, Ty,
};

fn main_with_blocks(blocks: Vec<BasicBlock>) -> MirProgram {
    MirProgram {
        functions: vec![MirFunction {
            name: "main".into(),
            locals: vec![LocalDecl {
                id: 0,
                name: "ret".into(),
                ty: Ty::I32,
                is_user_variable: false,
                is_address_backed: false,
                is_static: false,
            }],
            arg_locals: vec![],
            return_local: 0,
            blocks,
            is_extern: false,
            is_variadic: false,
        }],
        structs: vec![],
        interfaces: vec![],
        vtables: vec![],
        entry: "main".into(),
    }
}

#[test]
fn progress_free_two_block_cycle_trips_the_guard() {
    let prog = main_with_blocks(vec![
        BasicBlock { id: 0, statements: vec![], terminator: Terminator::Goto { target: 1 } },
        BasicBlock { id: 1, statements: vec![], terminator: Terminator::Goto { target: 0 } },
    ]);
    let context = Context::create();
    let cg = CodeGen::new(&context, "guard_test");
    cg.guard.replace(CompilationGuard::with_config(GuardConfig {
        max_block_visits: 16,
        ..GuardConfig::default()
    }));
    let err = cg.lower_program(&prog).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ResourceExhaustion);
    assert!(err.message.contains("infinite loop detected"), "{}", err);
}

#[test]
fn acyclic_goto_chain_lowers_cleanly() -> Result<()> {
    let prog = main_with_blocks(vec![
        BasicBlock { id: 0, statements: vec![], terminator: Terminator::Goto { target: 1 } },
        BasicBlock { id: 1, statements: vec![], terminator: Terminator::Goto { target: 2 } },
        BasicBlock {
            id: 2,
            statements: vec![Statement::Assign(
                Place::local(0),
                Rvalue::Use(Operand::const_int(0, Ty::I32)),
            )],
            terminator: Terminator::Return,
        },
    ]);
    let context = Context::create();
    let cg = CodeGen::new(&context, "guard_test");
    cg.guard.replace(CompilationGuard::with_config(GuardConfig {
        max_block_visits: 16,
        ..GuardConfig::default()
    }));
    cg.lower_program(&prog)?;
    let ir = cg.into_module().print_to_string().to_string();
    assert!(ir.contains("define i32 @main"), "{}", ir);
    Ok(())
}

#[test]
fn ordinary_backward_branch_is_not_a_loop_to_the_guard() -> Result<()> {
    // A conditional back edge is normal control flow; only progress-free
    // goto chains revisit blocks during lowering.
    let prog = main_with_blocks(vec![
        BasicBlock {
            id: 0,
            statements: vec![],
            terminator: Terminator::SwitchInt {
                discr: Operand::const_int(0, Ty::I32),
                targets: vec![(1, 0)],
                otherwise: 1,
            },
        },
        BasicBlock {
            id: 1,
            statements: vec![Statement::Assign(
                Place::local(0),
                Rvalue::Use(Operand::const_int(0, Ty::I32)),
            )],
            terminator: Terminator::Return,
        },
    ]);
    let context = Context::create();
    let cg = CodeGen::new(&context, "guard_test");
    cg.guard.replace(CompilationGuard::with_config(GuardConfig {
        max_block_visits: 4,
        ..GuardConfig::default()
    }));
    cg.lower_program(&prog)?;
    Ok(())
}

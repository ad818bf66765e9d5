//! End-to-end lowering tests: build a small MIR program, lower it, and
//! assert over the printed IR.

use anyhow::Result;
use inkwell::context::Context;

use cinderc_llvm::codegen::CodeGen;
use cinderc_llvm::mir::{
    BasicBlock, BinOp, FieldDef, InterfaceDef, LocalDecl, MethodSig, MirFunction, MirProgram,
    Operand, Place, Projection, Rvalue, Statement, StructDef, Terminator, Ty, UnOp, VtableDef,
};

fn local(id: u32, name: &str, ty: Ty, address_backed: bool) -> LocalDecl {
    LocalDecl {
        id,
        name: name.into(),
        ty,
        is_user_variable: true,
        is_address_backed: address_backed,
        is_static: false,
    }
}

fn function(
    name: &str,
    locals: Vec<LocalDecl>,
    arg_locals: Vec<u32>,
    blocks: Vec<BasicBlock>,
) -> MirFunction {
    MirFunction {
        name: name.into(),
        locals,
        arg_locals,
        return_local: 0,
        blocks,
        is_extern: false,
        is_variadic: false,
    }
}

fn extern_function(name: &str, locals: Vec<LocalDecl>, arg_locals: Vec<u32>) -> MirFunction {
    MirFunction {
        name: name.into(),
        locals,
        arg_locals,
        return_local: 0,
        blocks: Vec::new(),
        is_extern: true,
        is_variadic: false,
    }
}

fn program(functions: Vec<MirFunction>) -> MirProgram {
    MirProgram {
        functions,
        structs: Vec::new(),
        interfaces: Vec::new(),
        vtables: Vec::new(),
        entry: "main".into(),
    }
}

fn lower(program: &MirProgram) -> Result<String> {
    let _ = env_logger::builder().is_test(true).try_init();
    let context = Context::create();
    let cg = CodeGen::new(&context, "lowering_test");
    cg.lower_program(program)?;
    let module = cg.into_module();
    let ir = module.print_to_string().to_string();
    Ok(ir)
}

#[test]
fn entry_returns_exit_code() -> Result<()> {
    let main = function(
        "main",
        vec![local(0, "ret", Ty::I32, false)],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![Statement::Assign(
                Place::local(0),
                Rvalue::Use(Operand::const_int(7, Ty::I32)),
            )],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("define i32 @main"), "entry must return i32:\n{}", ir);
    assert!(ir.contains("ret i32"), "missing integer return:\n{}", ir);
    Ok(())
}

#[test]
fn integer_constants_keep_their_tagged_width() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "small", Ty::I16, true),
            local(2, "wide", Ty::I64, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(1),
                    Rvalue::Use(Operand::const_int(300, Ty::I16)),
                ),
                Statement::Assign(
                    Place::local(2),
                    Rvalue::Use(Operand::const_int(1 << 40, Ty::I64)),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("store i16 300"), "i16 width lost:\n{}", ir);
    assert!(
        ir.contains(&format!("store i64 {}", 1u64 << 40)),
        "i64 width lost:\n{}",
        ir
    );
    Ok(())
}

#[test]
fn struct_field_assignment_uses_typed_gep() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "pair", Ty::Named("Pair".into()), true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place { local: 1, projections: vec![Projection::Field(1)] },
                    Rvalue::Use(Operand::const_int(5, Ty::I64)),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let mut prog = program(vec![main]);
    prog.structs = vec![StructDef {
        name: "Pair".into(),
        fields: vec![
            FieldDef { name: "a".into(), ty: Ty::I32 },
            FieldDef { name: "b".into(), ty: Ty::I64 },
        ],
    }];
    let ir = lower(&prog)?;
    assert!(ir.contains("%Pair = type { i32, i64 }"), "struct body missing:\n{}", ir);
    assert!(ir.contains("i32 0, i32 1"), "field gep indices missing:\n{}", ir);
    Ok(())
}

#[test]
fn pointer_addition_scales_by_element_size() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "p", Ty::Ptr(Box::new(Ty::I64)), true),
            local(2, "q", Ty::Ptr(Box::new(Ty::I64)), true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(2),
                    Rvalue::BinaryOp(
                        BinOp::Add,
                        Operand::Copy(Place::local(1)),
                        Operand::const_int(2, Ty::I32),
                    ),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    // 2 elements of i64 is a 16-byte offset.
    assert!(ir.contains("i64 16"), "offset not scaled by element size:\n{}", ir);
    Ok(())
}

#[test]
fn pointer_difference_is_integer_subtraction() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "p", Ty::Ptr(Box::new(Ty::I8)), true),
            local(2, "q", Ty::Ptr(Box::new(Ty::I8)), true),
            local(3, "d", Ty::I64, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(3),
                    Rvalue::BinaryOp(
                        BinOp::Sub,
                        Operand::Copy(Place::local(1)),
                        Operand::Copy(Place::local(2)),
                    ),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("ptrtoint"), "difference must go through ptrtoint:\n{}", ir);
    assert!(ir.contains("sub i64"), "difference must subtract at i64:\n{}", ir);
    Ok(())
}

#[test]
fn overloads_get_distinct_symbols_and_call_sites_pick_by_type() -> Result<()> {
    let add_body = |ret_ty: Ty, arg_ty: Ty| {
        function(
            "add",
            vec![
                local(0, "ret", ret_ty, false),
                local(1, "a", arg_ty.clone(), false),
                local(2, "b", arg_ty, false),
            ],
            vec![1, 2],
            vec![BasicBlock {
                id: 0,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::BinaryOp(
                        BinOp::Add,
                        Operand::Copy(Place::local(1)),
                        Operand::Copy(Place::local(2)),
                    ),
                )],
                terminator: Terminator::Return,
            }],
        )
    };
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "x", Ty::F64, true),
        ],
        vec![],
        vec![
            BasicBlock {
                id: 0,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                )],
                terminator: Terminator::Call {
                    func: Operand::FunctionRef("add".into()),
                    args: vec![
                        Operand::const_float(1.5, Ty::F64),
                        Operand::const_float(2.5, Ty::F64),
                    ],
                    destination: Some(Place::local(1)),
                    success: Some(1),
                    interface_name: None,
                    method_name: None,
                    is_virtual: false,
                },
            },
            BasicBlock { id: 1, statements: vec![], terminator: Terminator::Return },
        ],
    );
    let ir = lower(&program(vec![
        add_body(Ty::I32, Ty::I32),
        add_body(Ty::F64, Ty::F64),
        main,
    ]))?;
    assert!(ir.contains("define i32 @add_ii"), "integer overload missing:\n{}", ir);
    assert!(ir.contains("define double @add_dd"), "float overload missing:\n{}", ir);
    assert!(ir.contains("call double @add_dd"), "call site picked wrong overload:\n{}", ir);
    Ok(())
}

#[test]
fn virtual_call_loads_slot_by_method_index() -> Result<()> {
    let circle_method = |name: &str, ret: Ty, extra: Option<Ty>| {
        let mut locals = vec![
            local(0, "ret", ret, false),
            local(1, "self", Ty::Ptr(Box::new(Ty::Named("Circle".into()))), false),
        ];
        let mut args = vec![1];
        if let Some(ty) = extra {
            locals.push(local(2, "factor", ty, false));
            args.push(2);
        }
        extern_function(name, locals, args)
    };
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "shape", Ty::Named("Shape".into()), true),
            local(2, "result", Ty::F64, true),
        ],
        vec![],
        vec![
            BasicBlock {
                id: 0,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                )],
                terminator: Terminator::Call {
                    func: Operand::const_str("scale"),
                    args: vec![
                        Operand::Copy(Place::local(1)),
                        Operand::const_float(2.0, Ty::F64),
                    ],
                    destination: Some(Place::local(2)),
                    success: Some(1),
                    interface_name: Some("Shape".into()),
                    method_name: Some("scale".into()),
                    is_virtual: true,
                },
            },
            BasicBlock { id: 1, statements: vec![], terminator: Terminator::Return },
        ],
    );
    let mut prog = program(vec![
        circle_method("circle_area", Ty::F64, None),
        circle_method("circle_scale", Ty::F64, Some(Ty::F64)),
        main,
    ]);
    prog.structs = vec![StructDef {
        name: "Circle".into(),
        fields: vec![FieldDef { name: "radius".into(), ty: Ty::F64 }],
    }];
    prog.interfaces = vec![InterfaceDef {
        name: "Shape".into(),
        methods: vec![
            MethodSig { name: "area".into(), params: vec![], ret: Ty::F64 },
            MethodSig { name: "scale".into(), params: vec![Ty::F64], ret: Ty::F64 },
        ],
    }];
    prog.vtables = vec![VtableDef {
        struct_name: "Circle".into(),
        interface_name: "Shape".into(),
        entries: vec![Some("circle_area".into()), Some("circle_scale".into())],
    }];
    let ir = lower(&prog)?;
    assert!(ir.contains("@Circle_Shape_vtable"), "vtable global missing:\n{}", ir);
    assert!(ir.contains("Shape_fat_ptr"), "fat-pointer type missing:\n{}", ir);
    // Method index 1 at pointer width: byte offset 8 into the vtable.
    assert!(ir.contains("i64 8"), "slot offset missing:\n{}", ir);
    Ok(())
}

#[test]
fn string_plus_integer_formats_then_concatenates() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "s", Ty::Str, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(1),
                    Rvalue::BinaryOp(
                        BinOp::Add,
                        Operand::const_str("x"),
                        Operand::const_int(1, Ty::I32),
                    ),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("cinder_format_int"), "integer side not formatted:\n{}", ir);
    assert!(ir.contains("cinder_string_concat"), "concatenation call missing:\n{}", ir);
    Ok(())
}

#[test]
fn boolean_not_compares_the_stored_byte() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "b", Ty::Bool, true),
            local(2, "nb", Ty::Bool, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(2),
                    Rvalue::UnaryOp(UnOp::Not, Operand::Copy(Place::local(1))),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("icmp eq i8"), "not must compare the byte:\n{}", ir);
    assert!(ir.contains("zext i1"), "result must widen back to a byte:\n{}", ir);
    Ok(())
}

#[test]
fn logical_and_short_circuits() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "a", Ty::Bool, true),
            local(2, "b", Ty::Bool, true),
            local(3, "c", Ty::Bool, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(3),
                    Rvalue::BinaryOp(
                        BinOp::And,
                        Operand::Copy(Place::local(1)),
                        Operand::Copy(Place::local(2)),
                    ),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("and.rhs"), "right operand block missing:\n{}", ir);
    assert!(ir.contains("phi i1"), "merge phi missing:\n{}", ir);
    Ok(())
}

#[test]
fn switch_int_lowers_to_llvm_switch() -> Result<()> {
    let main = function(
        "main",
        vec![local(0, "ret", Ty::I32, false), local(1, "x", Ty::I32, true)],
        vec![],
        vec![
            BasicBlock {
                id: 0,
                statements: vec![],
                terminator: Terminator::SwitchInt {
                    discr: Operand::Copy(Place::local(1)),
                    targets: vec![(0, 1), (1, 2)],
                    otherwise: 3,
                },
            },
            BasicBlock {
                id: 1,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(10, Ty::I32)),
                )],
                terminator: Terminator::Return,
            },
            BasicBlock {
                id: 2,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(20, Ty::I32)),
                )],
                terminator: Terminator::Return,
            },
            BasicBlock {
                id: 3,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(30, Ty::I32)),
                )],
                terminator: Terminator::Return,
            },
        ],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("switch i32"), "switch instruction missing:\n{}", ir);
    Ok(())
}

#[test]
fn static_local_lowers_to_module_global() -> Result<()> {
    let tick = function(
        "tick",
        vec![
            local(0, "ret", Ty::I32, false),
            LocalDecl {
                id: 1,
                name: "counter".into(),
                ty: Ty::I64,
                is_user_variable: true,
                is_address_backed: true,
                is_static: true,
            },
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(1),
                    Rvalue::BinaryOp(
                        BinOp::Add,
                        Operand::Copy(Place::local(1)),
                        Operand::const_int(1, Ty::I64),
                    ),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![tick]))?;
    assert!(ir.contains("@tick_counter"), "static global missing:\n{}", ir);
    Ok(())
}

#[test]
fn radix_formatting_widens_and_calls_the_runtime() -> Result<()> {
    use cinderc_llvm::mir::FormatSpec;
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "x", Ty::I32, true),
            local(2, "s", Ty::Str, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(2),
                    Rvalue::FormatConvert(Operand::Copy(Place::local(1)), FormatSpec::Hex),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("sext i32"), "radix input must widen to i64:\n{}", ir);
    assert!(ir.contains("cinder_format_hex"), "hex formatter missing:\n{}", ir);
    Ok(())
}

#[test]
fn address_of_ssa_local_spills_it_to_a_slot() -> Result<()> {
    // x lives in a register until its address is taken.
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "x", Ty::I32, false),
            local(2, "p", Ty::Ptr(Box::new(Ty::I32)), true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(1),
                    Rvalue::Use(Operand::const_int(42, Ty::I32)),
                ),
                Statement::Assign(Place::local(2), Rvalue::Ref(Place::local(1))),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("ref.spill"), "address-of must create storage:\n{}", ir);
    assert!(ir.contains("store i32 42"), "spilled value must be stored:\n{}", ir);
    Ok(())
}

#[test]
fn int_to_float_cast_converts_by_signedness() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "x", Ty::I32, true),
            local(2, "y", Ty::F64, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(2),
                    Rvalue::Cast(Operand::Copy(Place::local(1)), Ty::F64),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("sitofp"), "signed int cast must use sitofp:\n{}", ir);
    Ok(())
}

#[test]
fn indirect_call_coerces_arguments_to_the_declared_signature() -> Result<()> {
    let target = extern_function(
        "target",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "x", Ty::I64, false),
        ],
        vec![1],
    );
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "f", Ty::Func(vec![Ty::I64], Box::new(Ty::I32)), true),
            local(2, "r", Ty::I32, true),
        ],
        vec![],
        vec![
            BasicBlock {
                id: 0,
                statements: vec![Statement::Assign(
                    Place::local(1),
                    Rvalue::Use(Operand::FunctionRef("target".into())),
                )],
                terminator: Terminator::Call {
                    func: Operand::Copy(Place::local(1)),
                    args: vec![Operand::const_int(7, Ty::I32)],
                    destination: Some(Place::local(2)),
                    success: Some(1),
                    interface_name: None,
                    method_name: None,
                    is_virtual: false,
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
        ],
    );
    let prog = program(vec![target, main]);
    let context = Context::create();
    let cg = CodeGen::new(&context, "lowering_test");
    cg.lower_program(&prog)?;
    let module = cg.into_module();
    let ir = module.print_to_string().to_string();
    assert!(
        ir.contains("i64 7"),
        "argument not widened to the declared i64 parameter:\n{}",
        ir
    );
    assert!(module.verify().is_ok(), "module failed verification:\n{}", ir);
    Ok(())
}

#[test]
fn println_formats_the_value_then_prints() -> Result<()> {
    let main = function(
        "main",
        vec![local(0, "ret", Ty::I32, false)],
        vec![],
        vec![
            BasicBlock {
                id: 0,
                statements: vec![Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                )],
                terminator: Terminator::Call {
                    func: Operand::const_str("println"),
                    args: vec![Operand::const_int(5, Ty::I32)],
                    destination: None,
                    success: Some(1),
                    interface_name: None,
                    method_name: None,
                    is_virtual: false,
                },
            },
            BasicBlock { id: 1, statements: vec![], terminator: Terminator::Return },
        ],
    );
    let ir = lower(&program(vec![main]))?;
    assert!(ir.contains("cinder_format_int"), "value not formatted:\n{}", ir);
    assert!(ir.contains("cinder_println_str"), "print call missing:\n{}", ir);
    Ok(())
}

#[test]
fn same_named_statics_use_distinct_globals() -> Result<()> {
    let static_local = |id: u32| LocalDecl {
        id,
        name: "n".into(),
        ty: Ty::I32,
        is_user_variable: true,
        is_address_backed: true,
        is_static: true,
    };
    let dup = function(
        "dup",
        vec![
            local(0, "ret", Ty::I32, false),
            static_local(1),
            static_local(2),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(
                    Place::local(1),
                    Rvalue::Use(Operand::const_int(1, Ty::I32)),
                ),
                Statement::Assign(
                    Place::local(2),
                    Rvalue::Use(Operand::const_int(2, Ty::I32)),
                ),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![dup]))?;
    let count = ir.matches("= global i32 0").count();
    assert_eq!(count, 2, "each static local needs its own global:\n{}", ir);
    Ok(())
}

#[test]
fn identical_string_literals_are_interned_once() -> Result<()> {
    let main = function(
        "main",
        vec![
            local(0, "ret", Ty::I32, false),
            local(1, "a", Ty::Str, true),
            local(2, "b", Ty::Str, true),
        ],
        vec![],
        vec![BasicBlock {
            id: 0,
            statements: vec![
                Statement::Assign(Place::local(1), Rvalue::Use(Operand::const_str("hello"))),
                Statement::Assign(Place::local(2), Rvalue::Use(Operand::const_str("hello"))),
                Statement::Assign(
                    Place::local(0),
                    Rvalue::Use(Operand::const_int(0, Ty::I32)),
                ),
            ],
            terminator: Terminator::Return,
        }],
    );
    let ir = lower(&program(vec![main]))?;
    let count = ir.matches("c\"hello\\00\"").count();
    assert_eq!(count, 1, "literal should appear exactly once:\n{}", ir);
    Ok(())
}

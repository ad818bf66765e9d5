//! Mid-level IR consumed by the LLVM backend.
//!
//! A `MirProgram` is a flat set of functions, struct and interface
//! definitions, and vtables, produced in-memory by the front end. Function
//! bodies are control-flow graphs of basic blocks over statically-typed
//! locals. Every node is a closed enum so that a missing lowering case is a
//! compile-time error, not a silent fallthrough.

pub type LocalId = u32;
pub type BlockId = u32;

/// Semantic types as the front end resolved them.
#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Void,
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Isize,
    Usize,
    F32,
    F64,
    Str,
    Ptr(Box<Ty>),
    Ref(Box<Ty>),
    /// `None` length means a dynamically-sized slice.
    Array(Box<Ty>, Option<u32>),
    /// A registered struct or interface, by name.
    Named(String),
    Func(Vec<Ty>, Box<Ty>),
}

impl Ty {
    pub fn is_float(&self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Ty::Bool
                | Ty::Char
                | Ty::I8
                | Ty::U8
                | Ty::I16
                | Ty::U16
                | Ty::I32
                | Ty::U32
                | Ty::I64
                | Ty::U64
                | Ty::Isize
                | Ty::Usize
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Ty::U8 | Ty::U16 | Ty::U32 | Ty::U64 | Ty::Usize)
    }

    /// Pointer-like types that lower to a single opaque pointer.
    pub fn is_pointer_like(&self) -> bool {
        matches!(
            self,
            Ty::Str | Ty::Ptr(_) | Ty::Ref(_) | Ty::Func(_, _) | Ty::Array(_, None)
        )
    }

    /// The type reached through one level of indirection, if any.
    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Ptr(inner) | Ty::Ref(inner) => Some(inner),
            Ty::Array(elem, None) => Some(elem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirProgram {
    pub functions: Vec<MirFunction>,
    pub structs: Vec<StructDef>,
    pub interfaces: Vec<InterfaceDef>,
    pub vtables: Vec<VtableDef>,
    /// Name of the process entry function.
    pub entry: String,
}

#[derive(Debug, Clone)]
pub struct MirFunction {
    pub name: String,
    pub locals: Vec<LocalDecl>,
    /// Indices into `locals` that receive the incoming arguments, in order.
    pub arg_locals: Vec<LocalId>,
    /// Always present; its type is `Ty::Void` for void functions.
    pub return_local: LocalId,
    pub blocks: Vec<BasicBlock>,
    pub is_extern: bool,
    pub is_variadic: bool,
}

impl MirFunction {
    pub fn local(&self, id: LocalId) -> Option<&LocalDecl> {
        self.locals.iter().find(|l| l.id == id)
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn return_ty(&self) -> &Ty {
        self.local(self.return_local).map(|l| &l.ty).unwrap_or(&Ty::Void)
    }

    pub fn arg_tys(&self) -> Vec<Ty> {
        self.arg_locals
            .iter()
            .filter_map(|id| self.local(*id).map(|l| l.ty.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub id: LocalId,
    pub name: String,
    pub ty: Ty,
    /// Declared in source (as opposed to a lowering temporary).
    pub is_user_variable: bool,
    /// Reads load and writes store; SSA locals hold their value directly.
    pub is_address_backed: bool,
    /// Lowered to a module global surviving across calls.
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Assign(Place, Rvalue),
    StorageLive(LocalId),
    StorageDead(LocalId),
    Nop,
}

#[derive(Debug, Clone)]
pub enum Rvalue {
    Use(Operand),
    BinaryOp(BinOp, Operand, Operand),
    UnaryOp(UnOp, Operand),
    /// Address-of.
    Ref(Place),
    Cast(Operand, Ty),
    /// Convert a value to its string rendering with an explicit format.
    FormatConvert(Operand, FormatSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSpec {
    Hex,
    HexUpper,
    Octal,
    Binary,
    Precision(u32),
}

/// A storage location: a local plus a chain of projections.
#[derive(Debug, Clone)]
pub struct Place {
    pub local: LocalId,
    pub projections: Vec<Projection>,
}

impl Place {
    pub fn local(id: LocalId) -> Self {
        Place { local: id, projections: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub enum Projection {
    Field(u32),
    /// Index by the value currently held in another local.
    Index(LocalId),
    Deref,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Copy(Place),
    Move(Place),
    Constant(Constant),
    /// A callable's name used as a first-class value.
    FunctionRef(String),
}

impl Operand {
    pub fn const_int(v: i64, ty: Ty) -> Self {
        Operand::Constant(Constant { value: ConstValue::Int(v), ty: Some(ty) })
    }

    pub fn const_str(s: impl Into<String>) -> Self {
        Operand::Constant(Constant { value: ConstValue::Str(s.into()), ty: Some(Ty::Str) })
    }

    pub fn const_float(v: f64, ty: Ty) -> Self {
        Operand::Constant(Constant { value: ConstValue::Float(v), ty: Some(ty) })
    }
}

/// Literal with its own type tag, independent of context.
#[derive(Debug, Clone)]
pub struct Constant {
    pub value: ConstValue,
    pub ty: Option<Ty>,
}

#[derive(Debug, Clone)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Null,
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Goto {
        target: BlockId,
    },
    SwitchInt {
        discr: Operand,
        targets: Vec<(i64, BlockId)>,
        otherwise: BlockId,
    },
    Return,
    Unreachable,
    Call {
        func: Operand,
        args: Vec<Operand>,
        destination: Option<Place>,
        success: Option<BlockId>,
        /// Set for interface method calls.
        interface_name: Option<String>,
        method_name: Option<String>,
        is_virtual: bool,
    },
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone)]
pub struct InterfaceDef {
    pub name: String,
    /// Declaration order defines vtable slot order.
    pub methods: Vec<MethodSig>,
}

#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: String,
    /// Parameter types after the receiver.
    pub params: Vec<Ty>,
    pub ret: Ty,
}

/// One vtable per (concrete struct, interface) pair.
#[derive(Debug, Clone)]
pub struct VtableDef {
    pub struct_name: String,
    pub interface_name: String,
    /// Implementing function names in interface method order; `None` slots
    /// lower to null pointers.
    pub entries: Vec<Option<String>>,
}

impl VtableDef {
    pub fn key(&self) -> String {
        format!("{}_{}", self.struct_name, self.interface_name)
    }
}

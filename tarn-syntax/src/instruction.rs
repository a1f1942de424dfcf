use std::fmt;

use crate::module::Module;
use crate::types::{DataType, FunctionId, TensorShape, Type};

/// A literal value. Aggregates hold uses, so nesting carries explicit types.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Null,
    Undefined,
    Zero,
    Array(Vec<Use>),
    Tuple(Vec<Use>),
    Tensor(Vec<Use>),
    Struct(Vec<(String, Use)>),
}

/// What a use refers to. Block and instruction indices are local to the
/// enclosing function; the symbol table resolves names to these indices while
/// parsing, so nothing here owns or retains the referent.
#[derive(Clone, Debug, PartialEq)]
pub enum UseKind {
    Literal(Literal),
    Function(FunctionId),
    Argument { block: usize, index: usize },
    Instruction { block: usize, index: usize },
}

/// A typed reference to a value. The type is the one written at the use site.
#[derive(Clone, Debug, PartialEq)]
pub struct Use {
    pub ty: Type,
    pub kind: UseKind,
}

impl Use {
    pub fn new(ty: Type, kind: UseKind) -> Use {
        Use { ty, kind }
    }
}

/// One step of an element path for `extract`, `insert` and `elementPointer`.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementKey {
    Index(usize),
    Name(String),
    Value(Use),
}

/// Element-wise binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Min,
    Max,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// The operators accepted as `scan`/`reduce` combinators.
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Multiply
                | BinaryOp::Min
                | BinaryOp::Max
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Modulo => "modulo",
            BinaryOp::Power => "power",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Equal => "equal",
            BinaryOp::NotEqual => "notEqual",
            BinaryOp::LessThan => "lessThan",
            BinaryOp::LessThanOrEqual => "lessThanOrEqual",
            BinaryOp::GreaterThan => "greaterThan",
            BinaryOp::GreaterThanOrEqual => "greaterThanOrEqual",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Element-wise unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
    Exponential,
    Logarithm,
    SquareRoot,
    Tanh,
    Sigmoid,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negate => "negate",
            UnaryOp::Not => "not",
            UnaryOp::Exponential => "exponential",
            UnaryOp::Logarithm => "logarithm",
            UnaryOp::SquareRoot => "squareRoot",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Sigmoid => "sigmoid",
        }
    }

    fn admits(self, data_type: DataType) -> bool {
        match self {
            UnaryOp::Negate => data_type.is_numeric(),
            UnaryOp::Not => data_type.is_bool(),
            _ => data_type.is_float(),
        }
    }
}

/// The `by` operand of `scan` and `reduce`.
#[derive(Clone, Debug, PartialEq)]
pub enum ReductionCombinator {
    Function(Use),
    Op(BinaryOp),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstructionKind {
    Branch {
        destination: usize,
        arguments: Vec<Use>,
    },
    Conditional {
        condition: Use,
        then_block: usize,
        then_arguments: Vec<Use>,
        else_block: usize,
        else_arguments: Vec<Use>,
    },
    Return(Option<Use>),
    DataTypeCast {
        value: Use,
        target: DataType,
    },
    Scan {
        value: Use,
        combinator: ReductionCombinator,
        dimensions: Vec<usize>,
    },
    Reduce {
        value: Use,
        combinator: ReductionCombinator,
        dimensions: Vec<usize>,
    },
    MatrixMultiply {
        left: Use,
        right: Use,
    },
    Concatenate {
        values: Vec<Use>,
        axis: usize,
    },
    Transpose(Use),
    ShapeCast {
        value: Use,
        target: TensorShape,
    },
    BitCast {
        value: Use,
        target: Type,
    },
    Extract {
        source: Use,
        keys: Vec<ElementKey>,
    },
    Insert {
        value: Use,
        destination: Use,
        keys: Vec<ElementKey>,
    },
    Apply {
        callee: Use,
        arguments: Vec<Use>,
    },
    AllocateStack {
        ty: Type,
        count: usize,
    },
    AllocateHeap {
        ty: Type,
        count: Use,
    },
    AllocateBox(Type),
    ProjectBox(Use),
    Retain(Use),
    Release(Use),
    Deallocate(Use),
    Load(Use),
    Store {
        value: Use,
        location: Use,
    },
    ElementPointer {
        base: Use,
        keys: Vec<ElementKey>,
    },
    Copy {
        source: Use,
        destination: Use,
        count: Use,
    },
    Trap,
    ZipWith {
        op: BinaryOp,
        left: Use,
        right: Use,
    },
    Map {
        op: UnaryOp,
        value: Use,
    },
}

impl InstructionKind {
    pub fn opcode(&self) -> &'static str {
        match self {
            InstructionKind::Branch { .. } => "branch",
            InstructionKind::Conditional { .. } => "conditional",
            InstructionKind::Return(_) => "return",
            InstructionKind::DataTypeCast { .. } => "dataTypeCast",
            InstructionKind::Scan { .. } => "scan",
            InstructionKind::Reduce { .. } => "reduce",
            InstructionKind::MatrixMultiply { .. } => "matrixMultiply",
            InstructionKind::Concatenate { .. } => "concatenate",
            InstructionKind::Transpose(_) => "transpose",
            InstructionKind::ShapeCast { .. } => "shapeCast",
            InstructionKind::BitCast { .. } => "bitCast",
            InstructionKind::Extract { .. } => "extract",
            InstructionKind::Insert { .. } => "insert",
            InstructionKind::Apply { .. } => "apply",
            InstructionKind::AllocateStack { .. } => "allocateStack",
            InstructionKind::AllocateHeap { .. } => "allocateHeap",
            InstructionKind::AllocateBox(_) => "allocateBox",
            InstructionKind::ProjectBox(_) => "projectBox",
            InstructionKind::Retain(_) => "retain",
            InstructionKind::Release(_) => "release",
            InstructionKind::Deallocate(_) => "deallocate",
            InstructionKind::Load(_) => "load",
            InstructionKind::Store { .. } => "store",
            InstructionKind::ElementPointer { .. } => "elementPointer",
            InstructionKind::Copy { .. } => "copy",
            InstructionKind::Trap => "trap",
            InstructionKind::ZipWith { op, .. } => op.name(),
            InstructionKind::Map { op, .. } => op.name(),
        }
    }

    /// The type this instruction produces. `Type::Invalid` means the operands
    /// do not fit the opcode.
    pub fn result_type(&self, module: &Module) -> Type {
        self.derive(module).unwrap_or(Type::Invalid)
    }

    fn derive(&self, module: &Module) -> Option<Type> {
        match self {
            InstructionKind::Branch { .. }
            | InstructionKind::Conditional { .. }
            | InstructionKind::Return(_)
            | InstructionKind::Store { .. }
            | InstructionKind::Copy { .. }
            | InstructionKind::Retain(_)
            | InstructionKind::Release(_)
            | InstructionKind::Deallocate(_)
            | InstructionKind::Trap => Some(Type::Void),

            InstructionKind::DataTypeCast { value, target } => {
                let (shape, dt) = tensor_parts(module, &value.ty)?;
                dt.can_cast_to(*target)
                    .then(|| Type::Tensor(shape, *target))
            }

            InstructionKind::ZipWith { op, left, right } => {
                let (ls, ld) = tensor_parts(module, &left.ty)?;
                let (rs, rd) = tensor_parts(module, &right.ty)?;
                if ld != rd || (op.is_boolean() && !ld.is_bool()) {
                    return None;
                }
                let shape = ls.broadcast(&rs)?;
                let dt = if op.is_comparison() { DataType::Bool } else { ld };
                Some(Type::Tensor(shape, dt))
            }

            InstructionKind::Map { op, value } => {
                let (shape, dt) = tensor_parts(module, &value.ty)?;
                op.admits(dt).then(|| Type::Tensor(shape, dt))
            }

            InstructionKind::Scan {
                value, dimensions, ..
            } => {
                let (shape, dt) = tensor_parts(module, &value.ty)?;
                dimensions
                    .iter()
                    .all(|&d| d < shape.rank())
                    .then(|| Type::Tensor(shape, dt))
            }

            InstructionKind::Reduce {
                value, dimensions, ..
            } => {
                let (shape, dt) = tensor_parts(module, &value.ty)?;
                Some(Type::Tensor(shape.dropping(dimensions)?, dt))
            }

            InstructionKind::MatrixMultiply { left, right } => {
                let (ls, ld) = tensor_parts(module, &left.ty)?;
                let (rs, rd) = tensor_parts(module, &right.ty)?;
                if ld != rd {
                    return None;
                }
                Some(Type::Tensor(ls.matmul(&rs)?, ld))
            }

            InstructionKind::Concatenate { values, axis } => {
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    parts.push(tensor_parts(module, &value.ty)?);
                }
                let dt = parts.first()?.1;
                if parts.iter().any(|(_, d)| *d != dt) {
                    return None;
                }
                let shapes: Vec<&TensorShape> = parts.iter().map(|(s, _)| s).collect();
                Some(Type::Tensor(
                    TensorShape::concatenating(&shapes, *axis)?,
                    dt,
                ))
            }

            InstructionKind::Transpose(value) => {
                let (shape, dt) = tensor_parts(module, &value.ty)?;
                Some(Type::Tensor(shape.transposed(), dt))
            }

            InstructionKind::ShapeCast { value, target } => {
                let (shape, dt) = tensor_parts(module, &value.ty)?;
                (shape.element_count() == target.element_count())
                    .then(|| Type::Tensor(target.clone(), dt))
            }

            // Size agreement is the verifier's concern, not the parser's.
            InstructionKind::BitCast { target, .. } => Some(target.clone()),

            InstructionKind::Extract { source, keys } => {
                element_type(module, source.ty.canonical(module), keys)
            }

            InstructionKind::Insert {
                value,
                destination,
                keys,
            } => {
                let element = element_type(module, destination.ty.canonical(module), keys)?;
                (element == value.ty.canonical(module)).then(|| destination.ty.clone())
            }

            InstructionKind::Apply { callee, arguments } => {
                let (parameters, ret) = match callee.ty.canonical(module) {
                    Type::Function(parameters, ret) => (parameters, ret),
                    Type::Pointer(pointee) => match *pointee {
                        Type::Function(parameters, ret) => (parameters, ret),
                        _ => return None,
                    },
                    _ => return None,
                };
                if arguments.len() != parameters.len() {
                    return None;
                }
                let agree = arguments
                    .iter()
                    .zip(&parameters)
                    .all(|(a, p)| a.ty.canonical(module) == *p);
                agree.then(|| *ret)
            }

            InstructionKind::AllocateStack { ty, count } => Some(Type::Pointer(Box::new(
                Type::Array(*count, Box::new(ty.clone())),
            ))),

            InstructionKind::AllocateHeap { ty, count } => count
                .ty
                .is_scalar_integer(module)
                .then(|| Type::Pointer(Box::new(ty.clone()))),

            InstructionKind::AllocateBox(ty) => Some(Type::Pointer(Box::new(ty.clone()))),

            InstructionKind::ProjectBox(value) => match value.ty.canonical(module) {
                Type::Pointer(pointee) => Some(Type::Pointer(pointee)),
                _ => None,
            },

            InstructionKind::Load(value) => match value.ty.canonical(module) {
                Type::Pointer(pointee) => Some(*pointee),
                _ => None,
            },

            InstructionKind::ElementPointer { base, keys } => {
                let pointee = match base.ty.canonical(module) {
                    Type::Pointer(pointee) => *pointee,
                    _ => return None,
                };
                Some(Type::Pointer(Box::new(element_type(
                    module, pointee, keys,
                )?)))
            }
        }
    }
}

fn tensor_parts(module: &Module, ty: &Type) -> Option<(TensorShape, DataType)> {
    match ty.canonical(module) {
        Type::Tensor(shape, dt) => Some((shape, dt)),
        _ => None,
    }
}

/// Walks an aggregate type along an element path. Every step canonicalizes,
/// so aliases inside aggregates are transparent.
fn element_type(module: &Module, ty: Type, keys: &[ElementKey]) -> Option<Type> {
    let mut current = ty;
    for key in keys {
        current = match current.canonical(module) {
            Type::Tensor(shape, dt) => match key {
                ElementKey::Index(_) => Type::Tensor(shape.dropping_first()?, dt),
                ElementKey::Value(index) if index.ty.is_scalar_integer(module) => {
                    Type::Tensor(shape.dropping_first()?, dt)
                }
                _ => return None,
            },
            Type::Array(count, element) => match key {
                ElementKey::Index(i) if *i < count => *element,
                ElementKey::Value(index) if index.ty.is_scalar_integer(module) => *element,
                _ => return None,
            },
            Type::Tuple(elements) => match key {
                ElementKey::Index(i) => elements.get(*i)?.clone(),
                _ => return None,
            },
            Type::Struct(id) => match key {
                ElementKey::Name(name) => module.structs[id].field(name)?.ty.clone(),
                _ => return None,
            },
            _ => return None,
        };
    }
    Some(current)
}

/// An instruction with its (optionally) bound name and its derived type,
/// fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub name: Option<String>,
    pub kind: InstructionKind,
    pub ty: Type,
}

impl Instruction {
    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "%{name} = {}", self.kind.opcode()),
            None => f.write_str(self.kind.opcode()),
        }
    }
}

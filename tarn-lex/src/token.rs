use std::fmt;

use tarn_syntax::{Attribute, BinaryOp, DataType, Span, UnaryOp};

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Lexical flavor of a sigiled identifier. Nominal type names share the `%`
/// sigil with temporaries; the parser picks the scope from context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierKind {
    Global,
    Temporary,
    BasicBlock,
    Key,
}

impl IdentifierKind {
    pub fn sigil(self) -> char {
        match self {
            IdentifierKind::Global => '@',
            IdentifierKind::Temporary => '%',
            IdentifierKind::BasicBlock => '\'',
            IdentifierKind::Key => '#',
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            IdentifierKind::Global => "a global",
            IdentifierKind::Temporary => "a temporary",
            IdentifierKind::BasicBlock => "a basic block label",
            IdentifierKind::Key => "a key",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Branch,
    Conditional,
    Return,
    DataTypeCast,
    Scan,
    Reduce,
    MatrixMultiply,
    Concatenate,
    Transpose,
    ShapeCast,
    BitCast,
    Extract,
    Insert,
    Apply,
    AllocateStack,
    AllocateHeap,
    AllocateBox,
    ProjectBox,
    Retain,
    Release,
    Deallocate,
    Load,
    Store,
    ElementPointer,
    Copy,
    Trap,
    Binary(BinaryOp),
    Unary(UnaryOp),
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Branch => "branch",
            Opcode::Conditional => "conditional",
            Opcode::Return => "return",
            Opcode::DataTypeCast => "dataTypeCast",
            Opcode::Scan => "scan",
            Opcode::Reduce => "reduce",
            Opcode::MatrixMultiply => "matrixMultiply",
            Opcode::Concatenate => "concatenate",
            Opcode::Transpose => "transpose",
            Opcode::ShapeCast => "shapeCast",
            Opcode::BitCast => "bitCast",
            Opcode::Extract => "extract",
            Opcode::Insert => "insert",
            Opcode::Apply => "apply",
            Opcode::AllocateStack => "allocateStack",
            Opcode::AllocateHeap => "allocateHeap",
            Opcode::AllocateBox => "allocateBox",
            Opcode::ProjectBox => "projectBox",
            Opcode::Retain => "retain",
            Opcode::Release => "release",
            Opcode::Deallocate => "deallocate",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::ElementPointer => "elementPointer",
            Opcode::Copy => "copy",
            Opcode::Trap => "trap",
            Opcode::Binary(op) => op.name(),
            Opcode::Unary(op) => op.name(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Newline,
    Eof,

    // Punctuation
    Comma,
    Semi,
    Colon,
    Equal,
    Star,
    Arrow,
    Times,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LAngle,
    RAngle,

    // Keywords
    KwModule,
    KwStage,
    KwRaw,
    KwCanonical,
    KwFunc,
    KwType,
    KwStruct,
    KwOpaque,
    KwExtern,
    KwGradient,
    KwFrom,
    KwWrt,
    KwKeeping,
    KwSeedable,
    KwVoid,
    KwTrue,
    KwFalse,
    KwNull,
    KwUndefined,
    KwZero,
    KwThen,
    KwElse,
    KwTo,
    KwBy,
    KwAlong,
    KwAt,
    KwCount,
    KwScalar,

    // Payload-carrying tokens
    Identifier(IdentifierKind, String),
    AnonymousIdentifier(usize, usize),
    Integer(i64),
    Float(f64),
    Str(String),
    DataType(DataType),
    Opcode(Opcode),
    Attribute(Attribute),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Newline => f.write_str("a newline"),
            TokenKind::Eof => f.write_str("end of input"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Semi => f.write_str("';'"),
            TokenKind::Colon => f.write_str("':'"),
            TokenKind::Equal => f.write_str("'='"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Arrow => f.write_str("'->'"),
            TokenKind::Times => f.write_str("'x'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::LBracket => f.write_str("'['"),
            TokenKind::RBracket => f.write_str("']'"),
            TokenKind::LBrace => f.write_str("'{'"),
            TokenKind::RBrace => f.write_str("'}'"),
            TokenKind::LAngle => f.write_str("'<'"),
            TokenKind::RAngle => f.write_str("'>'"),
            TokenKind::KwModule => f.write_str("'module'"),
            TokenKind::KwStage => f.write_str("'stage'"),
            TokenKind::KwRaw => f.write_str("'raw'"),
            TokenKind::KwCanonical => f.write_str("'canonical'"),
            TokenKind::KwFunc => f.write_str("'func'"),
            TokenKind::KwType => f.write_str("'type'"),
            TokenKind::KwStruct => f.write_str("'struct'"),
            TokenKind::KwOpaque => f.write_str("'opaque'"),
            TokenKind::KwExtern => f.write_str("'extern'"),
            TokenKind::KwGradient => f.write_str("'gradient'"),
            TokenKind::KwFrom => f.write_str("'from'"),
            TokenKind::KwWrt => f.write_str("'wrt'"),
            TokenKind::KwKeeping => f.write_str("'keeping'"),
            TokenKind::KwSeedable => f.write_str("'seedable'"),
            TokenKind::KwVoid => f.write_str("'void'"),
            TokenKind::KwTrue => f.write_str("'true'"),
            TokenKind::KwFalse => f.write_str("'false'"),
            TokenKind::KwNull => f.write_str("'null'"),
            TokenKind::KwUndefined => f.write_str("'undefined'"),
            TokenKind::KwZero => f.write_str("'zero'"),
            TokenKind::KwThen => f.write_str("'then'"),
            TokenKind::KwElse => f.write_str("'else'"),
            TokenKind::KwTo => f.write_str("'to'"),
            TokenKind::KwBy => f.write_str("'by'"),
            TokenKind::KwAlong => f.write_str("'along'"),
            TokenKind::KwAt => f.write_str("'at'"),
            TokenKind::KwCount => f.write_str("'count'"),
            TokenKind::KwScalar => f.write_str("'scalar'"),
            TokenKind::Identifier(kind, name) => write!(f, "'{}{name}'", kind.sigil()),
            TokenKind::AnonymousIdentifier(block, index) => write!(f, "'#{block}.{index}'"),
            TokenKind::Integer(value) => write!(f, "integer {value}"),
            TokenKind::Float(value) => write!(f, "float {value}"),
            TokenKind::Str(value) => write!(f, "string {value:?}"),
            TokenKind::DataType(dt) => write!(f, "data type '{dt}'"),
            TokenKind::Opcode(opcode) => write!(f, "opcode '{}'", opcode.name()),
            TokenKind::Attribute(attr) => write!(f, "attribute '!{}'", attr.name()),
        }
    }
}

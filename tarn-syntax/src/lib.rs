#![forbid(unsafe_code)]

use miette::SourceSpan;

pub mod instruction;
pub mod module;
pub mod types;

pub use instruction::{
    BinaryOp, ElementKey, Instruction, InstructionKind, Literal, ReductionCombinator, UnaryOp,
    Use, UseKind,
};
pub use module::{
    Argument, Attribute, BasicBlock, DeclarationKind, Function, Module, Stage, StructDef,
    StructField, TypeAlias,
};
pub use types::{AliasId, DataType, FunctionId, StructId, TensorShape, Type};

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

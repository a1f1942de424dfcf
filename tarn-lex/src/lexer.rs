use logos::Logos;
use miette::Diagnostic;
use tarn_syntax::{span_between, Attribute, BinaryOp, DataType, Span, UnaryOp};
use thiserror::Error;

use crate::token::{IdentifierKind, Opcode, Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(tarn::lex))]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f\r]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[token("\n")]
    Newline,

    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token("=")]
    Equal,
    #[token("->")]
    Arrow,
    #[token("*")]
    Star,
    #[token("x")]
    Times,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,

    #[token("module")]
    KwModule,
    #[token("stage")]
    KwStage,
    #[token("raw")]
    KwRaw,
    #[token("canonical")]
    KwCanonical,
    #[token("func")]
    KwFunc,
    #[token("type")]
    KwType,
    #[token("struct")]
    KwStruct,
    #[token("opaque")]
    KwOpaque,
    #[token("extern")]
    KwExtern,
    #[token("gradient")]
    KwGradient,
    #[token("from")]
    KwFrom,
    #[token("wrt")]
    KwWrt,
    #[token("keeping")]
    KwKeeping,
    #[token("seedable")]
    KwSeedable,
    #[token("void")]
    KwVoid,
    #[token("true")]
    KwTrue,
    #[token("false")]
    KwFalse,
    #[token("null")]
    KwNull,
    #[token("undefined")]
    KwUndefined,
    #[token("zero")]
    KwZero,
    #[token("then")]
    KwThen,
    #[token("else")]
    KwElse,
    #[token("to")]
    KwTo,
    #[token("by")]
    KwBy,
    #[token("along")]
    KwAlong,
    #[token("at")]
    KwAt,
    #[token("count")]
    KwCount,
    #[token("scalar")]
    KwScalar,

    #[token("bool", |_| DataType::Bool)]
    #[token("i8", |_| DataType::I8)]
    #[token("i16", |_| DataType::I16)]
    #[token("i32", |_| DataType::I32)]
    #[token("i64", |_| DataType::I64)]
    #[token("f16", |_| DataType::F16)]
    #[token("f32", |_| DataType::F32)]
    #[token("f64", |_| DataType::F64)]
    DataType(DataType),

    #[token("branch", |_| Opcode::Branch)]
    #[token("conditional", |_| Opcode::Conditional)]
    #[token("return", |_| Opcode::Return)]
    #[token("dataTypeCast", |_| Opcode::DataTypeCast)]
    #[token("scan", |_| Opcode::Scan)]
    #[token("reduce", |_| Opcode::Reduce)]
    #[token("matrixMultiply", |_| Opcode::MatrixMultiply)]
    #[token("concatenate", |_| Opcode::Concatenate)]
    #[token("transpose", |_| Opcode::Transpose)]
    #[token("shapeCast", |_| Opcode::ShapeCast)]
    #[token("bitCast", |_| Opcode::BitCast)]
    #[token("extract", |_| Opcode::Extract)]
    #[token("insert", |_| Opcode::Insert)]
    #[token("apply", |_| Opcode::Apply)]
    #[token("allocateStack", |_| Opcode::AllocateStack)]
    #[token("allocateHeap", |_| Opcode::AllocateHeap)]
    #[token("allocateBox", |_| Opcode::AllocateBox)]
    #[token("projectBox", |_| Opcode::ProjectBox)]
    #[token("retain", |_| Opcode::Retain)]
    #[token("release", |_| Opcode::Release)]
    #[token("deallocate", |_| Opcode::Deallocate)]
    #[token("load", |_| Opcode::Load)]
    #[token("store", |_| Opcode::Store)]
    #[token("elementPointer", |_| Opcode::ElementPointer)]
    #[token("copy", |_| Opcode::Copy)]
    #[token("trap", |_| Opcode::Trap)]
    #[token("add", |_| Opcode::Binary(BinaryOp::Add))]
    #[token("subtract", |_| Opcode::Binary(BinaryOp::Subtract))]
    #[token("multiply", |_| Opcode::Binary(BinaryOp::Multiply))]
    #[token("divide", |_| Opcode::Binary(BinaryOp::Divide))]
    #[token("modulo", |_| Opcode::Binary(BinaryOp::Modulo))]
    #[token("power", |_| Opcode::Binary(BinaryOp::Power))]
    #[token("min", |_| Opcode::Binary(BinaryOp::Min))]
    #[token("max", |_| Opcode::Binary(BinaryOp::Max))]
    #[token("equal", |_| Opcode::Binary(BinaryOp::Equal))]
    #[token("notEqual", |_| Opcode::Binary(BinaryOp::NotEqual))]
    #[token("lessThan", |_| Opcode::Binary(BinaryOp::LessThan))]
    #[token("lessThanOrEqual", |_| Opcode::Binary(BinaryOp::LessThanOrEqual))]
    #[token("greaterThan", |_| Opcode::Binary(BinaryOp::GreaterThan))]
    #[token("greaterThanOrEqual", |_| Opcode::Binary(BinaryOp::GreaterThanOrEqual))]
    #[token("and", |_| Opcode::Binary(BinaryOp::And))]
    #[token("or", |_| Opcode::Binary(BinaryOp::Or))]
    #[token("negate", |_| Opcode::Unary(UnaryOp::Negate))]
    #[token("not", |_| Opcode::Unary(UnaryOp::Not))]
    #[token("exponential", |_| Opcode::Unary(UnaryOp::Exponential))]
    #[token("logarithm", |_| Opcode::Unary(UnaryOp::Logarithm))]
    #[token("squareRoot", |_| Opcode::Unary(UnaryOp::SquareRoot))]
    #[token("tanh", |_| Opcode::Unary(UnaryOp::Tanh))]
    #[token("sigmoid", |_| Opcode::Unary(UnaryOp::Sigmoid))]
    Opcode(Opcode),

    #[token("!inline", |_| Attribute::Inline)]
    #[token("!differentiable", |_| Attribute::Differentiable)]
    #[token("!exported", |_| Attribute::Exported)]
    Attribute(Attribute),

    #[regex(r"@[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice()[1..].to_string())]
    GlobalIdentifier(String),
    #[regex(r"%[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice()[1..].to_string())]
    TemporaryIdentifier(String),
    #[regex(r"'[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice()[1..].to_string())]
    BasicBlockIdentifier(String),
    #[regex(r"#[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice()[1..].to_string())]
    KeyIdentifier(String),

    #[regex(r"#[0-9]+\.[0-9]+", parse_anonymous)]
    AnonymousIdentifier(Option<(usize, usize)>),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(Option<i64>),

    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(Option<f64>),

    // String literals with a strict escape set: \n, \t, \r, \", \\
    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    Str(Option<String>),
}

fn parse_anonymous(lex: &mut logos::Lexer<RawToken>) -> Option<(usize, usize)> {
    let body = &lex.slice()[1..];
    let (block, index) = body.split_once('.')?;
    Some((block.parse().ok()?, index.parse().ok()?))
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }

    Some(out)
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut lex = RawToken::lexer(self.src);

        while let Some(raw) = lex.next() {
            let span = span_between(lex.span().start, lex.span().end);
            let invalid = |message: &str| LexError {
                message: message.to_string(),
                span,
            };

            let kind = match raw {
                Ok(RawToken::Newline) => TokenKind::Newline,

                Ok(RawToken::Comma) => TokenKind::Comma,
                Ok(RawToken::Semi) => TokenKind::Semi,
                Ok(RawToken::Colon) => TokenKind::Colon,
                Ok(RawToken::Equal) => TokenKind::Equal,
                Ok(RawToken::Arrow) => TokenKind::Arrow,
                Ok(RawToken::Star) => TokenKind::Star,
                Ok(RawToken::Times) => TokenKind::Times,
                Ok(RawToken::LParen) => TokenKind::LParen,
                Ok(RawToken::RParen) => TokenKind::RParen,
                Ok(RawToken::LBracket) => TokenKind::LBracket,
                Ok(RawToken::RBracket) => TokenKind::RBracket,
                Ok(RawToken::LBrace) => TokenKind::LBrace,
                Ok(RawToken::RBrace) => TokenKind::RBrace,
                Ok(RawToken::LAngle) => TokenKind::LAngle,
                Ok(RawToken::RAngle) => TokenKind::RAngle,

                Ok(RawToken::KwModule) => TokenKind::KwModule,
                Ok(RawToken::KwStage) => TokenKind::KwStage,
                Ok(RawToken::KwRaw) => TokenKind::KwRaw,
                Ok(RawToken::KwCanonical) => TokenKind::KwCanonical,
                Ok(RawToken::KwFunc) => TokenKind::KwFunc,
                Ok(RawToken::KwType) => TokenKind::KwType,
                Ok(RawToken::KwStruct) => TokenKind::KwStruct,
                Ok(RawToken::KwOpaque) => TokenKind::KwOpaque,
                Ok(RawToken::KwExtern) => TokenKind::KwExtern,
                Ok(RawToken::KwGradient) => TokenKind::KwGradient,
                Ok(RawToken::KwFrom) => TokenKind::KwFrom,
                Ok(RawToken::KwWrt) => TokenKind::KwWrt,
                Ok(RawToken::KwKeeping) => TokenKind::KwKeeping,
                Ok(RawToken::KwSeedable) => TokenKind::KwSeedable,
                Ok(RawToken::KwVoid) => TokenKind::KwVoid,
                Ok(RawToken::KwTrue) => TokenKind::KwTrue,
                Ok(RawToken::KwFalse) => TokenKind::KwFalse,
                Ok(RawToken::KwNull) => TokenKind::KwNull,
                Ok(RawToken::KwUndefined) => TokenKind::KwUndefined,
                Ok(RawToken::KwZero) => TokenKind::KwZero,
                Ok(RawToken::KwThen) => TokenKind::KwThen,
                Ok(RawToken::KwElse) => TokenKind::KwElse,
                Ok(RawToken::KwTo) => TokenKind::KwTo,
                Ok(RawToken::KwBy) => TokenKind::KwBy,
                Ok(RawToken::KwAlong) => TokenKind::KwAlong,
                Ok(RawToken::KwAt) => TokenKind::KwAt,
                Ok(RawToken::KwCount) => TokenKind::KwCount,
                Ok(RawToken::KwScalar) => TokenKind::KwScalar,

                Ok(RawToken::DataType(dt)) => TokenKind::DataType(dt),
                Ok(RawToken::Opcode(opcode)) => TokenKind::Opcode(opcode),
                Ok(RawToken::Attribute(attr)) => TokenKind::Attribute(attr),

                Ok(RawToken::GlobalIdentifier(name)) => {
                    TokenKind::Identifier(IdentifierKind::Global, name)
                }
                Ok(RawToken::TemporaryIdentifier(name)) => {
                    TokenKind::Identifier(IdentifierKind::Temporary, name)
                }
                Ok(RawToken::BasicBlockIdentifier(name)) => {
                    TokenKind::Identifier(IdentifierKind::BasicBlock, name)
                }
                Ok(RawToken::KeyIdentifier(name)) => {
                    TokenKind::Identifier(IdentifierKind::Key, name)
                }

                Ok(RawToken::AnonymousIdentifier(Some((block, index)))) => {
                    TokenKind::AnonymousIdentifier(block, index)
                }
                Ok(RawToken::AnonymousIdentifier(None)) => {
                    return Err(invalid("invalid anonymous identifier"))
                }

                Ok(RawToken::Integer(Some(value))) => TokenKind::Integer(value),
                Ok(RawToken::Integer(None)) => return Err(invalid("invalid integer literal")),
                Ok(RawToken::Float(Some(value))) => TokenKind::Float(value),
                Ok(RawToken::Float(None)) => return Err(invalid("invalid float literal")),
                Ok(RawToken::Str(Some(value))) => TokenKind::Str(value),
                Ok(RawToken::Str(None)) => return Err(invalid("invalid string literal")),

                Err(_) => return Err(invalid("unexpected character")),
            };

            tokens.push(Token { kind, span });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(self.src.len(), self.src.len()),
        });

        Ok(tokens)
    }
}

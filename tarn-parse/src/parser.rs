use std::collections::BTreeSet;
use std::mem;

use tarn_lex::{IdentifierKind, Opcode, Token, TokenKind};
use tarn_syntax::{
    span_between, Argument, BasicBlock, DeclarationKind, ElementKey, Function, Instruction,
    InstructionKind, Literal, Module, ReductionCombinator, Span, Spanned, Stage, StructDef,
    StructField, TensorShape, Type, TypeAlias, Use, UseKind,
};

use crate::error::ParseError;
use crate::symbols::{LocalEntry, LocalValue, SymbolTable};

/// Blocks of the function currently being parsed. Completed blocks sit in
/// `blocks`; `current` is the one whose instructions are still arriving, at
/// index `blocks.len()`.
#[derive(Default)]
struct FunctionBody {
    blocks: Vec<BasicBlock>,
    current: Option<BasicBlock>,
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    symbols: SymbolTable,
    module: Module,
    body: Option<FunctionBody>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            idx: 0,
            symbols: SymbolTable::new(),
            module: Module::new("", Stage::Raw),
            body: None,
        }
    }

    // Module

    pub fn parse_module(mut self) -> Result<Module, ParseError> {
        self.skip_newlines();
        self.expect(TokenKind::KwModule, "'module'")?;
        let (name, _) = self.parse_string_literal()?;
        self.expect_newlines()?;
        self.expect(TokenKind::KwStage, "'stage'")?;
        let stage = self.parse_stage()?;
        self.module.name = name;
        self.module.stage = stage;

        self.prescan_function_prototypes()?;

        loop {
            if self.at_eof() {
                break;
            }
            self.expect_newlines()?;
            if self.at_eof() {
                break;
            }
            match self.peek_kind() {
                Some(TokenKind::KwType) => self.parse_type_alias()?,
                Some(TokenKind::KwStruct) => self.parse_struct()?,
                Some(
                    TokenKind::KwFunc
                    | TokenKind::LBracket
                    | TokenKind::Attribute(_)
                    | TokenKind::KwExtern
                    | TokenKind::KwGradient,
                ) => self.parse_function()?,
                Some(kind) => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "a type alias, a struct or a function".to_string(),
                        found: kind.to_string(),
                        span: self.peek_span(),
                    })
                }
                None => break,
            }
        }

        debug_assert!(self.symbols.function_scope_is_empty());
        Ok(self.module)
    }

    fn parse_stage(&mut self) -> Result<Stage, ParseError> {
        let tok = self.take("'raw' or 'canonical'")?;
        match tok.kind {
            TokenKind::KwRaw => Ok(Stage::Raw),
            TokenKind::KwCanonical => Ok(Stage::Canonical),
            kind => Err(ParseError::UnexpectedToken {
                expected: "'raw' or 'canonical'".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    /// Cursor-preserving sweep over the rest of the module: every `func @name`
    /// pair declares a function prototype so that later headers and `apply`
    /// callees can refer to functions defined further down. The symbol-table
    /// inserts survive; the cursor does not move.
    fn prescan_function_prototypes(&mut self) -> Result<(), ParseError> {
        self.preserved(|p| {
            while let Some(tok) = p.next() {
                match tok.kind {
                    TokenKind::Eof => break,
                    TokenKind::KwFunc => {
                        if let Some(TokenKind::Identifier(IdentifierKind::Global, _)) =
                            p.peek_kind()
                        {
                            let (name, span) = p.parse_identifier(IdentifierKind::Global)?;
                            let id = p.module.functions.len();
                            p.symbols.define_global(&name, span, id)?;
                            p.module.functions.push(Function::prototype(name));
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    fn parse_type_alias(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::KwType, "'type'")?;
        let (name, name_span) = self.parse_identifier(IdentifierKind::Temporary)?;
        self.expect(TokenKind::Equal, "'='")?;
        let ty = if self.accept(TokenKind::KwOpaque).is_some() {
            None
        } else {
            Some(self.parse_type()?.node)
        };
        let id = self.module.type_aliases.len();
        self.symbols
            .define_nominal_type(&name, name_span, Type::Alias(id))?;
        self.module.type_aliases.push(TypeAlias { name, ty });
        Ok(())
    }

    fn parse_struct(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::KwStruct, "'struct'")?;
        let (name, name_span) = self.parse_identifier(IdentifierKind::Temporary)?;
        self.expect(TokenKind::LBrace, "'{'")?;
        self.skip_newlines();
        let fields = self.parse_many(|p| match p.peek_kind() {
            Some(TokenKind::Identifier(IdentifierKind::Key, _)) => {
                let (field_name, _) = p.parse_identifier(IdentifierKind::Key)?;
                p.expect(TokenKind::Colon, "':'")?;
                p.skip_newlines();
                let ty = p.parse_type()?;
                Ok(Some(StructField {
                    name: field_name,
                    ty: ty.node,
                }))
            }
            _ => Ok(None),
        })?;
        self.skip_newlines();
        self.expect(TokenKind::RBrace, "'}'")?;
        let id = self.module.structs.len();
        self.symbols
            .define_nominal_type(&name, name_span, Type::Struct(id))?;
        self.module.structs.push(StructDef { name, fields });
        Ok(())
    }

    // Functions

    fn parse_function(&mut self) -> Result<(), ParseError> {
        let mut attributes = BTreeSet::new();
        while let Some(TokenKind::Attribute(attr)) = self.peek_kind() {
            attributes.insert(*attr);
            self.next();
            self.skip_newlines();
        }

        let mut declaration_kind = None;
        let mut declaration_span = None;
        if let Some(open) = self.accept(TokenKind::LBracket) {
            let kind = self.parse_declaration_kind()?;
            let close = self.expect(TokenKind::RBracket, "']'")?;
            declaration_kind = Some(kind);
            declaration_span = Some(join(open.span, close.span));
            self.skip_newlines();
        } else if let Some(TokenKind::KwExtern | TokenKind::KwGradient) = self.peek_kind() {
            let start = self.peek_span();
            let kind = self.parse_declaration_kind()?;
            declaration_kind = Some(kind);
            declaration_span = Some(join(start, self.previous_span()));
        }

        self.expect(TokenKind::KwFunc, "'func'")?;
        let (name, name_span) = self.parse_identifier(IdentifierKind::Global)?;
        self.expect(TokenKind::Colon, "':'")?;
        self.skip_newlines();
        let ty = self.parse_type()?;
        let (argument_types, return_type) = match ty.node.canonical(&self.module) {
            Type::Function(arguments, ret) => (arguments, *ret),
            _ => return Err(ParseError::NotFunctionType { span: ty.span }),
        };

        let id = self.symbols.lookup_global(&name, name_span)?;
        {
            let function = &mut self.module.functions[id];
            function.attributes = attributes;
            function.declaration_kind = declaration_kind.clone();
            function.argument_types = argument_types;
            function.return_type = return_type;
        }

        if declaration_kind.is_some() {
            if let Some(TokenKind::LBrace) = self.peek_kind() {
                return Err(ParseError::DeclarationCannotHaveBody {
                    declaration: declaration_span.unwrap_or(name_span),
                    body: self.peek_span(),
                });
            }
        } else {
            self.skip_newlines();
            self.expect(TokenKind::LBrace, "'{'")?;
            self.prescan_basic_blocks()?;
            self.body = Some(FunctionBody::default());
            self.skip_newlines();
            loop {
                self.parse_basic_block()?;
                if !matches!(
                    self.peek_kind(),
                    Some(TokenKind::Identifier(IdentifierKind::BasicBlock, _))
                ) {
                    break;
                }
            }
            self.expect(TokenKind::RBrace, "'}'")?;
            if let Some(body) = self.body.take() {
                self.module.functions[id].blocks = body.blocks;
            }
        }

        self.symbols.clear_function_scope();
        Ok(())
    }

    fn parse_declaration_kind(&mut self) -> Result<DeclarationKind, ParseError> {
        let tok = self.take("'extern' or 'gradient'")?;
        match tok.kind {
            TokenKind::KwExtern => Ok(DeclarationKind::External),
            TokenKind::KwGradient => {
                let (name, span) = self.parse_identifier(IdentifierKind::Global)?;
                let of = self.symbols.lookup_global(&name, span)?;
                let from = if self.accept(TokenKind::KwFrom).is_some() {
                    Some(self.parse_non_negative_integer()?.0)
                } else {
                    None
                };
                self.expect(TokenKind::KwWrt, "'wrt'")?;
                let wrt = self.parse_comma_separated(|p| Ok(p.parse_non_negative_integer()?.0))?;
                let keeping = if self.accept(TokenKind::KwKeeping).is_some() {
                    self.parse_comma_separated(|p| Ok(p.parse_non_negative_integer()?.0))?
                } else {
                    Vec::new()
                };
                let seedable = self.accept(TokenKind::KwSeedable).is_some();
                Ok(DeclarationKind::Gradient {
                    of,
                    from,
                    wrt,
                    keeping,
                    seedable,
                })
            }
            kind => Err(ParseError::UnexpectedToken {
                expected: "'extern' or 'gradient'".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    /// Cursor-preserving sweep to the function's closing brace: every block
    /// label starting a line declares a block prototype, so branches may
    /// target blocks that appear later in the body.
    fn prescan_basic_blocks(&mut self) -> Result<(), ParseError> {
        self.preserved(|p| {
            let mut depth = 1usize;
            while let Some(tok) = p.next() {
                match tok.kind {
                    TokenKind::Eof => break,
                    TokenKind::LBrace => depth += 1,
                    TokenKind::RBrace => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    TokenKind::Newline if depth == 1 => {
                        if let Some(TokenKind::Identifier(IdentifierKind::BasicBlock, _)) =
                            p.peek_kind()
                        {
                            let (name, span) = p.parse_identifier(IdentifierKind::BasicBlock)?;
                            let index = p.symbols.basic_block_count();
                            p.symbols.define_basic_block(&name, span, index)?;
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    // Basic blocks

    fn parse_basic_block(&mut self) -> Result<(), ParseError> {
        let (name, name_span) = self.parse_identifier(IdentifierKind::BasicBlock)?;
        let index = self.symbols.lookup_basic_block(&name, name_span)?;
        debug_assert_eq!(
            index,
            self.body.as_ref().map_or(0, |b| b.blocks.len()),
            "blocks are parsed in label order",
        );

        self.expect(TokenKind::LParen, "'('")?;
        self.skip_newlines();
        let parsed = self.parse_many(|p| match p.peek_kind() {
            Some(TokenKind::Identifier(IdentifierKind::Temporary, _)) => {
                let (argument_name, span) = p.parse_identifier(IdentifierKind::Temporary)?;
                p.expect(TokenKind::Colon, "':'")?;
                p.skip_newlines();
                let ty = p.parse_type()?;
                Ok(Some((argument_name, span, ty.node)))
            }
            _ => Ok(None),
        })?;
        self.skip_newlines();
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;
        self.expect_newlines()?;

        let mut arguments = Vec::with_capacity(parsed.len());
        for (i, (argument_name, span, ty)) in parsed.into_iter().enumerate() {
            self.symbols.define_local(
                &argument_name,
                span,
                LocalEntry {
                    value: LocalValue::Argument { block: index, index: i },
                    ty: ty.clone(),
                },
            )?;
            arguments.push(Argument {
                name: argument_name,
                ty,
            });
        }

        if let Some(body) = self.body.as_mut() {
            body.current = Some(BasicBlock {
                name,
                arguments,
                instructions: Vec::new(),
            });
        }

        while self.at_instruction_start() {
            let instruction = self.parse_instruction()?;
            if let Some(block) = self.body.as_mut().and_then(|b| b.current.as_mut()) {
                block.instructions.push(instruction);
            }
            self.expect_newlines()?;
        }

        if let Some(body) = self.body.as_mut() {
            if let Some(block) = body.current.take() {
                body.blocks.push(block);
            }
        }
        Ok(())
    }

    fn at_instruction_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Identifier(IdentifierKind::Temporary, _)
                    | TokenKind::AnonymousIdentifier(_, _)
                    | TokenKind::Opcode(_)
            )
        )
    }

    // Instructions

    fn parse_instruction(&mut self) -> Result<Instruction, ParseError> {
        let first = match self.peek() {
            Some(tok) => tok.clone(),
            None => return Err(self.unexpected_eof("an instruction")),
        };

        let mut name = None;
        let mut named = false;
        match &first.kind {
            TokenKind::Identifier(IdentifierKind::Temporary, n) => {
                self.next();
                self.expect(TokenKind::Equal, "'='")?;
                name = Some(n.clone());
                named = true;
            }
            TokenKind::AnonymousIdentifier(block, index) => {
                self.next();
                if (*block, *index) != self.current_slot() {
                    return Err(ParseError::InvalidAnonymousIdentifierIndex { span: first.span });
                }
                self.expect(TokenKind::Equal, "'='")?;
                named = true;
            }
            _ => {}
        }

        let kind = self.parse_instruction_kind()?;
        let ty = kind.result_type(&self.module);
        if ty == Type::Invalid {
            return Err(ParseError::InvalidOperands {
                opcode: kind.opcode().to_string(),
                span: first.span,
            });
        }
        if named && ty == Type::Void {
            return Err(ParseError::CannotNameVoidValue { span: first.span });
        }
        if let Some(n) = &name {
            let (block, index) = self.current_slot();
            self.symbols.define_local(
                n,
                first.span,
                LocalEntry {
                    value: LocalValue::Instruction { block, index },
                    ty: ty.clone(),
                },
            )?;
        }
        Ok(Instruction { name, kind, ty })
    }

    fn parse_instruction_kind(&mut self) -> Result<InstructionKind, ParseError> {
        let tok = self.take("an instruction")?;
        let opcode = match tok.kind {
            TokenKind::Opcode(opcode) => opcode,
            kind => {
                return Err(ParseError::UnexpectedToken {
                    expected: "an instruction".to_string(),
                    found: kind.to_string(),
                    span: tok.span,
                })
            }
        };

        match opcode {
            Opcode::Branch => {
                let (destination, arguments) = self.parse_branch_target()?;
                Ok(InstructionKind::Branch {
                    destination,
                    arguments,
                })
            }
            Opcode::Conditional => {
                let (condition, _) = self.parse_use()?;
                self.expect(TokenKind::KwThen, "'then'")?;
                let (then_block, then_arguments) = self.parse_branch_target()?;
                self.expect(TokenKind::KwElse, "'else'")?;
                let (else_block, else_arguments) = self.parse_branch_target()?;
                Ok(InstructionKind::Conditional {
                    condition,
                    then_block,
                    then_arguments,
                    else_block,
                    else_arguments,
                })
            }
            Opcode::Return => {
                // A bare return is exactly a `return` followed by a newline;
                // dispatch must not have consumed any.
                if self.at(TokenKind::Newline) {
                    Ok(InstructionKind::Return(None))
                } else {
                    let (value, _) = self.parse_use()?;
                    Ok(InstructionKind::Return(Some(value)))
                }
            }
            Opcode::DataTypeCast => {
                let (value, _) = self.parse_use()?;
                self.expect(TokenKind::KwTo, "'to'")?;
                let (target, _) = self.parse_data_type()?;
                Ok(InstructionKind::DataTypeCast { value, target })
            }
            Opcode::Scan | Opcode::Reduce => {
                let (value, _) = self.parse_use()?;
                self.expect(TokenKind::KwBy, "'by'")?;
                let combinator = self.parse_reduction_combinator()?;
                self.expect(TokenKind::KwAlong, "'along'")?;
                let dimensions =
                    self.parse_comma_separated(|p| Ok(p.parse_non_negative_integer()?.0))?;
                if opcode == Opcode::Scan {
                    Ok(InstructionKind::Scan {
                        value,
                        combinator,
                        dimensions,
                    })
                } else {
                    Ok(InstructionKind::Reduce {
                        value,
                        combinator,
                        dimensions,
                    })
                }
            }
            Opcode::MatrixMultiply => {
                let (left, _) = self.parse_use()?;
                self.wrap(TokenKind::Comma, "','")?;
                let (right, _) = self.parse_use()?;
                Ok(InstructionKind::MatrixMultiply { left, right })
            }
            Opcode::Concatenate => {
                let values = self.parse_comma_separated(|p| Ok(p.parse_use()?.0))?;
                self.expect(TokenKind::KwAlong, "'along'")?;
                let (axis, _) = self.parse_non_negative_integer()?;
                Ok(InstructionKind::Concatenate { values, axis })
            }
            Opcode::Transpose => {
                let (value, _) = self.parse_use()?;
                Ok(InstructionKind::Transpose(value))
            }
            Opcode::ShapeCast => {
                let (value, _) = self.parse_use()?;
                self.expect(TokenKind::KwTo, "'to'")?;
                let target = if self.accept(TokenKind::KwScalar).is_some() {
                    TensorShape::scalar()
                } else {
                    TensorShape(self.parse_shape_dimensions()?)
                };
                Ok(InstructionKind::ShapeCast { value, target })
            }
            Opcode::BitCast => {
                let (value, _) = self.parse_use()?;
                self.expect(TokenKind::KwTo, "'to'")?;
                let target = self.parse_type()?.node;
                Ok(InstructionKind::BitCast { value, target })
            }
            Opcode::Extract => {
                let keys = self.parse_comma_separated(|p| p.parse_element_key())?;
                self.expect(TokenKind::KwFrom, "'from'")?;
                let (source, _) = self.parse_use()?;
                Ok(InstructionKind::Extract { source, keys })
            }
            Opcode::Insert => {
                let (value, _) = self.parse_use()?;
                self.expect(TokenKind::KwTo, "'to'")?;
                let (destination, _) = self.parse_use()?;
                self.expect(TokenKind::KwAt, "'at'")?;
                let keys = self.parse_comma_separated(|p| p.parse_element_key())?;
                Ok(InstructionKind::Insert {
                    value,
                    destination,
                    keys,
                })
            }
            Opcode::Apply => self.parse_apply(),
            Opcode::AllocateStack => {
                let ty = self.parse_type()?.node;
                self.expect(TokenKind::KwCount, "'count'")?;
                let (count, _) = self.parse_non_negative_integer()?;
                Ok(InstructionKind::AllocateStack { ty, count })
            }
            Opcode::AllocateHeap => {
                let ty = self.parse_type()?.node;
                self.expect(TokenKind::KwCount, "'count'")?;
                let (count, _) = self.parse_use()?;
                Ok(InstructionKind::AllocateHeap { ty, count })
            }
            Opcode::AllocateBox => Ok(InstructionKind::AllocateBox(self.parse_type()?.node)),
            Opcode::ProjectBox => Ok(InstructionKind::ProjectBox(self.parse_use()?.0)),
            Opcode::Retain => Ok(InstructionKind::Retain(self.parse_use()?.0)),
            Opcode::Release => Ok(InstructionKind::Release(self.parse_use()?.0)),
            Opcode::Deallocate => Ok(InstructionKind::Deallocate(self.parse_use()?.0)),
            Opcode::Load => Ok(InstructionKind::Load(self.parse_use()?.0)),
            Opcode::Store => {
                let (value, _) = self.parse_use()?;
                self.expect(TokenKind::KwTo, "'to'")?;
                let (location, _) = self.parse_use()?;
                Ok(InstructionKind::Store { value, location })
            }
            Opcode::ElementPointer => {
                let (base, _) = self.parse_use()?;
                self.expect(TokenKind::KwAt, "'at'")?;
                let keys = self.parse_comma_separated(|p| p.parse_element_key())?;
                Ok(InstructionKind::ElementPointer { base, keys })
            }
            Opcode::Copy => {
                self.expect(TokenKind::KwFrom, "'from'")?;
                let (source, _) = self.parse_use()?;
                self.expect(TokenKind::KwTo, "'to'")?;
                let (destination, _) = self.parse_use()?;
                self.expect(TokenKind::KwCount, "'count'")?;
                let (count, _) = self.parse_use()?;
                Ok(InstructionKind::Copy {
                    source,
                    destination,
                    count,
                })
            }
            Opcode::Trap => Ok(InstructionKind::Trap),
            Opcode::Binary(op) => {
                let (left, _) = self.parse_use()?;
                self.wrap(TokenKind::Comma, "','")?;
                let (right, _) = self.parse_use()?;
                Ok(InstructionKind::ZipWith { op, left, right })
            }
            Opcode::Unary(op) => {
                let (value, _) = self.parse_use()?;
                Ok(InstructionKind::Map { op, value })
            }
        }
    }

    fn parse_apply(&mut self) -> Result<InstructionKind, ParseError> {
        let tok = self.take("a function value")?;
        let callee_kind = match tok.kind {
            TokenKind::Identifier(IdentifierKind::Global, name) => {
                UseKind::Function(self.symbols.lookup_global(&name, tok.span)?)
            }
            TokenKind::Identifier(IdentifierKind::Temporary, name) => {
                let entry = self.symbols.lookup_local(&name, tok.span)?;
                to_use_kind(entry.value)
            }
            TokenKind::Identifier(kind, name) => {
                return Err(ParseError::UnexpectedIdentifierKind {
                    expected: "a global or temporary",
                    found: format!("'{}{name}'", kind.sigil()),
                    span: tok.span,
                })
            }
            kind => {
                return Err(ParseError::UnexpectedToken {
                    expected: "a function value".to_string(),
                    found: kind.to_string(),
                    span: tok.span,
                })
            }
        };
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_newlines();
        let arguments = self.parse_use_list()?;
        self.skip_newlines();
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;
        self.skip_newlines();
        // The written type is taken at face value here; checking it against
        // the callee's prototype is the verifier's job once prototypes carry
        // their final types.
        let alleged = self.parse_type()?;
        Ok(InstructionKind::Apply {
            callee: Use::new(alleged.node, callee_kind),
            arguments,
        })
    }

    fn parse_branch_target(&mut self) -> Result<(usize, Vec<Use>), ParseError> {
        let (name, span) = self.parse_identifier(IdentifierKind::BasicBlock)?;
        let destination = self.symbols.lookup_basic_block(&name, span)?;
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_newlines();
        let arguments = self.parse_use_list()?;
        self.skip_newlines();
        self.expect(TokenKind::RParen, "')'")?;
        Ok((destination, arguments))
    }

    fn parse_reduction_combinator(&mut self) -> Result<ReductionCombinator, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Opcode(Opcode::Binary(op))) if op.is_associative() => {
                let op = *op;
                self.next();
                Ok(ReductionCombinator::Op(op))
            }
            Some(TokenKind::Opcode(_)) => Err(ParseError::UnexpectedToken {
                expected: "an associative operator or a function value".to_string(),
                found: self
                    .peek_kind()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                span: self.peek_span(),
            }),
            // Any value is accepted as a combinator; whether it is callable
            // is checked by verification, not here.
            _ => Ok(ReductionCombinator::Function(self.parse_use()?.0)),
        }
    }

    fn parse_element_key(&mut self) -> Result<ElementKey, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Integer(_)) => Ok(ElementKey::Index(
                self.parse_non_negative_integer()?.0,
            )),
            Some(TokenKind::Identifier(IdentifierKind::Key, _)) => {
                let (name, _) = self.parse_identifier(IdentifierKind::Key)?;
                Ok(ElementKey::Name(name))
            }
            _ => Ok(ElementKey::Value(self.parse_use()?.0)),
        }
    }

    // Uses and literals

    fn parse_use(&mut self) -> Result<(Use, Span), ParseError> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => return Err(self.unexpected_eof("a use of value")),
        };
        match tok.kind {
            TokenKind::Identifier(IdentifierKind::Global, ref name) => {
                self.next();
                let id = self.symbols.lookup_global(name, tok.span)?;
                let resolved = self.module.functions[id].ty();
                let written = self.parse_type_signature()?;
                let span = join(tok.span, written.span);
                self.check_types_match(&written.node, &resolved, span)?;
                Ok((Use::new(written.node, UseKind::Function(id)), span))
            }
            TokenKind::Identifier(IdentifierKind::Temporary, ref name) => {
                self.next();
                let entry = self.symbols.lookup_local(name, tok.span)?.clone();
                let written = self.parse_type_signature()?;
                let span = join(tok.span, written.span);
                self.check_types_match(&written.node, &entry.ty, span)?;
                Ok((Use::new(written.node, to_use_kind(entry.value)), span))
            }
            TokenKind::Identifier(kind, ref name) => Err(ParseError::UnexpectedIdentifierKind {
                expected: "a global or temporary",
                found: format!("'{}{name}'", kind.sigil()),
                span: tok.span,
            }),
            TokenKind::AnonymousIdentifier(block, index) => {
                self.next();
                let resolved = self.resolve_anonymous(block, index, tok.span)?;
                let written = self.parse_type_signature()?;
                let span = join(tok.span, written.span);
                self.check_types_match(&written.node, &resolved, span)?;
                Ok((
                    Use::new(written.node, UseKind::Instruction { block, index }),
                    span,
                ))
            }
            _ if self.at_literal_start() => {
                let (literal, literal_span) = self.parse_literal()?;
                let written = self.parse_type_signature()?;
                let span = join(literal_span, written.span);
                Ok((Use::new(written.node, UseKind::Literal(literal)), span))
            }
            kind => Err(ParseError::UnexpectedToken {
                expected: "a use of value".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_use_list(&mut self) -> Result<Vec<Use>, ParseError> {
        self.parse_many(|p| {
            if p.at_use_start() {
                Ok(Some(p.parse_use()?.0))
            } else {
                Ok(None)
            }
        })
    }

    fn at_use_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Identifier(IdentifierKind::Global | IdentifierKind::Temporary, _)
                    | TokenKind::AnonymousIdentifier(_, _)
            )
        ) || self.at_literal_start()
    }

    /// Resolves an anonymous reference against the function layout parsed so
    /// far. The referent must be an unnamed non-void instruction in the
    /// current block (prior to this point) or any earlier block.
    fn resolve_anonymous(
        &self,
        block: usize,
        index: usize,
        span: Span,
    ) -> Result<Type, ParseError> {
        let body = self
            .body
            .as_ref()
            .filter(|b| b.current.is_some())
            .ok_or(ParseError::AnonymousIdentifierNotInLocal { span })?;
        let instruction = if block < body.blocks.len() {
            body.blocks[block].instructions.get(index)
        } else if block == body.blocks.len() {
            body.current.as_ref().and_then(|b| b.instructions.get(index))
        } else {
            None
        };
        match instruction {
            Some(instruction) if instruction.name.is_none() && instruction.ty != Type::Void => {
                Ok(instruction.ty.clone())
            }
            _ => Err(ParseError::InvalidAnonymousIdentifierIndex { span }),
        }
    }

    fn current_slot(&self) -> (usize, usize) {
        match &self.body {
            Some(body) => (
                body.blocks.len(),
                body.current.as_ref().map_or(0, |b| b.instructions.len()),
            ),
            None => (0, 0),
        }
    }

    fn check_types_match(
        &self,
        written: &Type,
        resolved: &Type,
        span: Span,
    ) -> Result<(), ParseError> {
        if written.canonical(&self.module) == resolved.canonical(&self.module) {
            Ok(())
        } else {
            Err(ParseError::TypeMismatch {
                expected: resolved.display(&self.module).to_string(),
                span,
            })
        }
    }

    fn at_literal_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Integer(_)
                    | TokenKind::Float(_)
                    | TokenKind::KwTrue
                    | TokenKind::KwFalse
                    | TokenKind::KwNull
                    | TokenKind::KwUndefined
                    | TokenKind::KwZero
                    | TokenKind::LBracket
                    | TokenKind::LParen
                    | TokenKind::LAngle
                    | TokenKind::LBrace
            )
        )
    }

    fn parse_literal(&mut self) -> Result<(Literal, Span), ParseError> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => return Err(self.unexpected_eof("a literal")),
        };
        match tok.kind {
            TokenKind::Integer(value) => {
                self.next();
                Ok((Literal::Int(value), tok.span))
            }
            TokenKind::Float(value) => {
                self.next();
                Ok((Literal::Float(value), tok.span))
            }
            TokenKind::KwTrue => {
                self.next();
                Ok((Literal::Bool(true), tok.span))
            }
            TokenKind::KwFalse => {
                self.next();
                Ok((Literal::Bool(false), tok.span))
            }
            TokenKind::KwNull => {
                self.next();
                Ok((Literal::Null, tok.span))
            }
            TokenKind::KwUndefined => {
                self.next();
                Ok((Literal::Undefined, tok.span))
            }
            TokenKind::KwZero => {
                self.next();
                Ok((Literal::Zero, tok.span))
            }
            TokenKind::LBracket => {
                let (uses, span) = self.parse_aggregate(tok.span, TokenKind::RBracket, "']'")?;
                Ok((Literal::Array(uses), span))
            }
            TokenKind::LParen => {
                let (uses, span) = self.parse_aggregate(tok.span, TokenKind::RParen, "')'")?;
                Ok((Literal::Tuple(uses), span))
            }
            TokenKind::LAngle => {
                let (uses, span) = self.parse_aggregate(tok.span, TokenKind::RAngle, "'>'")?;
                Ok((Literal::Tensor(uses), span))
            }
            TokenKind::LBrace => {
                self.next();
                self.skip_newlines();
                let fields = self.parse_many(|p| match p.peek_kind() {
                    Some(TokenKind::Identifier(IdentifierKind::Key, _)) => {
                        let (key, _) = p.parse_identifier(IdentifierKind::Key)?;
                        p.skip_newlines();
                        p.expect(TokenKind::Equal, "'='")?;
                        p.skip_newlines();
                        let (value, _) = p.parse_use()?;
                        Ok(Some((key, value)))
                    }
                    _ => Ok(None),
                })?;
                self.skip_newlines();
                let close = self.expect(TokenKind::RBrace, "'}'")?;
                Ok((Literal::Struct(fields), join(tok.span, close.span)))
            }
            kind => Err(ParseError::UnexpectedToken {
                expected: "a literal".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_aggregate(
        &mut self,
        open: Span,
        close: TokenKind,
        close_name: &str,
    ) -> Result<(Vec<Use>, Span), ParseError> {
        self.next();
        self.skip_newlines();
        let uses = self.parse_use_list()?;
        self.skip_newlines();
        let end = self.expect(close, close_name)?;
        Ok((uses, join(open, end.span)))
    }

    // Types

    fn parse_type_signature(&mut self) -> Result<Spanned<Type>, ParseError> {
        self.expect(TokenKind::Colon, "':'")?;
        self.skip_newlines();
        self.parse_type()
    }

    fn parse_type(&mut self) -> Result<Spanned<Type>, ParseError> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => return Err(self.unexpected_eof("a type")),
        };
        match tok.kind {
            TokenKind::KwVoid => {
                self.next();
                Ok(Spanned::new(tok.span, Type::Void))
            }
            TokenKind::DataType(dt) => {
                self.next();
                Ok(Spanned::new(tok.span, Type::scalar(dt)))
            }
            TokenKind::LBracket => {
                self.next();
                let (count, _) = self.parse_non_negative_integer()?;
                self.expect(TokenKind::Times, "'x'")?;
                let element = self.parse_type()?;
                let close = self.expect(TokenKind::RBracket, "']'")?;
                Ok(Spanned::new(
                    join(tok.span, close.span),
                    Type::Array(count, Box::new(element.node)),
                ))
            }
            TokenKind::LAngle => {
                self.next();
                let dimensions = self.parse_shape_dimensions()?;
                self.expect(TokenKind::Times, "'x'")?;
                let (dt, _) = self.parse_data_type()?;
                let close = self.expect(TokenKind::RAngle, "'>'")?;
                Ok(Spanned::new(
                    join(tok.span, close.span),
                    Type::Tensor(TensorShape(dimensions), dt),
                ))
            }
            TokenKind::LParen => self.parse_tuple_or_function_type(),
            TokenKind::Star => {
                self.next();
                let pointee = self.parse_type()?;
                Ok(Spanned::new(
                    join(tok.span, pointee.span),
                    Type::Pointer(Box::new(pointee.node)),
                ))
            }
            TokenKind::Identifier(IdentifierKind::Temporary, ref name) => {
                self.next();
                let ty = self.symbols.lookup_nominal_type(name, tok.span)?.clone();
                Ok(Spanned::new(tok.span, ty))
            }
            kind => Err(ParseError::UnexpectedToken {
                expected: "a type".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_tuple_or_function_type(&mut self) -> Result<Spanned<Type>, ParseError> {
        let open = self.expect(TokenKind::LParen, "'('")?;
        self.skip_newlines();
        let elements = self.parse_many(|p| {
            if p.at_type_start() {
                Ok(Some(p.parse_type()?.node))
            } else {
                Ok(None)
            }
        })?;
        self.skip_newlines();
        let close = self.expect(TokenKind::RParen, "')'")?;

        // `(…)` is a tuple unless an arrow follows, possibly across newlines.
        let arrow = self.backtracking(|p| {
            p.skip_newlines();
            Ok(p.accept(TokenKind::Arrow).map(|_| ()))
        })?;
        if arrow.is_some() {
            self.skip_newlines();
            let ret = self.parse_type()?;
            Ok(Spanned::new(
                join(open.span, ret.span),
                Type::Function(elements, Box::new(ret.node)),
            ))
        } else {
            Ok(Spanned::new(
                join(open.span, close.span),
                Type::Tuple(elements),
            ))
        }
    }

    fn at_type_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::KwVoid
                    | TokenKind::DataType(_)
                    | TokenKind::LBracket
                    | TokenKind::LAngle
                    | TokenKind::LParen
                    | TokenKind::Star
                    | TokenKind::Identifier(IdentifierKind::Temporary, _)
            )
        )
    }

    /// `int (x int)*`, greedy but backtracking: an `x` not followed by an
    /// integer is left for the caller (it separates the shape from the
    /// element type in tensor types).
    fn parse_shape_dimensions(&mut self) -> Result<Vec<usize>, ParseError> {
        let mut dimensions = vec![self.parse_non_negative_integer()?.0];
        loop {
            let more = self.backtracking(|p| {
                if p.accept(TokenKind::Times).is_none() {
                    return Ok(None);
                }
                match p.peek_kind() {
                    Some(TokenKind::Integer(_)) => Ok(Some(p.parse_non_negative_integer()?.0)),
                    _ => Ok(None),
                }
            })?;
            match more {
                Some(dimension) => dimensions.push(dimension),
                None => break,
            }
        }
        Ok(dimensions)
    }

    // Primitive parsers

    fn parse_identifier(
        &mut self,
        kind: IdentifierKind,
    ) -> Result<(String, Span), ParseError> {
        let expected = kind.describe();
        let tok = self.take(expected)?;
        match tok.kind {
            TokenKind::Identifier(k, name) if k == kind => Ok((name, tok.span)),
            TokenKind::Identifier(k, name) => Err(ParseError::UnexpectedIdentifierKind {
                expected,
                found: format!("'{}{name}'", k.sigil()),
                span: tok.span,
            }),
            other => Err(ParseError::UnexpectedToken {
                expected: format!("{expected} identifier"),
                found: other.to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_integer(&mut self) -> Result<(i64, Span), ParseError> {
        let tok = self.take("an integer")?;
        match tok.kind {
            TokenKind::Integer(value) => Ok((value, tok.span)),
            kind => Err(ParseError::UnexpectedToken {
                expected: "an integer".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_non_negative_integer(&mut self) -> Result<(usize, Span), ParseError> {
        let (value, span) = self.parse_integer()?;
        usize::try_from(value)
            .map(|value| (value, span))
            .map_err(|_| ParseError::UnexpectedToken {
                expected: "a non-negative integer".to_string(),
                found: format!("integer {value}"),
                span,
            })
    }

    fn parse_data_type(&mut self) -> Result<(tarn_syntax::DataType, Span), ParseError> {
        let tok = self.take("a data type")?;
        match tok.kind {
            TokenKind::DataType(dt) => Ok((dt, tok.span)),
            kind => Err(ParseError::UnexpectedToken {
                expected: "a data type".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    fn parse_string_literal(&mut self) -> Result<(String, Span), ParseError> {
        let tok = self.take("a string literal")?;
        match tok.kind {
            TokenKind::Str(value) => Ok((value, tok.span)),
            kind => Err(ParseError::UnexpectedToken {
                expected: "a string literal".to_string(),
                found: kind.to_string(),
                span: tok.span,
            }),
        }
    }

    // Cursor

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.idx)
    }

    fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    #[allow(dead_code)]
    fn peek_next_kind(&self) -> Option<&'a TokenKind> {
        self.tokens.get(self.idx + 1).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Span {
        self.peek().map_or_else(|| self.eof_span(), |t| t.span)
    }

    fn previous_span(&self) -> Span {
        match self.idx.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(tok) => tok.span,
            None => self.eof_span(),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx)?.clone();
        self.idx += 1;
        Some(tok)
    }

    /// `next` with end-of-input mapped to a diagnostic.
    fn take(&mut self, expected: &str) -> Result<Token, ParseError> {
        match self.next() {
            Some(tok) if !matches!(tok.kind, TokenKind::Eof) => Ok(tok),
            _ => Err(self.unexpected_eof(expected)),
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
    }

    fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            self.next()
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        let tok = self.take(expected)?;
        if mem::discriminant(&tok.kind) == mem::discriminant(&kind) {
            Ok(tok)
        } else {
            Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: tok.kind.to_string(),
                span: tok.span,
            })
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.idx += 1;
        }
    }

    /// One or more newlines.
    fn expect_newlines(&mut self) -> Result<(), ParseError> {
        self.expect(TokenKind::Newline, "a newline")?;
        self.skip_newlines();
        Ok(())
    }

    /// Newline-wrapped punctuation: newlines may surround the token.
    fn wrap(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        self.skip_newlines();
        let tok = self.expect(kind, expected)?;
        self.skip_newlines();
        Ok(tok)
    }

    /// Runs a speculative production: an `Ok(None)` restores the cursor, a
    /// parsed value commits, an error propagates unchanged.
    fn backtracking<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Option<T>, ParseError>,
    ) -> Result<Option<T>, ParseError> {
        let saved = self.idx;
        match f(self)? {
            Some(value) => Ok(Some(value)),
            None => {
                self.idx = saved;
                Ok(None)
            }
        }
    }

    /// Runs `f` for its symbol-table side effects and always restores the
    /// cursor. Used by the two pre-scans.
    fn preserved<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let saved = self.idx;
        let result = f(self);
        self.idx = saved;
        result
    }

    /// Zero or more elements separated by newline-wrapped commas. The element
    /// callback signals "no parse" with `None`; a trailing separator before a
    /// closing delimiter is therefore tolerated.
    fn parse_many<T>(
        &mut self,
        mut element: impl FnMut(&mut Self) -> Result<Option<T>, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.backtracking(|p| element(p))? {
                Some(item) => items.push(item),
                None => break,
            }
            let saved = self.idx;
            self.skip_newlines();
            if self.accept(TokenKind::Comma).is_none() {
                self.idx = saved;
                break;
            }
            self.skip_newlines();
        }
        Ok(items)
    }

    /// One or more elements separated by newline-wrapped commas; every comma
    /// must be followed by an element.
    fn parse_comma_separated<T>(
        &mut self,
        mut element: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut items = vec![element(self)?];
        loop {
            let saved = self.idx;
            self.skip_newlines();
            if self.accept(TokenKind::Comma).is_none() {
                self.idx = saved;
                break;
            }
            self.skip_newlines();
            items.push(element(self)?);
        }
        Ok(items)
    }

    fn eof_span(&self) -> Span {
        self.tokens
            .last()
            .map_or_else(|| span_between(0, 0), |t| t.span)
    }

    fn unexpected_eof(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedEndOfInput {
            expected: expected.to_string(),
            span: self.eof_span(),
        }
    }
}

fn to_use_kind(value: LocalValue) -> UseKind {
    match value {
        LocalValue::Argument { block, index } => UseKind::Argument { block, index },
        LocalValue::Instruction { block, index } => UseKind::Instruction { block, index },
    }
}

fn join(a: Span, b: Span) -> Span {
    let a0: usize = a.offset();
    let b0: usize = b.offset();
    let b1 = b0 + b.len();
    if b0 >= a0 {
        span_between(a0, b1)
    } else {
        let a1 = a0 + a.len();
        span_between(b0, a1)
    }
}

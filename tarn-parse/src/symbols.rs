use std::collections::HashMap;

use tarn_syntax::{FunctionId, Span, Type};

use crate::error::ParseError;

/// Where a local name was defined inside the current function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalValue {
    Argument { block: usize, index: usize },
    Instruction { block: usize, index: usize },
}

#[derive(Clone, Debug)]
pub struct LocalEntry {
    pub value: LocalValue,
    pub ty: Type,
}

/// Name resolution state. Globals and nominal types live for the whole
/// module; locals and block labels are cleared when a function ends.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: HashMap<String, FunctionId>,
    locals: HashMap<String, LocalEntry>,
    basic_blocks: HashMap<String, usize>,
    nominal_types: HashMap<String, Type>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn define_global(
        &mut self,
        name: &str,
        span: Span,
        id: FunctionId,
    ) -> Result<(), ParseError> {
        if self.globals.contains_key(name) {
            return Err(redefined(name, span));
        }
        self.globals.insert(name.to_string(), id);
        Ok(())
    }

    pub fn lookup_global(&self, name: &str, span: Span) -> Result<FunctionId, ParseError> {
        self.globals.get(name).copied().ok_or_else(|| {
            ParseError::UndefinedIdentifier {
                name: format!("@{name}"),
                span,
            }
        })
    }

    pub fn define_local(
        &mut self,
        name: &str,
        span: Span,
        entry: LocalEntry,
    ) -> Result<(), ParseError> {
        if self.locals.contains_key(name) {
            return Err(redefined(name, span));
        }
        self.locals.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn lookup_local(&self, name: &str, span: Span) -> Result<&LocalEntry, ParseError> {
        self.locals
            .get(name)
            .ok_or_else(|| ParseError::UndefinedIdentifier {
                name: format!("%{name}"),
                span,
            })
    }

    pub fn define_basic_block(
        &mut self,
        name: &str,
        span: Span,
        index: usize,
    ) -> Result<(), ParseError> {
        if self.basic_blocks.contains_key(name) {
            return Err(redefined(name, span));
        }
        self.basic_blocks.insert(name.to_string(), index);
        Ok(())
    }

    pub fn basic_block_count(&self) -> usize {
        self.basic_blocks.len()
    }

    pub fn lookup_basic_block(&self, name: &str, span: Span) -> Result<usize, ParseError> {
        self.basic_blocks.get(name).copied().ok_or_else(|| {
            ParseError::UndefinedIdentifier {
                name: format!("'{name}"),
                span,
            }
        })
    }

    pub fn define_nominal_type(
        &mut self,
        name: &str,
        span: Span,
        ty: Type,
    ) -> Result<(), ParseError> {
        if self.nominal_types.contains_key(name) {
            return Err(redefined(name, span));
        }
        self.nominal_types.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn lookup_nominal_type(&self, name: &str, span: Span) -> Result<&Type, ParseError> {
        self.nominal_types
            .get(name)
            .ok_or_else(|| ParseError::UndefinedNominalType {
                name: name.to_string(),
                span,
            })
    }

    /// Drops everything scoped to the function that just ended.
    pub fn clear_function_scope(&mut self) {
        self.locals.clear();
        self.basic_blocks.clear();
    }

    pub fn function_scope_is_empty(&self) -> bool {
        self.locals.is_empty() && self.basic_blocks.is_empty()
    }
}

fn redefined(name: &str, span: Span) -> ParseError {
    ParseError::RedefinedIdentifier {
        name: name.to_string(),
        span,
    }
}

use std::collections::BTreeSet;

use crate::instruction::Instruction;
use crate::types::{FunctionId, Type};

/// Lowering level a module declares itself to be in. Parsed and carried, not
/// interpreted here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Raw,
    Canonical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attribute {
    Inline,
    Differentiable,
    Exported,
}

impl Attribute {
    pub fn name(self) -> &'static str {
        match self {
            Attribute::Inline => "inline",
            Attribute::Differentiable => "differentiable",
            Attribute::Exported => "exported",
        }
    }
}

/// What makes a function a declaration rather than a definition.
#[derive(Clone, Debug, PartialEq)]
pub enum DeclarationKind {
    External,
    Gradient {
        of: FunctionId,
        from: Option<usize>,
        wrt: Vec<usize>,
        keeping: Vec<usize>,
        seedable: bool,
    },
}

/// `type %T = …`. A `None` body is an opaque alias.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeAlias {
    pub name: String,
    pub ty: Option<Type>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub attributes: BTreeSet<Attribute>,
    pub declaration_kind: Option<DeclarationKind>,
    pub argument_types: Vec<Type>,
    pub return_type: Type,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// A fresh prototype, as registered by the module pre-scan before the
    /// function header has been parsed.
    pub fn prototype(name: impl Into<String>) -> Function {
        Function {
            name: name.into(),
            attributes: BTreeSet::new(),
            declaration_kind: None,
            argument_types: Vec::new(),
            return_type: Type::Invalid,
            blocks: Vec::new(),
        }
    }

    pub fn is_definition(&self) -> bool {
        self.declaration_kind.is_none()
    }

    /// The function's own type, as seen by a use of its name.
    pub fn ty(&self) -> Type {
        Type::Function(
            self.argument_types.clone(),
            Box::new(self.return_type.clone()),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub name: String,
    pub stage: Stage,
    pub type_aliases: Vec<TypeAlias>,
    pub structs: Vec<StructDef>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>, stage: Stage) -> Module {
        Module {
            name: name.into(),
            stage,
            type_aliases: Vec::new(),
            structs: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

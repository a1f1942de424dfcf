use miette::Diagnostic;
use tarn_syntax::Span;
use thiserror::Error;

/// Everything the parser can reject. Each variant carries the source range
/// of the offending token(s); parsing stops at the first error.
#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    #[diagnostic(code(tarn::parse::unexpected_token))]
    UnexpectedToken {
        expected: String,
        found: String,
        #[label]
        span: Span,
    },

    #[error("unexpected end of input while looking for {expected}")]
    #[diagnostic(code(tarn::parse::unexpected_end_of_input))]
    UnexpectedEndOfInput {
        expected: String,
        #[label("input ends here")]
        span: Span,
    },

    #[error("expected {expected} identifier, found {found}")]
    #[diagnostic(code(tarn::parse::unexpected_identifier_kind))]
    UnexpectedIdentifierKind {
        expected: &'static str,
        found: String,
        #[label]
        span: Span,
    },

    #[error("use of undefined identifier '{name}'")]
    #[diagnostic(code(tarn::parse::undefined_identifier))]
    UndefinedIdentifier {
        name: String,
        #[label]
        span: Span,
    },

    #[error("use of undefined nominal type '%{name}'")]
    #[diagnostic(code(tarn::parse::undefined_nominal_type))]
    UndefinedNominalType {
        name: String,
        #[label]
        span: Span,
    },

    #[error("redefinition of '{name}'")]
    #[diagnostic(code(tarn::parse::redefined_identifier))]
    RedefinedIdentifier {
        name: String,
        #[label]
        span: Span,
    },

    #[error("type mismatch: the value here has type {expected}")]
    #[diagnostic(code(tarn::parse::type_mismatch))]
    TypeMismatch {
        expected: String,
        #[label("written type disagrees")]
        span: Span,
    },

    #[error("expected a function type")]
    #[diagnostic(code(tarn::parse::not_function_type))]
    NotFunctionType {
        #[label("not a function type")]
        span: Span,
    },

    #[error("invalid operands to '{opcode}'")]
    #[diagnostic(code(tarn::parse::invalid_operands))]
    InvalidOperands {
        opcode: String,
        #[label]
        span: Span,
    },

    #[error("cannot name a value of void type")]
    #[diagnostic(code(tarn::parse::cannot_name_void_value))]
    CannotNameVoidValue {
        #[label]
        span: Span,
    },

    #[error("anonymous identifier used outside a basic block")]
    #[diagnostic(code(tarn::parse::anonymous_identifier_not_in_local))]
    AnonymousIdentifierNotInLocal {
        #[label]
        span: Span,
    },

    #[error("anonymous identifier does not refer to a prior unnamed instruction")]
    #[diagnostic(code(tarn::parse::invalid_anonymous_identifier_index))]
    InvalidAnonymousIdentifierIndex {
        #[label]
        span: Span,
    },

    #[error("a function declaration cannot have a body")]
    #[diagnostic(code(tarn::parse::declaration_cannot_have_body))]
    DeclarationCannotHaveBody {
        #[label("declared here")]
        declaration: Span,
        #[label("body begins here")]
        body: Span,
    },
}

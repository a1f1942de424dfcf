use tarn_lex::Lexer;
use tarn_parse::Parser;
use tarn_syntax::{
    Attribute, DataType, DeclarationKind, InstructionKind, Module, Stage, TensorShape, Type,
};

fn parse(src: &str) -> Module {
    let tokens = Lexer::new(src).lex().expect("lexing should succeed");
    Parser::new(&tokens)
        .parse_module()
        .expect("parsing should succeed")
}

#[test]
fn minimal_module() {
    let module = parse("module \"m\"\nstage raw\n");
    assert_eq!(module.name, "m");
    assert_eq!(module.stage, Stage::Raw);
    assert!(module.type_aliases.is_empty());
    assert!(module.structs.is_empty());
    assert!(module.functions.is_empty());
}

#[test]
fn minimal_module_without_trailing_newline() {
    let module = parse("module \"m\"\nstage canonical");
    assert_eq!(module.stage, Stage::Canonical);
}

#[test]
fn type_alias_binds_scalar_tensor() {
    let module = parse("module \"m\"\nstage raw\ntype %T = i32\n");
    assert_eq!(module.type_aliases.len(), 1);
    assert_eq!(module.type_aliases[0].name, "T");
    assert_eq!(
        module.type_aliases[0].ty,
        Some(Type::Tensor(TensorShape::scalar(), DataType::I32))
    );
}

#[test]
fn opaque_alias_has_no_underlying_type() {
    let module = parse("module \"m\"\nstage raw\ntype %T = opaque\n");
    assert_eq!(module.type_aliases[0].ty, None);
}

#[test]
fn alias_can_reference_earlier_alias() {
    let module = parse("module \"m\"\nstage raw\ntype %T = <4 x f32>\ntype %U = %T\n");
    assert_eq!(module.type_aliases[1].ty, Some(Type::Alias(0)));
}

#[test]
fn struct_with_fields() {
    let module = parse("module \"m\"\nstage raw\nstruct %S { #a: i32, #b: f32 }\n");
    let def = &module.structs[0];
    assert_eq!(def.name, "S");
    assert_eq!(def.fields.len(), 2);
    assert_eq!(def.fields[0].name, "a");
    assert_eq!(def.fields[0].ty, Type::scalar(DataType::I32));
    assert_eq!(def.fields[1].name, "b");
    assert_eq!(def.fields[1].ty, Type::scalar(DataType::F32));
}

#[test]
fn struct_tolerates_trailing_comma() {
    let module = parse("module \"m\"\nstage raw\nstruct %S { #a: i32, }\n");
    assert_eq!(module.structs[0].fields.len(), 1);
}

#[test]
fn empty_struct() {
    let module = parse("module \"m\"\nstage raw\nstruct %S { }\n");
    assert!(module.structs[0].fields.is_empty());
}

#[test]
fn struct_fields_may_wrap_lines() {
    let module = parse("module \"m\"\nstage raw\nstruct %S {\n    #a: i32,\n    #b: <2 x 2 x f32>\n}\n");
    assert_eq!(module.structs[0].fields.len(), 2);
    assert_eq!(
        module.structs[0].fields[1].ty,
        Type::Tensor(TensorShape(vec![2, 2]), DataType::F32)
    );
}

#[test]
fn function_with_branch_across_blocks() {
    let module = parse(
        "module \"m\"\n\
         stage canonical\n\
         func @f: (i32) -> i32 {\n\
         'entry(%x: i32):\n\
           branch 'exit(%x: i32)\n\
         'exit(%y: i32):\n\
           return %y: i32\n\
         }\n",
    );
    let f = module.function("f").expect("function f should exist");
    assert!(f.is_definition());
    assert_eq!(f.argument_types, vec![Type::scalar(DataType::I32)]);
    assert_eq!(f.return_type, Type::scalar(DataType::I32));
    assert_eq!(f.blocks.len(), 2);

    let entry = &f.blocks[0];
    assert_eq!(entry.name, "entry");
    assert_eq!(entry.arguments[0].name, "x");
    assert_eq!(entry.arguments[0].ty, Type::scalar(DataType::I32));
    // `'exit` is targeted before it is parsed; the pre-scan resolves it.
    match &entry.instructions[0].kind {
        InstructionKind::Branch {
            destination,
            arguments,
        } => {
            assert_eq!(*destination, 1);
            assert_eq!(arguments.len(), 1);
            assert_eq!(arguments[0].ty, Type::scalar(DataType::I32));
        }
        other => panic!("expected a branch, got {}", other.opcode()),
    }

    let exit = &f.blocks[1];
    assert_eq!(exit.name, "exit");
    assert_eq!(exit.arguments[0].name, "y");
    assert!(matches!(
        exit.instructions[0].kind,
        InstructionKind::Return(Some(_))
    ));
}

#[test]
fn extern_declaration_has_no_body() {
    let module = parse("module \"m\"\nstage raw\n[extern]\nfunc @f: (i32) -> i32\n");
    let f = module.function("f").expect("function f should exist");
    assert!(!f.is_definition());
    assert_eq!(f.declaration_kind, Some(DeclarationKind::External));
    assert!(f.blocks.is_empty());
}

#[test]
fn gradient_declaration_configuration() {
    let module = parse(
        "module \"m\"\n\
         stage raw\n\
         func @f: (f32, f32) -> f32 {\n\
         'entry(%x: f32, %y: f32):\n\
           return %x: f32\n\
         }\n\
         [gradient @f from 0 wrt 0, 1 keeping 0 seedable]\n\
         func @df: (f32, f32) -> (f32, f32)\n",
    );
    let df = module.function("df").expect("function df should exist");
    assert_eq!(
        df.declaration_kind,
        Some(DeclarationKind::Gradient {
            of: 0,
            from: Some(0),
            wrt: vec![0, 1],
            keeping: vec![0],
            seedable: true,
        })
    );
}

#[test]
fn gradient_without_optional_clauses() {
    let module = parse(
        "module \"m\"\n\
         stage raw\n\
         func @f: (f32) -> f32 {\n\
         'entry(%x: f32):\n\
           return %x: f32\n\
         }\n\
         [gradient @f wrt 0]\n\
         func @df: (f32) -> f32\n",
    );
    let df = module.function("df").expect("function df should exist");
    assert_eq!(
        df.declaration_kind,
        Some(DeclarationKind::Gradient {
            of: 0,
            from: None,
            wrt: vec![0],
            keeping: vec![],
            seedable: false,
        })
    );
}

#[test]
fn attributes_are_collected() {
    let module = parse(
        "module \"m\"\n\
         stage raw\n\
         !inline\n\
         !differentiable\n\
         func @f: (f32) -> f32 {\n\
         'entry(%x: f32):\n\
           return %x: f32\n\
         }\n",
    );
    let f = module.function("f").expect("function f should exist");
    assert!(f.attributes.contains(&Attribute::Inline));
    assert!(f.attributes.contains(&Attribute::Differentiable));
    assert!(!f.attributes.contains(&Attribute::Exported));
}

#[test]
fn functions_may_reference_later_functions() {
    let module = parse(
        "module \"m\"\n\
         stage raw\n\
         func @main: () -> i32 {\n\
         'entry():\n\
           %r = apply @later(3: i32): (i32) -> i32\n\
           return %r: i32\n\
         }\n\
         func @later: (i32) -> i32 {\n\
         'entry(%x: i32):\n\
           return %x: i32\n\
         }\n",
    );
    assert_eq!(module.functions.len(), 2);
    assert_eq!(module.functions[0].blocks[0].instructions.len(), 2);
}

#[test]
fn aliases_are_transparent_in_uses() {
    let module = parse(
        "module \"m\"\n\
         stage raw\n\
         type %T = i32\n\
         func @id: (%T) -> %T {\n\
         'entry(%x: %T):\n\
           return %x: i32\n\
         }\n",
    );
    let id = module.function("id").expect("function id should exist");
    assert_eq!(id.argument_types, vec![Type::scalar(DataType::I32)]);
}

#[test]
fn comments_are_ignored() {
    let module = parse(
        "// front matter\n\
         module \"m\" // trailing\n\
         stage raw\n\
         type %T = i32 // alias\n",
    );
    assert_eq!(module.type_aliases.len(), 1);
}

#[test]
fn function_type_may_return_tuple_and_pointer() {
    let module = parse(
        "module \"m\"\n\
         stage raw\n\
         [extern]\n\
         func @f: (i32, *f32) -> (i32, [2 x f32])\n",
    );
    let f = module.function("f").expect("function f should exist");
    assert_eq!(
        f.argument_types[1],
        Type::Pointer(Box::new(Type::scalar(DataType::F32)))
    );
    assert_eq!(
        f.return_type,
        Type::Tuple(vec![
            Type::scalar(DataType::I32),
            Type::Array(2, Box::new(Type::scalar(DataType::F32))),
        ])
    );
}

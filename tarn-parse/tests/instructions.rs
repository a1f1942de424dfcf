use tarn_lex::Lexer;
use tarn_parse::Parser;
use tarn_syntax::{
    DataType, ElementKey, Instruction, InstructionKind, Literal, Module, ReductionCombinator,
    TensorShape, Type, UseKind,
};

fn parse(src: &str) -> Module {
    let tokens = Lexer::new(src).lex().expect("lexing should succeed");
    Parser::new(&tokens)
        .parse_module()
        .expect("parsing should succeed")
}

fn instructions(module: &Module, function: &str) -> Vec<Instruction> {
    module
        .function(function)
        .unwrap_or_else(|| panic!("function {function} should exist"))
        .blocks
        .iter()
        .flat_map(|b| b.instructions.clone())
        .collect()
}

fn tensor(dims: &[usize], dt: DataType) -> Type {
    Type::Tensor(TensorShape(dims.to_vec()), dt)
}

#[test]
fn element_wise_ops_broadcast() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<3 x 4 x f32>, <4 x f32>) -> <3 x 4 x f32> {\n\
         'entry(%a: <3 x 4 x f32>, %b: <4 x f32>):\n\
           %s = add %a: <3 x 4 x f32>, %b: <4 x f32>\n\
           return %s: <3 x 4 x f32>\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, tensor(&[3, 4], DataType::F32));
    assert!(matches!(insts[0].kind, InstructionKind::ZipWith { .. }));
}

#[test]
fn comparisons_produce_bool_tensors() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<3 x f32>, <3 x f32>) -> <3 x bool> {\n\
         'entry(%a: <3 x f32>, %b: <3 x f32>):\n\
           %c = lessThan %a: <3 x f32>, %b: <3 x f32>\n\
           return %c: <3 x bool>\n\
         }\n",
    );
    assert_eq!(instructions(&module, "f")[0].ty, tensor(&[3], DataType::Bool));
}

#[test]
fn unary_map_preserves_type() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<3 x f32>) -> <3 x f32> {\n\
         'entry(%a: <3 x f32>):\n\
           %t = tanh %a: <3 x f32>\n\
           return %t: <3 x f32>\n\
         }\n",
    );
    assert_eq!(instructions(&module, "f")[0].ty, tensor(&[3], DataType::F32));
}

#[test]
fn data_type_cast_changes_element_kind() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<3 x i32>) -> <3 x f32> {\n\
         'entry(%a: <3 x i32>):\n\
           %c = dataTypeCast %a: <3 x i32> to f32\n\
           return %c: <3 x f32>\n\
         }\n",
    );
    assert_eq!(instructions(&module, "f")[0].ty, tensor(&[3], DataType::F32));
}

#[test]
fn matrix_multiply_contracts_inner_dims() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<2 x 3 x f32>, <3 x 4 x f32>) -> <2 x 4 x f32> {\n\
         'entry(%a: <2 x 3 x f32>, %b: <3 x 4 x f32>):\n\
           %m = matrixMultiply %a: <2 x 3 x f32>, %b: <3 x 4 x f32>\n\
           return %m: <2 x 4 x f32>\n\
         }\n",
    );
    assert_eq!(
        instructions(&module, "f")[0].ty,
        tensor(&[2, 4], DataType::F32)
    );
}

#[test]
fn transpose_reverses_shape() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<2 x 3 x 4 x f32>) -> <4 x 3 x 2 x f32> {\n\
         'entry(%a: <2 x 3 x 4 x f32>):\n\
           %t = transpose %a: <2 x 3 x 4 x f32>\n\
           return %t: <4 x 3 x 2 x f32>\n\
         }\n",
    );
    assert_eq!(
        instructions(&module, "f")[0].ty,
        tensor(&[4, 3, 2], DataType::F32)
    );
}

#[test]
fn reduce_drops_dimensions_scan_keeps_them() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<3 x 4 x f32>) -> <4 x f32> {\n\
         'entry(%a: <3 x 4 x f32>):\n\
           %r = reduce %a: <3 x 4 x f32> by add along 0\n\
           %s = scan %a: <3 x 4 x f32> by multiply along 1\n\
           return %r: <4 x f32>\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, tensor(&[4], DataType::F32));
    assert!(matches!(
        insts[0].kind,
        InstructionKind::Reduce {
            combinator: ReductionCombinator::Op(_),
            ..
        }
    ));
    assert_eq!(insts[1].ty, tensor(&[3, 4], DataType::F32));
}

#[test]
fn reduce_accepts_function_combinator() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         [extern]\n\
         func @plus: (f32, f32) -> f32\n\
         func @f: (<3 x f32>) -> f32 {\n\
         'entry(%a: <3 x f32>):\n\
           %r = reduce %a: <3 x f32> by @plus: (f32, f32) -> f32 along 0\n\
           return %r: f32\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, Type::scalar(DataType::F32));
    assert!(matches!(
        insts[0].kind,
        InstructionKind::Reduce {
            combinator: ReductionCombinator::Function(_),
            ..
        }
    ));
}

#[test]
fn concatenate_sums_along_axis() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<2 x 3 x f32>, <4 x 3 x f32>) -> <6 x 3 x f32> {\n\
         'entry(%a: <2 x 3 x f32>, %b: <4 x 3 x f32>):\n\
           %c = concatenate %a: <2 x 3 x f32>, %b: <4 x 3 x f32> along 0\n\
           return %c: <6 x 3 x f32>\n\
         }\n",
    );
    assert_eq!(
        instructions(&module, "f")[0].ty,
        tensor(&[6, 3], DataType::F32)
    );
}

#[test]
fn shape_cast_checks_element_count() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<6 x f32>, <1 x f32>) -> <2 x 3 x f32> {\n\
         'entry(%a: <6 x f32>, %b: <1 x f32>):\n\
           %r = shapeCast %a: <6 x f32> to 2 x 3\n\
           %s = shapeCast %b: <1 x f32> to scalar\n\
           return %r: <2 x 3 x f32>\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, tensor(&[2, 3], DataType::F32));
    assert_eq!(insts[1].ty, Type::scalar(DataType::F32));
}

#[test]
fn bit_cast_takes_the_written_type() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<2 x i32>) -> <2 x f32> {\n\
         'entry(%a: <2 x i32>):\n\
           %r = bitCast %a: <2 x i32> to <2 x f32>\n\
           return %r: <2 x f32>\n\
         }\n",
    );
    assert_eq!(
        instructions(&module, "f")[0].ty,
        tensor(&[2], DataType::F32)
    );
}

#[test]
fn extract_and_insert_walk_struct_fields() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         struct %S { #a: i32, #b: <2 x f32> }\n\
         func @f: (%S) -> i32 {\n\
         'entry(%s: %S):\n\
           %x = extract #a from %s: %S\n\
           %t = insert 7: i32 to %s: %S at #a\n\
           return %x: i32\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, Type::scalar(DataType::I32));
    assert!(matches!(
        &insts[0].kind,
        InstructionKind::Extract { keys, .. } if keys == &[ElementKey::Name("a".to_string())]
    ));
    // insert yields the aggregate's type as written at the use site
    assert_eq!(insts[1].ty, Type::Struct(0));
}

#[test]
fn extract_accepts_value_keys_for_tensors() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (<3 x 4 x f32>, i64) -> <4 x f32> {\n\
         'entry(%t: <3 x 4 x f32>, %i: i64):\n\
           %row = extract %i: i64 from %t: <3 x 4 x f32>\n\
           return %row: <4 x f32>\n\
         }\n",
    );
    assert_eq!(
        instructions(&module, "f")[0].ty,
        tensor(&[4], DataType::F32)
    );
}

#[test]
fn apply_uses_the_written_function_type() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         [extern]\n\
         func @g: (i32) -> i32\n\
         func @f: () -> i32 {\n\
         'entry():\n\
           %r = apply @g(7: i32): (i32) -> i32\n\
           return %r: i32\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, Type::scalar(DataType::I32));
    match &insts[0].kind {
        InstructionKind::Apply { callee, arguments } => {
            assert!(matches!(callee.kind, UseKind::Function(0)));
            assert_eq!(arguments.len(), 1);
        }
        other => panic!("expected an apply, got {}", other.opcode()),
    }
}

#[test]
fn memory_instructions_thread_pointer_types() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: () -> <4 x f32> {\n\
         'entry():\n\
           %stack = allocateStack f32 count 4\n\
           %heap = allocateHeap f32 count 4: i64\n\
           %box = allocateBox <4 x f32>\n\
           %p = projectBox %box: *<4 x f32>\n\
           %v = load %p: *<4 x f32>\n\
           store %v: <4 x f32> to %p: *<4 x f32>\n\
           %e = elementPointer %p: *<4 x f32> at 0\n\
           copy from %heap: *f32 to %e: *f32 count 1: i64\n\
           retain %box: *<4 x f32>\n\
           release %box: *<4 x f32>\n\
           deallocate %heap: *f32\n\
           return %v: <4 x f32>\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    let f32_scalar = Type::scalar(DataType::F32);
    assert_eq!(
        insts[0].ty,
        Type::Pointer(Box::new(Type::Array(4, Box::new(f32_scalar.clone()))))
    );
    assert_eq!(insts[1].ty, Type::Pointer(Box::new(f32_scalar.clone())));
    assert_eq!(
        insts[2].ty,
        Type::Pointer(Box::new(tensor(&[4], DataType::F32)))
    );
    assert_eq!(
        insts[3].ty,
        Type::Pointer(Box::new(tensor(&[4], DataType::F32)))
    );
    assert_eq!(insts[4].ty, tensor(&[4], DataType::F32));
    assert_eq!(insts[5].ty, Type::Void);
    assert_eq!(insts[6].ty, Type::Pointer(Box::new(f32_scalar)));
    for inst in &insts[7..11] {
        assert_eq!(inst.ty, Type::Void);
    }
}

#[test]
fn conditional_branches_carry_arguments() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (bool, i32, i32) -> i32 {\n\
         'entry(%c: bool, %a: i32, %b: i32):\n\
           conditional %c: bool then 'l(%a: i32) else 'r(%b: i32)\n\
         'l(%x: i32):\n\
           return %x: i32\n\
         'r(%y: i32):\n\
           return %y: i32\n\
         }\n",
    );
    let f = module.function("f").expect("function f should exist");
    match &f.blocks[0].instructions[0].kind {
        InstructionKind::Conditional {
            then_block,
            else_block,
            then_arguments,
            else_arguments,
            ..
        } => {
            assert_eq!((*then_block, *else_block), (1, 2));
            assert_eq!(then_arguments.len(), 1);
            assert_eq!(else_arguments.len(), 1);
        }
        other => panic!("expected a conditional, got {}", other.opcode()),
    }
}

#[test]
fn anonymous_slots_define_and_resolve() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: () -> i32 {\n\
         'entry():\n\
           #0.0 = add 1: i32, 2: i32\n\
           #0.1 = add #0.0: i32, 3: i32\n\
           branch 'exit(#0.1: i32)\n\
         'exit(%r: i32):\n\
           #1.0 = add #0.0: i32, %r: i32\n\
           return #1.0: i32\n\
         }\n",
    );
    let f = module.function("f").expect("function f should exist");
    let first = &f.blocks[0].instructions[0];
    assert_eq!(first.name, None);
    assert_eq!(first.ty, Type::scalar(DataType::I32));
    match &f.blocks[1].instructions[0].kind {
        InstructionKind::ZipWith { left, .. } => {
            assert_eq!(left.kind, UseKind::Instruction { block: 0, index: 0 });
        }
        other => panic!("expected a zipWith, got {}", other.opcode()),
    }
}

#[test]
fn aggregate_literals_nest_uses() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         struct %S { #a: i32 }\n\
         func @f: () -> <2 x i32> {\n\
         'entry():\n\
           %p = insert 1: i32 to {#a = 0: i32}: %S at #a\n\
           %q = extract 0 from [1: i32, 2: i32]: [2 x i32]\n\
           %r = extract 1 from (true: bool, 4: i32): (bool, i32)\n\
           return <1: i32, 2: i32>: <2 x i32>\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts[0].ty, Type::Struct(0));
    assert_eq!(insts[1].ty, Type::scalar(DataType::I32));
    assert_eq!(insts[2].ty, Type::scalar(DataType::I32));
    match &insts[3].kind {
        InstructionKind::Return(Some(value)) => match &value.kind {
            UseKind::Literal(Literal::Tensor(elements)) => assert_eq!(elements.len(), 2),
            other => panic!("expected a tensor literal, got {other:?}"),
        },
        other => panic!("expected a return, got {}", other.opcode()),
    }
}

#[test]
fn scalar_literals_cover_every_kind() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (*i32) -> void {\n\
         'entry(%p: *i32):\n\
           store 1: i32 to %p: *i32\n\
           store -2.5: f64 to %p: *i32\n\
           store true: bool to %p: *i32\n\
           store null: *i32 to %p: *i32\n\
           store undefined: i32 to %p: *i32\n\
           store zero: <2 x f32> to %p: *i32\n\
           trap\n\
           return\n\
         }\n",
    );
    let insts = instructions(&module, "f");
    assert_eq!(insts.len(), 8);
    assert!(matches!(insts[6].kind, InstructionKind::Trap));
    assert!(matches!(insts[7].kind, InstructionKind::Return(None)));
}

#[test]
fn use_lists_may_wrap_across_newlines() {
    let module = parse(
        "module \"t\"\n\
         stage raw\n\
         func @f: (i32, i32) -> i32 {\n\
         'entry(%a: i32, %b: i32):\n\
           branch 'exit(%a: i32,\n\
                        %b: i32)\n\
         'exit(%x: i32, %y: i32):\n\
           return %x: i32\n\
         }\n",
    );
    let f = module.function("f").expect("function f should exist");
    match &f.blocks[0].instructions[0].kind {
        InstructionKind::Branch { arguments, .. } => assert_eq!(arguments.len(), 2),
        other => panic!("expected a branch, got {}", other.opcode()),
    }
}

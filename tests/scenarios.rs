//! End-to-end compilation scenarios.
//!
//! Each test builds a small function, compiles it and checks the emitted code, either
//! instruction by instruction or by executing it.

mod common;

use stackgen::{
    compiler::{HandlerRange, VarLocation},
    prelude::*,
};

use common::{opcodes, run};

#[test]
fn test_add_one_round_trip() -> Result<()> {
    let mut module = common::add_one()?;
    let output = ModuleCompiler::new().compile(&mut module)?;

    let code = output.instructions_of("ADDONE").unwrap();
    assert_eq!(
        opcodes(code),
        vec![Opcode::LoadSD, Opcode::LoadC, Opcode::Add, Opcode::Return]
    );
    assert_eq!(code[0].slot, Some(-1));
    assert_eq!(code[1].constant, Some(Constant::Integer(1)));

    let info = output.function("ADDONE").unwrap();
    assert_eq!(info.frame_size, 0);
    assert_eq!(info.parameter_count, 1);
    assert_eq!(info.max_stack, 2);
    assert_eq!(output.position_at(3), Some(SourcePosition::new(1, 1)));
    assert_eq!(run(&output, "ADDONE", &[41]), Some(42));
    Ok(())
}

#[test]
fn test_loop_counter_shares_one_slot() -> Result<()> {
    let mut module = common::count_loop()?;
    let mut compiler = ModuleCompiler::new();
    let output = compiler.compile(&mut module)?;

    let code = output.instructions_of("COUNT").unwrap();
    let stores: Vec<_> = code.iter().filter(|i| i.opcode == Opcode::StoreS).collect();
    assert_eq!(stores.len(), 2);
    assert!(stores.iter().all(|i| i.slot == Some(0)));
    assert_eq!(output.function("COUNT").unwrap().frame_size, 1);
    assert_eq!(compiler.events().count_kind(EventKind::PhiTrivialized), 1);
    assert_eq!(compiler.events().count_kind(EventKind::PhiEliminated), 0);

    // Header, body with the back jump, exit.
    assert_eq!(
        opcodes(code),
        vec![
            Opcode::LoadC,
            Opcode::StoreS,
            Opcode::LoadS,
            Opcode::LoadS,
            Opcode::CmpLt,
            Opcode::JumpIfFalse,
            Opcode::LoadSD,
            Opcode::LoadC,
            Opcode::Add,
            Opcode::StoreS,
            Opcode::Jump,
            Opcode::LoadSD,
            Opcode::Return,
        ]
    );
    assert_eq!(code[5].reference, Reference::Offset(11));
    assert_eq!(code[10].reference, Reference::Offset(2));

    assert_eq!(run(&output, "COUNT", &[0]), Some(0));
    assert_eq!(run(&output, "COUNT", &[5]), Some(5));
    Ok(())
}

#[test]
fn test_branch_falls_through_to_true_block() -> Result<()> {
    let mut module = common::branch()?;
    let output = ModuleCompiler::new().compile(&mut module)?;
    let code = output.instructions_of("PICK").unwrap();

    let branches: Vec<_> = code.iter().filter(|i| i.opcode.is_jump()).collect();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].opcode, Opcode::JumpIfFalse);
    assert_eq!(branches[0].lowstacksize, 0);

    assert_eq!(run(&output, "PICK", &[1]), Some(1));
    assert_eq!(run(&output, "PICK", &[0]), Some(2));
    Ok(())
}

#[test]
fn test_phi_over_critical_edge() -> Result<()> {
    let mut module = common::select()?;
    let mut compiler = ModuleCompiler::new();
    let output = compiler.compile(&mut module)?;

    assert_eq!(compiler.events().count_kind(EventKind::EdgeSplit), 1);
    assert_eq!(compiler.events().count_kind(EventKind::PhiEliminated), 1);
    assert_eq!(output.function("SELECT").unwrap().frame_size, 2);

    assert_eq!(run(&output, "SELECT", &[1]), Some(3));
    assert_eq!(run(&output, "SELECT", &[0]), Some(2));
    Ok(())
}

#[test]
fn test_swapping_phis() -> Result<()> {
    let mut module = common::swap_loop()?;
    let mut compiler = ModuleCompiler::new();
    let output = compiler.compile(&mut module)?;

    assert_eq!(compiler.events().count_kind(EventKind::PhiEliminated), 2);
    assert_eq!(compiler.events().count_kind(EventKind::EdgeSplit), 0);

    assert_eq!(run(&output, "SWAP", &[0]), Some(-1));
    assert_eq!(run(&output, "SWAP", &[1]), Some(1));
    assert_eq!(run(&output, "SWAP", &[4]), Some(-1));
    Ok(())
}

#[test]
fn test_reassigned_parameter_keeps_its_slot() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("DOWN", &["n"], |f| {
        let n0 = f.arg(0);
        let (n1, n2) = (f.var("n"), f.var("n"));
        f.block(0, |b| b.jump(1));
        f.block(1, |b| {
            b.phi(n1, &[(0, n0), (2, n2)]);
            let zero = b.constant(Constant::Integer(0));
            let more = b.binary(BinaryOp::Lt, zero, n1);
            b.branch(more, 2, 3);
        });
        f.block(2, |b| {
            let one = b.constant(Constant::Integer(1));
            b.binary_to(n2, BinaryOp::Sub, n1, one);
            b.jump(1);
        });
        f.block(3, |b| b.ret_val(n1));
    })?;
    let mut module = mb.finish();
    let mut compiler = ModuleCompiler::new();
    let output = compiler.compile(&mut module)?;

    assert_eq!(compiler.events().count_kind(EventKind::PhiTrivialized), 1);
    assert_eq!(compiler.events().count_kind(EventKind::PhiEliminated), 0);
    assert_eq!(output.function("DOWN").unwrap().frame_size, 0);

    let code = output.instructions_of("DOWN").unwrap();
    let stores: Vec<_> = code.iter().filter(|i| i.opcode == Opcode::StoreS).collect();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].slot, Some(-1));

    assert_eq!(run(&output, "DOWN", &[3]), Some(0));
    assert_eq!(run(&output, "DOWN", &[0]), Some(0));
    Ok(())
}

#[test]
fn test_circular_dependency_is_fatal() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("KNOT", &[], |f| {
        let (a, b) = (f.var("a"), f.var("b"));
        f.block(0, |blk| {
            blk.copy_to(a, b);
            blk.copy_to(b, a);
            blk.ret();
        });
    })?;
    let mut module = mb.finish();

    let result = ModuleCompiler::new()
        .with_config(CodegenConfig::default().with_verification(false))
        .compile(&mut module);
    assert!(matches!(result, Err(Error::CircularDependency(_))));
    Ok(())
}

#[test]
fn test_imported_global_read_stays_before_call() -> Result<()> {
    let mut module = common::imported_read()?;
    let output = ModuleCompiler::new().compile(&mut module)?;
    assert_eq!(
        opcodes(output.instructions_of("READ").unwrap()),
        vec![
            Opcode::LoadG,
            Opcode::StoreS,
            Opcode::Call,
            Opcode::LoadSD,
            Opcode::Return
        ]
    );
    Ok(())
}

#[test]
fn test_usage_table_lets_read_move_past_call() -> Result<()> {
    let mut module = common::imported_read()?;
    let mut usage = SymbolUsageTable::new();
    usage.insert("TOUCH", Vec::<String>::new());

    let output = ModuleCompiler::new()
        .with_symbol_usage(Box::new(usage))
        .compile(&mut module)?;
    assert_eq!(
        opcodes(output.instructions_of("READ").unwrap()),
        vec![Opcode::Call, Opcode::LoadG, Opcode::Return]
    );
    Ok(())
}

#[test]
fn test_exception_handler_keeps_argument() -> Result<()> {
    let mut module = common::guarded_call()?;
    let output = ModuleCompiler::new().compile(&mut module)?;

    let code = output.instructions_of("GUARD").unwrap();
    assert_eq!(
        opcodes(code),
        vec![
            Opcode::Call,
            Opcode::DestroyS,
            Opcode::Return,
            Opcode::LoadSD,
            Opcode::Return
        ]
    );
    assert_eq!(code[1].slot, Some(-1));
    assert_eq!(
        output.handlers(),
        &[HandlerRange {
            start: 0,
            end: 3,
            handler: 3
        }]
    );
    Ok(())
}

#[test]
fn test_debug_records_follow_named_variable() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("INC", &["x"], |f| {
        let x = f.arg(0);
        let y = f.var("y");
        f.block(0, |b| {
            let one = b.constant(Constant::Integer(1));
            b.binary_to(y, BinaryOp::Add, x, one);
            b.ret_val(y);
        });
    })?;
    let mut module = mb.finish();
    let output = ModuleCompiler::new().compile(&mut module)?;

    assert_eq!(
        opcodes(output.code()),
        vec![
            Opcode::LoadSD,
            Opcode::LoadC,
            Opcode::Add,
            Opcode::StoreS,
            Opcode::LoadSD,
            Opcode::Return
        ]
    );
    let records: Vec<(usize, &str, LocationChange)> = output
        .debug_records()
        .iter()
        .map(|r| (r.offset, r.name.as_str(), r.change))
        .collect();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].0, 0);
    assert_eq!(records[0].1, "x");
    assert!(matches!(
        records[0].2,
        LocationChange::Appeared {
            location: VarLocation::Slot(-1),
            ..
        }
    ));
    assert_eq!(records[1], (1, "x", LocationChange::Disappeared));
    assert_eq!(records[2].0, 4);
    assert_eq!(records[2].1, "y");
    assert!(matches!(
        records[2].2,
        LocationChange::Appeared {
            location: VarLocation::Slot(0),
            ..
        }
    ));
    assert_eq!(records[3], (5, "y", LocationChange::Disappeared));
    Ok(())
}

#[test]
fn test_without_debug_info_named_temporaries_stay_on_stack() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("INC", &["x"], |f| {
        let x = f.arg(0);
        let y = f.var("y");
        f.block(0, |b| {
            let one = b.constant(Constant::Integer(1));
            b.binary_to(y, BinaryOp::Add, x, one);
            b.ret_val(y);
        });
    })?;
    let mut module = mb.finish();
    let output = ModuleCompiler::new()
        .with_config(CodegenConfig::default().with_debug_info(false))
        .compile(&mut module)?;

    assert_eq!(
        opcodes(output.code()),
        vec![Opcode::LoadSD, Opcode::LoadC, Opcode::Add, Opcode::Return]
    );
    assert!(output.debug_records().is_empty());
    assert_eq!(output.function("INC").unwrap().frame_size, 0);
    Ok(())
}

#[test]
fn test_value_read_twice_is_duplicated() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("SQUARE", &["x"], |f| {
        let x = f.arg(0);
        f.block(0, |b| {
            let one = b.constant(Constant::Integer(1));
            let s = b.binary(BinaryOp::Add, x, one);
            let sq = b.binary(BinaryOp::Mul, s, s);
            b.ret_val(sq);
        });
    })?;
    let mut module = mb.finish();
    let mut compiler = ModuleCompiler::new();
    let output = compiler.compile(&mut module)?;

    assert_eq!(
        opcodes(output.code()),
        vec![
            Opcode::LoadSD,
            Opcode::LoadC,
            Opcode::Add,
            Opcode::Dup,
            Opcode::Mul,
            Opcode::Return
        ]
    );
    assert_eq!(compiler.events().count_kind(EventKind::LoadDuplicated), 1);
    let info = output.function("SQUARE").unwrap();
    assert_eq!(info.frame_size, 0);
    assert_eq!(info.max_stack, 2);
    assert_eq!(run(&output, "SQUARE", &[3]), Some(16));
    Ok(())
}

#[test]
fn test_duplicated_variable_is_visible_on_the_stack() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("TWICE", &["x"], |f| {
        let x = f.arg(0);
        let s = f.var("s");
        f.block(0, |b| {
            let one = b.constant(Constant::Integer(1));
            b.binary_to(s, BinaryOp::Add, x, one);
            let sq = b.binary(BinaryOp::Mul, s, s);
            b.ret_val(sq);
        });
    })?;
    let mut module = mb.finish();
    let output = ModuleCompiler::new().compile(&mut module)?;

    let code = output.instructions_of("TWICE").unwrap();
    assert_eq!(code[3].opcode, Opcode::Dup);
    assert_eq!(code[4].opcode, Opcode::StoreS);

    let changes: Vec<(usize, LocationChange)> = output
        .debug_records()
        .iter()
        .filter(|r| r.name == "s")
        .map(|r| (r.offset, r.change))
        .collect();
    assert!(matches!(
        changes[0],
        (
            4,
            LocationChange::Appeared {
                location: VarLocation::Stack(1),
                ..
            }
        )
    ));
    assert!(matches!(
        changes[1],
        (
            5,
            LocationChange::Moved {
                location: VarLocation::Slot(_),
                ..
            }
        )
    ));
    assert_eq!(run(&output, "TWICE", &[2]), Some(9));
    Ok(())
}

#[test]
fn test_passthrough_pointer_call_is_not_supported() -> Result<()> {
    let mut mb = ModuleBuilder::new();
    mb.function("FORWARD", &["p"], |f| {
        let p = f.arg(0);
        f.block(0, |b| {
            let result = b.ptr_call(p, &[PtrArg::Passthrough]);
            b.ret_val(result);
        });
    })?;
    let mut module = mb.finish();

    let result = ModuleCompiler::new().compile(&mut module);
    assert!(matches!(result, Err(Error::NotSupported(_))));
    Ok(())
}

#[test]
fn test_listing() -> Result<()> {
    let mut module = common::add_one()?;
    let output = ModuleCompiler::new().compile(&mut module)?;
    let listing = output.to_string();
    assert!(listing.starts_with("ADDONE: params=1 frame=0 stack=2"));
    assert!(listing.contains("0002  ADD"));
    Ok(())
}

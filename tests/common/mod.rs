//! Shared IL fixtures for the integration tests.

#![allow(dead_code)]

use stackgen::prelude::*;

/// `ADDONE(x) = x + 1`
pub fn add_one() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    mb.function("ADDONE", &["x"], |f| {
        let x = f.arg(0);
        f.block(0, |b| {
            b.at(1, 1);
            let one = b.constant(Constant::Integer(1));
            let sum = b.binary(BinaryOp::Add, x, one);
            b.ret_val(sum);
        });
    })?;
    Ok(mb.finish())
}

/// `COUNT(n)`: `FOR i := 0; i < n; i := i + 1 DO; RETURN i`
pub fn count_loop() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    mb.function("COUNT", &["n"], |f| {
        let n = f.arg(0);
        let (i0, i1, i2) = (f.var("i"), f.var("i"), f.var("i"));
        f.block(0, |b| {
            b.at(1, 1);
            b.constant_to(i0, Constant::Integer(0));
            b.jump(1);
        });
        f.block(1, |b| {
            b.at(2, 1);
            b.phi(i1, &[(0, i0), (2, i2)]);
            let more = b.binary(BinaryOp::Lt, i1, n);
            b.branch(more, 2, 3);
        });
        f.block(2, |b| {
            b.at(3, 1);
            let one = b.constant(Constant::Integer(1));
            b.binary_to(i2, BinaryOp::Add, i1, one);
            b.jump(1);
        });
        f.block(3, |b| {
            b.at(4, 1);
            b.ret_val(i1);
        });
    })?;
    Ok(mb.finish())
}

/// `PICK(c)`: `IF c THEN RETURN 1 ELSE RETURN 2`
pub fn branch() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    mb.function("PICK", &["c"], |f| {
        let c = f.arg(0);
        f.block(0, |b| b.branch(c, 1, 2));
        f.block(1, |b| {
            let one = b.constant(Constant::Integer(1));
            b.ret_val(one);
        });
        f.block(2, |b| {
            let two = b.constant(Constant::Integer(2));
            b.ret_val(two);
        });
    })?;
    Ok(mb.finish())
}

/// `SELECT(c)`: `x := 1; IF c THEN x := x + 1; RETURN x + x_before`
///
/// The phi at the join cannot share a slot with its operands and the branch edge into the
/// join is critical.
pub fn select() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    mb.function("SELECT", &["c"], |f| {
        let c = f.arg(0);
        let (x0, x1, x2) = (f.var("x"), f.var("x"), f.var("x"));
        f.block(0, |b| {
            b.constant_to(x0, Constant::Integer(1));
            b.branch(c, 1, 2);
        });
        f.block(1, |b| {
            let one = b.constant(Constant::Integer(1));
            b.binary_to(x1, BinaryOp::Add, x0, one);
            b.jump(2);
        });
        f.block(2, |b| {
            b.phi(x2, &[(0, x0), (1, x1)]);
            let sum = b.binary(BinaryOp::Add, x2, x0);
            b.ret_val(sum);
        });
    })?;
    Ok(mb.finish())
}

/// `SWAP(n)`: a loop exchanging `a` and `b` on every iteration.
pub fn swap_loop() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    mb.function("SWAP", &["n"], |f| {
        let n = f.arg(0);
        let (a0, a1) = (f.var("a"), f.var("a"));
        let (b0, b1) = (f.var("b"), f.var("b"));
        let (i0, i1, i2) = (f.var("i"), f.var("i"), f.var("i"));
        f.block(0, |b| {
            b.constant_to(a0, Constant::Integer(1));
            b.constant_to(b0, Constant::Integer(2));
            b.constant_to(i0, Constant::Integer(0));
            b.jump(1);
        });
        f.block(1, |b| {
            b.phi(a1, &[(0, a0), (2, b1)]);
            b.phi(b1, &[(0, b0), (2, a1)]);
            b.phi(i1, &[(0, i0), (2, i2)]);
            let more = b.binary(BinaryOp::Lt, i1, n);
            b.branch(more, 2, 3);
        });
        f.block(2, |b| {
            let one = b.constant(Constant::Integer(1));
            b.binary_to(i2, BinaryOp::Add, i1, one);
            b.jump(1);
        });
        f.block(3, |b| {
            let diff = b.binary(BinaryOp::Sub, a1, b1);
            b.ret_val(diff);
        });
    })?;
    Ok(mb.finish())
}

/// `READ()`: copies the imported global `G`, calls `TOUCH` and returns the copy.
pub fn imported_read() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    let g = mb.imported_global("G");
    mb.function("READ", &[], |f| {
        let g1 = f.global(g);
        let saved = f.temp();
        f.block(0, |b| {
            b.copy_to(saved, g1);
            b.call_void("TOUCH", &[]);
            b.ret_val(saved);
        });
    })?;
    Ok(mb.finish())
}

/// `GUARD(x)`: calls `RISKY`, falling back to `x` in an exception handler.
pub fn guarded_call() -> Result<Module> {
    let mut mb = ModuleBuilder::new();
    mb.function("GUARD", &["x"], |f| {
        let x = f.arg(0);
        f.block(0, |b| {
            let result = b.call("RISKY", &[]);
            b.throws_to(1);
            b.ret_val(result);
        });
        f.block(1, |b| b.ret_val(x));
    })?;
    Ok(mb.finish())
}

/// All fixtures in one list, for property checks.
pub fn all() -> Result<Vec<Module>> {
    Ok(vec![
        add_one()?,
        count_loop()?,
        branch()?,
        select()?,
        swap_loop()?,
        imported_read()?,
        guarded_call()?,
    ])
}

/// Opcodes of a slice of instructions.
pub fn opcodes(code: &[Instruction]) -> Vec<Opcode> {
    code.iter().map(|i| i.opcode).collect()
}

/// Executes `function` on integer arguments and returns its result.
///
/// Only the arithmetic, slot and jump opcodes the fixtures produce are understood.
pub fn run(output: &CompiledModule, function: &str, args: &[i64]) -> Option<i64> {
    use std::collections::HashMap;

    let info = output.function(function)?;
    let code = output.code();
    let count = i32::try_from(args.len()).ok()?;
    let mut slots: HashMap<i32, i64> = (0..count)
        .map(|i| i - count)
        .zip(args.iter().copied())
        .collect();
    let mut stack: Vec<i64> = Vec::new();
    let mut pc = info.start;

    for _ in 0..10_000 {
        let instr = code.get(pc)?;
        pc += 1;
        match instr.opcode {
            Opcode::LoadC => stack.push(match instr.constant.as_ref()? {
                Constant::Integer(i) => *i,
                Constant::Bool(b) => i64::from(*b),
                _ => return None,
            }),
            Opcode::LoadS => stack.push(*slots.get(&instr.slot?)?),
            Opcode::LoadSD => stack.push(slots.remove(&instr.slot?)?),
            Opcode::StoreS => {
                let value = stack.pop()?;
                slots.insert(instr.slot?, value);
            }
            Opcode::DestroyS => {
                slots.remove(&instr.slot?)?;
            }
            Opcode::Pop => {
                stack.pop()?;
            }
            Opcode::Dup => {
                let top = *stack.last()?;
                stack.push(top);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::CmpLt => {
                let rhs = stack.pop()?;
                let lhs = stack.pop()?;
                stack.push(match instr.opcode {
                    Opcode::Add => lhs + rhs,
                    Opcode::Sub => lhs - rhs,
                    Opcode::Mul => lhs * rhs,
                    _ => i64::from(lhs < rhs),
                });
            }
            Opcode::Jump => pc = target(instr)?,
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                let condition = stack.pop()? != 0;
                if condition == (instr.opcode == Opcode::JumpIfTrue) {
                    pc = target(instr)?;
                }
            }
            Opcode::Return => return stack.pop(),
            _ => return None,
        }
        if stack.len() > info.max_stack as usize {
            return None;
        }
    }
    None
}

fn target(instr: &Instruction) -> Option<usize> {
    match instr.reference {
        Reference::Offset(offset) => Some(offset),
        _ => None,
    }
}

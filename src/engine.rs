use crate::instruction::{AddressMode, Instruction, Modifier, Opcode};
use crate::memory::{Core, WarriorId};

/// An execution cursor belonging to one warrior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Process {
    pub warrior: WarriorId,
    /// Always in `0..core_size`.
    pub pc: usize,
}

/// What the scheduler should do with the process that just executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionEffect {
    /// Continue at the given address.
    Advance(usize),
    /// The compared condition held; continue two instructions ahead.
    Skip(usize),
    /// The process dies (DAT or division by zero).
    Terminate,
    /// Continue at `next`, and start a new process at `new` if the warrior
    /// has room for it.
    Fork { next: usize, new: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    A,
    B,
}

#[inline(always)]
fn get(ins: &Instruction, field: Field) -> i64 {
    match field {
        Field::A => ins.a_value,
        Field::B => ins.b_value,
    }
}

#[inline(always)]
fn set(ins: &mut Instruction, field: Field, value: i64) {
    match field {
        Field::A => ins.a_value = value,
        Field::B => ins.b_value = value,
    }
}

/// (source field, destination field) pairs selected by a modifier.
/// `I` pairs like `F` for everything except whole-instruction MOV and SEQ/SNE.
fn field_pairs(modifier: Modifier) -> &'static [(Field, Field)] {
    match modifier {
        Modifier::A => &[(Field::A, Field::A)],
        Modifier::B => &[(Field::B, Field::B)],
        Modifier::AB => &[(Field::A, Field::B)],
        Modifier::BA => &[(Field::B, Field::A)],
        Modifier::F | Modifier::I => &[(Field::A, Field::A), (Field::B, Field::B)],
        Modifier::X => &[(Field::A, Field::B), (Field::B, Field::A)],
    }
}

/// Destination fields a modifier tests for JMZ, JMN and DJN.
fn tested_fields(modifier: Modifier) -> &'static [Field] {
    match modifier {
        Modifier::A | Modifier::BA => &[Field::A],
        Modifier::B | Modifier::AB => &[Field::B],
        Modifier::F | Modifier::X | Modifier::I => &[Field::A, Field::B],
    }
}

/// A resolved operand: read and write offsets relative to the executing
/// instruction, and a snapshot of the instruction at the read offset.
#[derive(Clone, Copy, Debug)]
struct Operand {
    read: usize,
    write: usize,
    ins: Instruction,
}

/// Resolve one operand, applying pre-decrement and post-increment side
/// effects to the pointer cell.
fn resolve(core: &mut Core, process: Process, mode: AddressMode, value: i64) -> Operand {
    let size = core.len() as i64;
    let pc = process.pc as i64;

    if mode == AddressMode::Immediate {
        return Operand {
            read: 0,
            write: 0,
            ins: core.read(pc),
        };
    }

    let value = core.normalize(value);
    let mut read = core.fold_read(value);
    let mut write = core.fold_write(value);

    let pointer = match mode {
        AddressMode::Immediate | AddressMode::Direct => None,
        AddressMode::AIndirect | AddressMode::APredecrement | AddressMode::APostincrement => {
            Some(Field::A)
        }
        AddressMode::BIndirect | AddressMode::BPredecrement | AddressMode::BPostincrement => {
            Some(Field::B)
        }
    };

    let mut post_increment = None;
    if let Some(field) = pointer {
        let pointer_addr = pc + write as i64;
        match mode {
            AddressMode::APredecrement | AddressMode::BPredecrement => {
                let mut cell = core.read(pointer_addr);
                let v = get(&cell, field);
                set(&mut cell, field, (v + size - 1) % size);
                core.write_by(pointer_addr, cell, process.warrior);
            }
            AddressMode::APostincrement | AddressMode::BPostincrement => {
                post_increment = Some((pointer_addr, field));
            }
            _ => {}
        }
        let via_read = get(&core.read(pc + read as i64), field);
        let via_write = get(&core.read(pointer_addr), field);
        read = core.fold_read(core.normalize(read as i64 + via_read));
        write = core.fold_write(core.normalize(write as i64 + via_write));
    }

    let ins = core.read(pc + read as i64);

    if let Some((addr, field)) = post_increment {
        let mut cell = core.read(addr);
        let v = get(&cell, field);
        set(&mut cell, field, (v + 1) % size);
        core.write_by(addr, cell, process.warrior);
    }

    Operand { read, write, ins }
}

/// Execute the instruction under `process.pc`.
///
/// The A-operand is evaluated first (with its pointer side effects) and the
/// instruction it designates is snapshotted, then the B-operand likewise, and
/// finally the opcode is applied. Process queues are never touched here: the
/// returned [`ExecutionEffect`] is applied by the scheduler.
pub fn step(process: Process, core: &mut Core) -> ExecutionEffect {
    let size = core.len() as i64;
    let pc = process.pc as i64;
    let ir = core.read(pc);

    let a = resolve(core, process, ir.a_mode, ir.a_value);
    let b = resolve(core, process, ir.b_mode, ir.b_value);

    let next = core.normalize(pc + 1);
    let skip = core.normalize(pc + 2);
    let jump = core.normalize(pc + a.read as i64);
    let target = pc + b.write as i64;

    match ir.opcode {
        Opcode::Dat => ExecutionEffect::Terminate,
        Opcode::Mov => {
            if ir.modifier == Modifier::I {
                core.write_by(target, a.ins, process.warrior);
            } else {
                let mut cell = core.read(target);
                for &(src, dst) in field_pairs(ir.modifier) {
                    set(&mut cell, dst, get(&a.ins, src));
                }
                core.write_by(target, cell, process.warrior);
            }
            ExecutionEffect::Advance(next)
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            let mut cell = core.read(target);
            let mut fault = false;
            let mut changed = false;
            for &(src, dst) in field_pairs(ir.modifier) {
                let x = get(&b.ins, dst);
                let y = get(&a.ins, src);
                let result = match ir.opcode {
                    Opcode::Add => Some((x + y) % size),
                    Opcode::Sub => Some((x + size - y) % size),
                    Opcode::Mul => Some((x * y) % size),
                    Opcode::Div => (y != 0).then(|| x / y),
                    _ => (y != 0).then(|| x % y),
                };
                match result {
                    Some(v) => {
                        set(&mut cell, dst, v);
                        changed = true;
                    }
                    None => fault = true,
                }
            }
            if changed {
                core.write_by(target, cell, process.warrior);
            }
            if fault {
                ExecutionEffect::Terminate
            } else {
                ExecutionEffect::Advance(next)
            }
        }
        Opcode::Jmp => ExecutionEffect::Advance(jump),
        Opcode::Jmz => {
            let zero = tested_fields(ir.modifier).iter().all(|&f| get(&b.ins, f) == 0);
            ExecutionEffect::Advance(if zero { jump } else { next })
        }
        Opcode::Jmn => {
            let nonzero = tested_fields(ir.modifier).iter().any(|&f| get(&b.ins, f) != 0);
            ExecutionEffect::Advance(if nonzero { jump } else { next })
        }
        Opcode::Djn => {
            let mut cell = core.read(target);
            let mut decremented = b.ins;
            for &f in tested_fields(ir.modifier) {
                let v = get(&cell, f);
                set(&mut cell, f, (v + size - 1) % size);
                let d = get(&decremented, f);
                set(&mut decremented, f, (d + size - 1) % size);
            }
            core.write_by(target, cell, process.warrior);
            let nonzero = tested_fields(ir.modifier)
                .iter()
                .any(|&f| get(&decremented, f) != 0);
            ExecutionEffect::Advance(if nonzero { jump } else { next })
        }
        Opcode::Spl => ExecutionEffect::Fork { next, new: jump },
        Opcode::Seq | Opcode::Sne => {
            let equal = if ir.modifier == Modifier::I {
                a.ins == b.ins
            } else {
                field_pairs(ir.modifier)
                    .iter()
                    .all(|&(src, dst)| get(&a.ins, src) == get(&b.ins, dst))
            };
            if equal == (ir.opcode == Opcode::Seq) {
                ExecutionEffect::Skip(skip)
            } else {
                ExecutionEffect::Advance(next)
            }
        }
        Opcode::Slt => {
            let less = field_pairs(ir.modifier)
                .iter()
                .all(|&(src, dst)| get(&a.ins, src) < get(&b.ins, dst));
            if less {
                ExecutionEffect::Skip(skip)
            } else {
                ExecutionEffect::Advance(next)
            }
        }
        Opcode::Nop => ExecutionEffect::Advance(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    const SIZE: usize = 8000;

    /// Load `src` at address 0 of a fresh core.
    fn core_with(src: &str) -> Core {
        let warrior = compile(src).expect("test warrior should compile");
        let mut core = Core::new(SIZE);
        core.load(0, &warrior.instructions, 0);
        core
    }

    fn run_at(core: &mut Core, pc: usize) -> ExecutionEffect {
        step(Process { warrior: 0, pc }, core)
    }

    #[test]
    fn test_dat_terminates() {
        let mut core = core_with("DAT #0, #0");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Terminate);
    }

    #[test]
    fn test_dat_still_evaluates_operands() {
        let mut core = core_with("DAT <1, #0\nDAT #0, #5");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Terminate);
        assert_eq!(core.read(1).b_value, 4);
    }

    #[test]
    fn test_imp_copies_itself() {
        let mut core = core_with("MOV.I 0, 1");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        assert_eq!(core.read(1), core.read(0));
        assert_eq!(core.writes_by(0), 1);
    }

    #[test]
    fn test_mov_field_modifiers() {
        let src = |m: &str| format!("MOV.{m} 1, 2\nDAT #3, #4\nDAT #7, #8");
        let expect = [("A", 3, 8), ("B", 7, 4), ("AB", 7, 3), ("BA", 4, 8), ("F", 3, 4), ("X", 4, 3)];
        for (m, a, b) in expect {
            let mut core = core_with(&src(m));
            run_at(&mut core, 0);
            let dst = core.read(2);
            assert_eq!((dst.a_value, dst.b_value), (a, b), "MOV.{m}");
            assert_eq!(dst.a_mode, AddressMode::Immediate);
        }
    }

    #[test]
    fn test_mov_immediate_source() {
        // MOV #5, 1 defaults to .AB and writes 5 into the target's B-field.
        let mut core = core_with("MOV #5, 1\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 5);
        assert_eq!(core.read(1).a_value, 0);
    }

    #[test]
    fn test_add_and_sub_wrap() {
        let mut core = core_with("ADD.AB #10, 1\nDAT #0, #7995");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 5);

        let mut core = core_with("SUB.AB #10, 1\nDAT #0, #3");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 7993);
    }

    #[test]
    fn test_add_f_and_x() {
        let mut core = core_with("ADD.F 1, 2\nDAT #1, #2\nDAT #10, #20");
        run_at(&mut core, 0);
        assert_eq!((core.read(2).a_value, core.read(2).b_value), (11, 22));

        let mut core = core_with("ADD.X 1, 2\nDAT #1, #2\nDAT #10, #20");
        run_at(&mut core, 0);
        assert_eq!((core.read(2).a_value, core.read(2).b_value), (12, 21));
    }

    #[test]
    fn test_mul_wraps() {
        let mut core = core_with("MUL.B 1, 2\nDAT #0, #100\nDAT #0, #100");
        run_at(&mut core, 0);
        assert_eq!(core.read(2).b_value, 10000 % 8000);
    }

    #[test]
    fn test_div_and_mod() {
        let mut core = core_with("DIV.B 1, 2\nDAT #0, #3\nDAT #0, #10");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        assert_eq!(core.read(2).b_value, 3);

        let mut core = core_with("MOD.B 1, 2\nDAT #0, #3\nDAT #0, #10");
        run_at(&mut core, 0);
        assert_eq!(core.read(2).b_value, 1);
    }

    #[test]
    fn test_division_by_zero_faults_process() {
        let mut core = core_with("DIV.B 1, 2\nDAT #0, #0\nDAT #0, #10");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Terminate);
        assert_eq!(core.read(2).b_value, 10);

        let mut core = core_with("MOD.AB #0, 1\nDAT #0, #10");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Terminate);
    }

    #[test]
    fn test_div_f_writes_nonzero_half_before_faulting() {
        let mut core = core_with("DIV.F 1, 2\nDAT #2, #0\nDAT #10, #10");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Terminate);
        assert_eq!((core.read(2).a_value, core.read(2).b_value), (5, 10));
    }

    #[test]
    fn test_jmp() {
        let mut core = core_with("JMP -1");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(SIZE - 1));
        let mut core = core_with("JMP 3");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(3));
    }

    #[test]
    fn test_jmz_jmn() {
        let mut core = core_with("JMZ 5, 1\nDAT #0, #0");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(5));
        let mut core = core_with("JMZ 5, 1\nDAT #0, #1");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        let mut core = core_with("JMN 5, 1\nDAT #0, #1");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(5));
        let mut core = core_with("JMN 5, 1\nDAT #0, #0");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
    }

    #[test]
    fn test_jmz_f_needs_both_zero() {
        let mut core = core_with("JMZ.F 5, 1\nDAT #1, #0");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        let mut core = core_with("JMN.F 5, 1\nDAT #1, #0");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(5));
    }

    #[test]
    fn test_djn_decrements_then_tests() {
        let mut core = core_with("DJN 5, 1\nDAT #0, #2");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(5));
        assert_eq!(core.read(1).b_value, 1);
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        assert_eq!(core.read(1).b_value, 0);
        // Zero wraps to core size - 1, which is non-zero.
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(5));
        assert_eq!(core.read(1).b_value, 7999);
    }

    #[test]
    fn test_spl_forks() {
        let mut core = core_with("SPL 3, 0");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Fork { next: 1, new: 3 });
    }

    #[test]
    fn test_seq_sne() {
        let mut core = core_with("SEQ.I 1, 2\nDAT #1, #2\nDAT #1, #2");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Skip(2));
        let mut core = core_with("SEQ.I 1, 2\nDAT #1, #2\nDAT $1, #2");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        let mut core = core_with("SNE.I 1, 2\nDAT #1, #2\nDAT $1, #2");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Skip(2));
        let mut core = core_with("CMP.F 1, 2\nDAT #1, #2\nDAT $1, #2");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Skip(2));
        let mut core = core_with("SEQ.X 1, 2\nDAT #1, #2\nDAT #2, #1");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Skip(2));
    }

    #[test]
    fn test_slt() {
        let mut core = core_with("SLT.AB #3, 1\nDAT #0, #4");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Skip(2));
        let mut core = core_with("SLT.AB #4, 1\nDAT #0, #4");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        // Negative numbers are large once normalized.
        let mut core = core_with("SLT.AB #-1, 1\nDAT #0, #4");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
    }

    #[test]
    fn test_nop() {
        let mut core = core_with("NOP");
        let before = core.cells().to_vec();
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));
        assert_eq!(core.cells(), &before[..]);
    }

    #[test]
    fn test_b_indirect() {
        // @1 goes to cell 1, then 2 further via its B-field: cell 3.
        let mut core = core_with("MOV.AB #9, @1\nDAT #0, #2\nDAT #0, #0\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(3).b_value, 9);
        assert_eq!(core.read(1).b_value, 2);
    }

    #[test]
    fn test_a_indirect() {
        let mut core = core_with("MOV.AB #9, *1\nDAT #1, #0\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(2).b_value, 9);
    }

    #[test]
    fn test_predecrement_mutates_before_dereference() {
        // <1: cell 1's B-field goes 3 -> 2, then the target is 1 + 2 = 3.
        let mut core = core_with("MOV.AB #9, <1\nDAT #0, #3\nDAT #0, #0\nDAT #0, #0\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 2);
        assert_eq!(core.read(3).b_value, 9);
        assert_eq!(core.read(4).b_value, 0);
    }

    #[test]
    fn test_predecrement_wraps_zero() {
        let mut core = core_with("DAT #0, <1\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 7999);
    }

    #[test]
    fn test_postincrement_mutates_after_dereference() {
        // >1: target is 1 + 1 = 2, then cell 1's B-field goes 1 -> 2.
        let mut core = core_with("MOV.AB #9, >1\nDAT #0, #1\nDAT #0, #0\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 2);
        assert_eq!(core.read(2).b_value, 9);
        assert_eq!(core.read(3).b_value, 0);
    }

    #[test]
    fn test_a_field_pre_and_post() {
        let mut core = core_with("MOV.AB #9, {1\nDAT #3, #0\nDAT #0, #0\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).a_value, 2);
        assert_eq!(core.read(3).b_value, 9);

        let mut core = core_with("MOV.AB #9, }1\nDAT #1, #0\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).a_value, 2);
        assert_eq!(core.read(2).b_value, 9);
    }

    #[test]
    fn test_a_operand_side_effects_precede_b() {
        // Both operands post-increment the same pointer: A sees 1, B sees 2.
        let mut core = core_with("MOV.I >1, >1\nDAT #0, #1\nDAT #5, #5\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1).b_value, 3);
        assert_eq!(core.read(3), core.read(2));
    }

    #[test]
    fn test_immediate_operand_is_current_instruction() {
        let mut core = core_with("MOV.I #0, 1\nDAT #0, #0");
        run_at(&mut core, 0);
        assert_eq!(core.read(1), core.read(0));
    }

    #[test]
    fn test_read_limit_folds_reads() {
        let warrior = compile("MOV.I 7000, 1").unwrap();
        let mut core = Core::new(SIZE).with_limits(2000, 2000);
        core.load(100, &warrior.instructions, 0);
        let marker = compile("DAT #42, #42").unwrap().instructions[0];
        // Inside a 2000-cell window, 7000 folds to 1000.
        assert_eq!(core.fold_read(7000), 1000);
        core.write(1100, marker);
        run_at(&mut core, 100);
        assert_eq!(core.read(101), marker);
    }

    #[test]
    fn test_write_limit_folds_writes() {
        let far = compile("MOV.I 0, 7000").unwrap().instructions[0];
        let near = compile("MOV.I 0, -10").unwrap().instructions[0];
        let mut core = Core::new(SIZE).with_limits(SIZE, 2000);
        core.write(100, far);
        core.write(500, near);

        // 7000 lies outside the 2000-cell write window and folds to 1000.
        run_at(&mut core, 100);
        assert_eq!(core.read(1100), core.read(100));
        assert_eq!(core.read(7100), Instruction::default());

        // -10 is already inside the window.
        run_at(&mut core, 500);
        assert_eq!(core.read(490), core.read(500));
    }

    #[test]
    fn test_slt_x_crosses_fields() {
        // A = (3, 9), B = (5, 4): 3 < 4 holds but 9 < 5 does not.
        let mut core = core_with("SLT.X 1, 2\nDAT #3, #9\nDAT #5, #4");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Advance(1));

        // A = (3, 9), B = (10, 4): 3 < 4 and 9 < 10.
        let mut core = core_with("SLT.X 1, 2\nDAT #3, #9\nDAT #10, #4");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Skip(2));
    }

    #[test]
    fn test_faulted_division_leaves_target_untouched() {
        let mut core = core_with("DIV.AB #0, 1");
        assert_eq!(run_at(&mut core, 0), ExecutionEffect::Terminate);
        assert_eq!(core.read(1), Instruction::default());
        assert_eq!(core.writes_by(0), 0);
        assert_eq!(core.owner(1), None);
    }
}

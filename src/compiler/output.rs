//! Linked output of a module.

use std::{collections::BTreeMap, fmt};

use crate::{assembly::Instruction, compiler::DebugRecord, il::SourcePosition};

/// Layout facts of one linked function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Function name.
    pub name: String,
    /// Offset of the first instruction.
    pub start: usize,
    /// Offset one past the last instruction.
    pub end: usize,
    /// Non-argument frame slots.
    pub frame_size: u32,
    /// Number of arguments.
    pub parameter_count: usize,
    /// Deepest evaluation stack reached.
    pub max_stack: u32,
}

/// An instruction range whose exceptions transfer control to `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRange {
    /// First covered offset.
    pub start: usize,
    /// One past the last covered offset.
    pub end: usize,
    /// Offset of the handler block.
    pub handler: usize,
}

/// Flat instruction stream of a module with its side tables.
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    pub(crate) code: Vec<Instruction>,
    pub(crate) functions: Vec<FunctionInfo>,
    pub(crate) symbols: BTreeMap<String, usize>,
    pub(crate) debug_records: Vec<DebugRecord>,
    pub(crate) line_table: Vec<(usize, SourcePosition)>,
    pub(crate) handlers: Vec<HandlerRange>,
}

impl CompiledModule {
    /// All instructions; jump targets are absolute offsets into this slice.
    #[must_use]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Linked functions in compilation order.
    #[must_use]
    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The instructions of the function `name`.
    #[must_use]
    pub fn instructions_of(&self, name: &str) -> Option<&[Instruction]> {
        self.function(name)
            .and_then(|f| self.code.get(f.start..f.end))
    }

    /// Entry offset of the symbol `name`.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    /// Symbol table, sorted by name.
    #[must_use]
    pub fn symbols(&self) -> &BTreeMap<String, usize> {
        &self.symbols
    }

    /// Debug location records, sorted by offset.
    #[must_use]
    pub fn debug_records(&self) -> &[DebugRecord] {
        &self.debug_records
    }

    /// Debug location records taking effect at `offset`.
    pub fn debug_records_at(&self, offset: usize) -> impl Iterator<Item = &DebugRecord> {
        self.debug_records.iter().filter(move |r| r.offset == offset)
    }

    /// Offsets where the source position changes.
    #[must_use]
    pub fn line_table(&self) -> &[(usize, SourcePosition)] {
        &self.line_table
    }

    /// Exception handler ranges in layout order.
    #[must_use]
    pub fn handlers(&self) -> &[HandlerRange] {
        &self.handlers
    }

    /// Source position of the instruction at `offset`.
    #[must_use]
    pub fn position_at(&self, offset: usize) -> Option<SourcePosition> {
        let index = self.line_table.partition_point(|&(at, _)| at <= offset);
        index.checked_sub(1).map(|i| self.line_table[i].1)
    }
}

impl fmt::Display for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in &self.functions {
            writeln!(
                f,
                "{}: params={} frame={} stack={}",
                func.name, func.parameter_count, func.frame_size, func.max_stack
            )?;
            for offset in func.start..func.end {
                let instr = &self.code[offset];
                write!(f, "  {offset:04}  {instr}")?;
                let mut first = true;
                for record in self.debug_records_at(offset) {
                    write!(f, "{}{record}", if first { "    ; " } else { ", " })?;
                    first = false;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Opcode;

    fn sample() -> CompiledModule {
        let mut output = CompiledModule::default();
        output.code = vec![
            Instruction::new(Opcode::Return),
            Instruction::new(Opcode::Nop),
            Instruction::new(Opcode::Return),
        ];
        output.functions = vec![
            FunctionInfo {
                name: "A".to_string(),
                start: 0,
                end: 1,
                frame_size: 0,
                parameter_count: 0,
                max_stack: 0,
            },
            FunctionInfo {
                name: "B".to_string(),
                start: 1,
                end: 3,
                frame_size: 0,
                parameter_count: 0,
                max_stack: 0,
            },
        ];
        output.symbols.insert("A".to_string(), 0);
        output.symbols.insert("B".to_string(), 1);
        output.line_table = vec![
            (0, SourcePosition::new(1, 1)),
            (2, SourcePosition::new(7, 3)),
        ];
        output
    }

    #[test]
    fn test_position_lookup() {
        let output = sample();
        assert_eq!(output.position_at(0), Some(SourcePosition::new(1, 1)));
        assert_eq!(output.position_at(1), Some(SourcePosition::new(1, 1)));
        assert_eq!(output.position_at(2), Some(SourcePosition::new(7, 3)));
        assert_eq!(output.position_at(9), Some(SourcePosition::new(7, 3)));
        assert_eq!(CompiledModule::default().position_at(0), None);
    }

    #[test]
    fn test_function_lookup() {
        let output = sample();
        assert_eq!(output.instructions_of("B").map(<[Instruction]>::len), Some(2));
        assert_eq!(output.symbol("B"), Some(1));
        assert!(output.instructions_of("C").is_none());
        assert!(output.to_string().starts_with("A: params=0 frame=0 stack=0"));
    }
}

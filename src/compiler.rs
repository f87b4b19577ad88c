use std::collections::HashMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instruction::{AddressMode, Instruction, Modifier, Opcode};

/// Nesting limit when expanding `EQU` constants that refer to each other.
const MAX_EQU_DEPTH: usize = 32;

/// A compiled warrior, immutable and reusable across battles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warrior {
    pub name: String,
    pub author: String,
    /// Accumulated `;strategy` lines, newline separated.
    pub strategy: String,
    pub instructions: Vec<Instruction>,
    /// Index of the entry instruction.
    pub start: usize,
}

impl Default for Warrior {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            author: "Unknown".to_string(),
            strategy: String::new(),
            instructions: Vec::new(),
            start: 0,
        }
    }
}

impl Warrior {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Render the warrior as canonical Redcode that compiles back to the same
    /// instructions and entry point.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, ";redcode-94");
        let _ = writeln!(out, ";name {}", self.name);
        let _ = writeln!(out, ";author {}", self.author);
        for line in self.strategy.lines() {
            let _ = writeln!(out, ";strategy {line}");
        }
        out.push('\n');
        for ins in &self.instructions {
            let _ = writeln!(out, "{ins}");
        }
        if self.start != 0 {
            let _ = writeln!(out, "ORG {}", self.start);
        }
        out
    }
}

/// A compilation failure. `line` is 1-indexed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseErrorKind {
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),

    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),

    #[error("malformed operand `{0}`")]
    MalformedOperand(String),

    #[error("missing operand")]
    MissingOperand,

    #[error("too many operands")]
    TooManyOperands,

    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),

    #[error("undefined label `{0}`")]
    UndefinedLabel(String),

    #[error("EQU `{0}` nests too deeply or refers to itself")]
    RecursiveEqu(String),

    #[error("entry point {0} lies outside the program")]
    OriginOutOfRange(i64),

    #[error("program has no instructions")]
    Empty,
}

fn err(line: usize, kind: ParseErrorKind) -> ParseError {
    ParseError { line, kind }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Term {
    Number(i64),
    Symbol(String),
}

/// A signed sum of terms, e.g. `loop-2` or `-step+1`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Expr {
    terms: Vec<(i64, Term)>,
}

#[derive(Clone, Debug)]
struct Operand {
    mode: AddressMode,
    expr: Expr,
}

#[derive(Debug)]
struct PendingInstruction {
    line: usize,
    opcode: Opcode,
    modifier: Option<Modifier>,
    a: Operand,
    b: Operand,
}

/// Symbols collected during pass one.
#[derive(Default)]
struct SymbolTable {
    labels: HashMap<String, usize>,
    equs: HashMap<String, Expr>,
}

impl SymbolTable {
    fn is_defined(&self, name: &str) -> bool {
        self.labels.contains_key(name) || self.equs.contains_key(name)
    }

    /// Evaluate `expr` as seen from the instruction at `current`.
    fn eval(&self, expr: &Expr, current: usize, line: usize, depth: usize) -> Result<i64, ParseError> {
        let mut total: i64 = 0;
        for (sign, term) in &expr.terms {
            let value = match term {
                Term::Number(n) => *n,
                Term::Symbol(name) => {
                    if let Some(&target) = self.labels.get(name) {
                        target as i64 - current as i64
                    } else if let Some(inner) = self.equs.get(name) {
                        if depth >= MAX_EQU_DEPTH {
                            return Err(err(line, ParseErrorKind::RecursiveEqu(name.clone())));
                        }
                        self.eval(inner, current, line, depth + 1)?
                    } else {
                        return Err(err(line, ParseErrorKind::UndefinedLabel(name.clone())));
                    }
                }
            };
            total = total.wrapping_add(sign.wrapping_mul(value));
        }
        Ok(total)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pseudo {
    Org,
    End,
    Equ,
}

fn pseudo_op(word: &str) -> Option<Pseudo> {
    match word.to_ascii_uppercase().as_str() {
        "ORG" => Some(Pseudo::Org),
        "END" => Some(Pseudo::End),
        "EQU" => Some(Pseudo::Equ),
        _ => None,
    }
}

/// True if `word` starts a statement: an opcode (with optional `.MOD`) or a
/// pseudo-op.
fn is_keyword(word: &str) -> bool {
    let mnemonic = word.split('.').next().unwrap_or(word);
    Opcode::from_mnemonic(mnemonic).is_some() || pseudo_op(word).is_some()
}

fn parse_expr(text: &str, line: usize) -> Result<Expr, ParseError> {
    let malformed = || err(line, ParseErrorKind::MalformedOperand(text.trim().to_string()));
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut terms = Vec::new();
    let mut expect_term = true;
    let mut sign: i64 = 1;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '+' || c == '-' {
            if c == '-' {
                sign = -sign;
            }
            expect_term = true;
            i += 1;
            continue;
        }
        if !expect_term {
            return Err(malformed());
        }
        let start = i;
        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            let n: i64 = text[start..i].parse().map_err(|_| malformed())?;
            terms.push((sign, Term::Number(n)));
        } else if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            terms.push((sign, Term::Symbol(text[start..i].to_string())));
        } else {
            return Err(malformed());
        }
        sign = 1;
        expect_term = false;
    }

    if expect_term {
        return Err(malformed());
    }
    Ok(Expr { terms })
}

fn parse_operand(text: &str, line: usize) -> Result<Operand, ParseError> {
    let text = text.trim();
    let mut chars = text.chars();
    let (mode, rest) = match chars.next().and_then(AddressMode::from_symbol) {
        Some(mode) => (mode, chars.as_str()),
        None => (AddressMode::Direct, text),
    };
    if rest.trim().is_empty() {
        return Err(err(line, ParseErrorKind::MalformedOperand(text.to_string())));
    }
    let expr = parse_expr(rest, line)?;
    Ok(Operand { mode, expr })
}

fn zero_operand(mode: AddressMode) -> Operand {
    Operand {
        mode,
        expr: Expr {
            terms: vec![(1, Term::Number(0))],
        },
    }
}

/// Split `text` into the head word and the remainder.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim()),
        None => (text, ""),
    }
}

/// Pass-one state.
struct Assembler {
    warrior: Warrior,
    symbols: SymbolTable,
    pending: Vec<PendingInstruction>,
    /// Labels waiting for the next instruction.
    dangling: Vec<String>,
    /// Entry point expression and the line it appeared on.
    origin: Option<(Expr, usize)>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            warrior: Warrior::default(),
            symbols: SymbolTable::default(),
            pending: Vec::new(),
            dangling: Vec::new(),
            origin: None,
        }
    }

    fn metadata(&mut self, comment: &str) {
        let body = comment.trim_start_matches(';');
        let (key, value) = split_word(body);
        match key.to_ascii_lowercase().as_str() {
            "name" => self.warrior.name = value.to_string(),
            "author" => self.warrior.author = value.to_string(),
            "strategy" => {
                if !self.warrior.strategy.is_empty() {
                    self.warrior.strategy.push('\n');
                }
                self.warrior.strategy.push_str(value);
            }
            _ => {}
        }
    }

    fn define(&mut self, name: String, line: usize) -> Result<(), ParseError> {
        if self.symbols.is_defined(&name) || self.dangling.contains(&name) {
            return Err(err(line, ParseErrorKind::DuplicateLabel(name)));
        }
        self.dangling.push(name);
        Ok(())
    }

    /// Handle one source line. Returns `false` once `END` is reached.
    fn line(&mut self, raw: &str, line: usize) -> Result<bool, ParseError> {
        let trimmed = raw.trim();
        if trimmed.starts_with(';') {
            self.metadata(trimmed);
            return Ok(true);
        }
        let code = match trimmed.find(';') {
            Some(i) => trimmed[..i].trim(),
            None => trimmed,
        };
        if code.is_empty() {
            return Ok(true);
        }

        let (first, rest) = split_word(code);
        let (word, rest) = if is_keyword(first) {
            (first, rest)
        } else {
            let label = first.strip_suffix(':').unwrap_or(first);
            let (next, after) = split_word(rest);
            if !is_identifier(label) || (!next.is_empty() && !is_keyword(next)) {
                return Err(err(line, ParseErrorKind::UnknownOpcode(first.to_string())));
            }
            self.define(label.to_string(), line)?;
            if next.is_empty() {
                return Ok(true);
            }
            (next, after)
        };

        if let Some(pseudo) = pseudo_op(word) {
            return self.pseudo(pseudo, rest, line);
        }
        self.instruction(word, rest, line)?;
        Ok(true)
    }

    fn pseudo(&mut self, pseudo: Pseudo, rest: &str, line: usize) -> Result<bool, ParseError> {
        match pseudo {
            Pseudo::Org => {
                if rest.is_empty() {
                    return Err(err(line, ParseErrorKind::MissingOperand));
                }
                self.origin = Some((parse_expr(rest, line)?, line));
                Ok(true)
            }
            Pseudo::End => {
                if !rest.is_empty() {
                    self.origin = Some((parse_expr(rest, line)?, line));
                }
                Ok(false)
            }
            Pseudo::Equ => {
                if self.dangling.is_empty() {
                    return Err(err(line, ParseErrorKind::UnknownOpcode("EQU".to_string())));
                }
                if rest.is_empty() {
                    return Err(err(line, ParseErrorKind::MissingOperand));
                }
                let expr = parse_expr(rest, line)?;
                for name in self.dangling.drain(..) {
                    self.symbols.equs.insert(name, expr.clone());
                }
                Ok(true)
            }
        }
    }

    fn instruction(&mut self, word: &str, rest: &str, line: usize) -> Result<(), ParseError> {
        let (mnemonic, modifier) = match word.split_once('.') {
            Some((m, modifier)) => (m, Some(modifier)),
            None => (word, None),
        };
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| err(line, ParseErrorKind::UnknownOpcode(word.to_string())))?;
        let modifier = match modifier {
            Some(m) => Some(
                Modifier::from_mnemonic(m)
                    .ok_or_else(|| err(line, ParseErrorKind::UnknownModifier(m.to_string())))?,
            ),
            None => None,
        };

        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').collect()
        };
        let (a, b) = match operands.as_slice() {
            [] if opcode == Opcode::Nop => (
                zero_operand(AddressMode::Direct),
                zero_operand(AddressMode::Direct),
            ),
            [] => return Err(err(line, ParseErrorKind::MissingOperand)),
            [single] if opcode == Opcode::Dat => (
                zero_operand(AddressMode::Immediate),
                parse_operand(single, line)?,
            ),
            [single] => (parse_operand(single, line)?, zero_operand(AddressMode::Direct)),
            [a, b] => (parse_operand(a, line)?, parse_operand(b, line)?),
            _ => return Err(err(line, ParseErrorKind::TooManyOperands)),
        };

        let index = self.pending.len();
        for name in self.dangling.drain(..) {
            self.symbols.labels.insert(name, index);
        }
        self.pending.push(PendingInstruction {
            line,
            opcode,
            modifier,
            a,
            b,
        });
        Ok(())
    }

    /// Pass two: resolve every operand and the entry point.
    fn finish(mut self, last_line: usize) -> Result<Warrior, ParseError> {
        if self.pending.is_empty() {
            return Err(err(last_line.max(1), ParseErrorKind::Empty));
        }
        // Trailing labels refer to the slot just past the program.
        let end = self.pending.len();
        for name in self.dangling.drain(..) {
            self.symbols.labels.insert(name, end);
        }

        let mut instructions = Vec::with_capacity(self.pending.len());
        for (index, p) in self.pending.iter().enumerate() {
            let a_value = self.symbols.eval(&p.a.expr, index, p.line, 0)?;
            let b_value = self.symbols.eval(&p.b.expr, index, p.line, 0)?;
            let modifier = p
                .modifier
                .unwrap_or_else(|| Modifier::default_for(p.opcode, p.a.mode, p.b.mode));
            instructions.push(Instruction::new(
                p.opcode,
                modifier,
                (p.a.mode, a_value),
                (p.b.mode, b_value),
            ));
        }

        let start = match &self.origin {
            Some((expr, line)) => {
                let origin = self.symbols.eval(expr, 0, *line, 0)?;
                if origin < 0 || origin as usize >= instructions.len() {
                    return Err(err(*line, ParseErrorKind::OriginOutOfRange(origin)));
                }
                origin as usize
            }
            None => 0,
        };

        self.warrior.instructions = instructions;
        self.warrior.start = start;
        Ok(self.warrior)
    }
}

/// Compile Redcode source into a [`Warrior`].
///
/// Pass one splits the source into statements, collects metadata comments and
/// records label and `EQU` definitions. Pass two evaluates every operand,
/// turning label references into offsets relative to the instruction that
/// uses them. Values stay un-normalized: core size is a battle parameter, so
/// reduction happens when a warrior is loaded.
///
/// Compilation is all-or-nothing: the first error aborts it.
pub fn compile(source: &str) -> Result<Warrior, ParseError> {
    let mut asm = Assembler::new();
    let mut last_line = 0;
    for (i, raw) in source.lines().enumerate() {
        last_line = i + 1;
        if !asm.line(raw, last_line)? {
            break;
        }
    }
    asm.finish(last_line)
}

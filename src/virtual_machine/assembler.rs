//! Assembly language parser and bytecode compiler.
//!
//! Converts human-readable assembly source into an executable program.
//! Uses [`for_each_instruction!`](for_each_instruction) to generate the
//! mnemonic lookup, so the assembler always agrees with the interpreter.
//!
//! # Syntax
//!
//! ```text
//! 100 "0a0b"x [1 verify] {1, 2} add   # comment
//! ```
//!
//! - Mnemonics are lowercase (e.g. `add`, `checksig`)
//! - Decimal integers (e.g. `42`, `-1`) push their canonical encoding
//! - `"<hex>"x` pushes raw bytes
//! - `[ ... ]` assembles a nested program and pushes it as bytes
//! - `{ a, b, ... }` pushes each field, then builds the tuple
//! - `$name` defines a label; `jump:$name` and `jumpif:$name` jump to it
//! - Macros: `bool`, `verify`, `jump`, `swap`, `dup`, `over`, `max`, `min`
//! - Comments start with `#`; commas are whitespace

use crate::for_each_instruction;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, SMALL_INT_BASE};
use crate::virtual_machine::item::Item;
use std::collections::HashMap;
use std::fmt::Write;

const COMMENT_CHAR: char = '#';
const LABEL_PREFIX: char = '$';
const JUMP_PREFIX: &str = "jump:";
const JUMPIF_PREFIX: &str = "jumpif:";

/// Fixed macro expansions, themselves written in assembly.
///
/// `jump` expects the offset on the stack; `verify` fails unless the top
/// item is nonzero. `max` and `min` skip the three-byte `swap`.
const MACROS: &[(&str, &str)] = &[
    ("bool", "not not"),
    ("verify", "1 jumpif fail"),
    ("jump", "1 swap jumpif"),
    ("swap", "0 1 roll"),
    ("dup", "0 0 peek"),
    ("over", "0 1 peek"),
    ("max", "over over gt 3 jumpif swap drop"),
    ("min", "over over swap gt 3 jumpif swap drop"),
];

macro_rules! define_mnemonic_lookup {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $cost:expr
        ),* $(,)?
    ) => {
        /// Resolves an instruction mnemonic.
        fn instruction_from_mnemonic(name: &str) -> Option<Instruction> {
            match name {
                $( $mnemonic => Some(Instruction::$name), )*
                _ => None,
            }
        }
    };
}

for_each_instruction!(define_mnemonic_lookup);

fn macro_expansion(name: &str) -> Option<&'static str> {
    MACROS
        .iter()
        .find(|(macro_name, _)| *macro_name == name)
        .map(|(_, expansion)| *expansion)
}

/// Formats a compiler-style diagnostic for assembly failures.
///
/// Errors without a source location render as a single `error:` line.
pub fn render_diagnostic(file: &str, source: &str, err: &VMError) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {err}");
    let Some((line, offset)) = err.location() else {
        return diag;
    };
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind<'a> {
    Int(i64),
    Hex(Vec<u8>),
    Open(char),
    Close(char),
    Label(&'a str),
    Jump { conditional: bool, label: &'a str },
    Word(&'a str),
}

#[derive(Debug, Clone)]
struct Token<'a> {
    kind: TokenKind<'a>,
    line: usize,
    /// 1-based column offset in the line.
    offset: usize,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | COMMENT_CHAR | '[' | ']' | '{' | '}' | '"')
}

/// Tokenizer over a whole source text.
///
/// Groups may span lines, so unlike a line-oriented tokenizer this one
/// tracks the line and column itself.
struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == COMMENT_CHAR {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else if c.is_whitespace() || c == ',' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, VMError> {
        self.skip_trivia();
        let (line, offset, start) = (self.line, self.col, self.pos);
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let kind = match c {
            '[' | '{' => {
                self.bump();
                TokenKind::Open(c)
            }
            ']' | '}' => {
                self.bump();
                TokenKind::Close(c)
            }
            '"' => self.hex_literal(line, offset)?,
            _ => {
                while self.peek().is_some_and(|c| !is_delimiter(c)) {
                    self.bump();
                }
                let src = self.src;
                classify(&src[start..self.pos], line, offset)?
            }
        };
        Ok(Some(Token { kind, line, offset }))
    }

    /// Reads `"<hex>"x`; the opening quote has not been consumed yet.
    fn hex_literal(&mut self, line: usize, offset: usize) -> Result<TokenKind<'a>, VMError> {
        let start = self.pos;
        self.bump();
        let body_start = self.pos;
        loop {
            match self.peek() {
                None => {
                    return Err(VMError::UnterminatedProgram {
                        open: '"',
                        line,
                        offset,
                    });
                }
                Some('"') => break,
                Some(_) => {
                    self.bump();
                }
            }
        }
        let body = &self.src[body_start..self.pos];
        self.bump();
        while self.peek().is_some_and(|c| !is_delimiter(c)) {
            self.bump();
        }
        let token = &self.src[start..self.pos];
        let bad = || VMError::BadHexLiteral {
            token: token.to_string(),
            line,
            offset,
        };
        if !token.ends_with("\"x") || token.len() != body.len() + 3 {
            return Err(bad());
        }
        hex::decode(body).map(TokenKind::Hex).map_err(|_| bad())
    }
}

fn classify(text: &str, line: usize, offset: usize) -> Result<TokenKind<'_>, VMError> {
    let bad = || VMError::BadMnemonic {
        token: text.to_string(),
        line,
        offset,
    };

    if let Some(name) = text.strip_prefix(LABEL_PREFIX) {
        return if is_label_name(name) {
            Ok(TokenKind::Label(name))
        } else {
            Err(bad())
        };
    }

    let jump = text
        .strip_prefix(JUMPIF_PREFIX)
        .map(|rest| (true, rest))
        .or_else(|| text.strip_prefix(JUMP_PREFIX).map(|rest| (false, rest)));
    if let Some((conditional, rest)) = jump {
        return match rest.strip_prefix(LABEL_PREFIX) {
            Some(label) if is_label_name(label) => Ok(TokenKind::Jump { conditional, label }),
            _ => Err(bad()),
        };
    }

    let mut chars = text.chars();
    let numeric = match chars.next() {
        Some('-' | '+') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        Some(c) => c.is_ascii_digit(),
        None => false,
    };
    if numeric {
        return text.parse::<i64>().map(TokenKind::Int).map_err(|_| bad());
    }

    Ok(TokenKind::Word(text))
}

fn is_label_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parsed assembly, before layout.
#[derive(Debug, Clone)]
enum Node<'a> {
    Int(i64),
    Bytes(Vec<u8>),
    Program(Vec<Node<'a>>),
    Tuple(Vec<Node<'a>>),
    Word {
        name: &'a str,
        line: usize,
        offset: usize,
    },
    /// Zero-width marker a label points at.
    Label {
        name: &'a str,
        line: usize,
        offset: usize,
    },
    Jump {
        conditional: bool,
        label: &'a str,
        line: usize,
        offset: usize,
    },
}

/// Parses nodes until the matching close of `open`, or end of input.
fn parse_group<'a>(
    lexer: &mut Lexer<'a>,
    open: Option<(char, usize, usize)>,
) -> Result<Vec<Node<'a>>, VMError> {
    let mut nodes = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        let node = match tok.kind {
            TokenKind::Int(v) => Node::Int(v),
            TokenKind::Hex(bytes) => Node::Bytes(bytes),
            TokenKind::Open(c) => {
                let inner = parse_group(lexer, Some((c, tok.line, tok.offset)))?;
                if c == '[' {
                    Node::Program(inner)
                } else {
                    Node::Tuple(inner)
                }
            }
            TokenKind::Close(c) => {
                return match open {
                    Some(('[', ..)) if c == ']' => Ok(nodes),
                    Some(('{', ..)) if c == '}' => Ok(nodes),
                    _ => Err(VMError::BadMnemonic {
                        token: c.to_string(),
                        line: tok.line,
                        offset: tok.offset,
                    }),
                };
            }
            TokenKind::Label(name) => Node::Label {
                name,
                line: tok.line,
                offset: tok.offset,
            },
            TokenKind::Jump { conditional, label } => Node::Jump {
                conditional,
                label,
                line: tok.line,
                offset: tok.offset,
            },
            TokenKind::Word(name) => Node::Word {
                name,
                line: tok.line,
                offset: tok.offset,
            },
        };
        nodes.push(node);
    }

    match open {
        Some((open, line, offset)) => Err(VMError::UnterminatedProgram { open, line, offset }),
        None => Ok(nodes),
    }
}

/// A program segment whose size may depend on label layout.
enum Piece<'a> {
    Code(Vec<u8>),
    /// Zero-width marker a label points at.
    Label,
    Jump {
        conditional: bool,
        label: &'a str,
        line: usize,
        offset: usize,
    },
}

/// Assembly context for label tracking within one (sub)program.
struct AsmContext<'a> {
    pieces: Vec<Piece<'a>>,
    /// Label definitions mapping names to piece indices.
    labels: HashMap<&'a str, usize>,
}

impl<'a> AsmContext<'a> {
    fn new() -> Self {
        Self {
            pieces: Vec::new(),
            labels: HashMap::new(),
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        match self.pieces.last_mut() {
            Some(Piece::Code(code)) => code.extend_from_slice(bytes),
            _ => self.pieces.push(Piece::Code(bytes.to_vec())),
        }
    }

    /// Registers a label at the current piece position.
    fn define_label(&mut self, name: &'a str, line: usize, offset: usize) -> Result<(), VMError> {
        if self.labels.contains_key(name) {
            return Err(VMError::DuplicateLabel {
                label: name.to_string(),
                line,
                offset,
            });
        }
        self.labels.insert(name, self.pieces.len());
        self.pieces.push(Piece::Label);
        Ok(())
    }

    /// Lowers one node into pieces.
    fn lower(&mut self, node: &Node<'a>) -> Result<(), VMError> {
        match node {
            Node::Int(v) => self.emit(&Item::Int(*v).encode()),
            Node::Bytes(b) => self.emit(&Item::from(b.as_slice()).encode()),
            Node::Program(inner) => {
                let code = assemble_nodes(inner)?;
                self.emit(&Item::from(code.as_slice()).encode());
            }
            Node::Tuple(fields) => {
                for field in fields {
                    if let Node::Label { name, line, offset }
                    | Node::Jump {
                        label: name,
                        line,
                        offset,
                        ..
                    } = field
                    {
                        return Err(VMError::BadMnemonic {
                            token: format!("{LABEL_PREFIX}{name}"),
                            line: *line,
                            offset: *offset,
                        });
                    }
                    self.lower(field)?;
                }
                self.emit(&Item::Int(fields.len() as i64).encode());
                self.emit(&[Instruction::Tuple as u8]);
            }
            Node::Word { name, line, offset } => {
                if let Some(instr) = instruction_from_mnemonic(name) {
                    self.emit(&[instr as u8]);
                } else if let Some(expansion) = macro_expansion(name) {
                    self.emit(&assemble(expansion)?);
                } else {
                    return Err(VMError::BadMnemonic {
                        token: name.to_string(),
                        line: *line,
                        offset: *offset,
                    });
                }
            }
            Node::Label { name, line, offset } => self.define_label(*name, *line, *offset)?,
            Node::Jump {
                conditional,
                label,
                line,
                offset,
            } => self.pieces.push(Piece::Jump {
                conditional: *conditional,
                label: *label,
                line: *line,
                offset: *offset,
            }),
        }
        Ok(())
    }

    /// Resolves label jumps and emits the final bytes.
    ///
    /// Jump offsets are relative to the end of the `jumpif`, and their
    /// encoded size depends on their value. Layout starts with every offset
    /// at zero and repeats until no offset changes. Offsets only grow in
    /// magnitude between passes, so this terminates.
    fn finish(self) -> Result<Vec<u8>, VMError> {
        let mut targets = Vec::new();
        for piece in &self.pieces {
            if let Piece::Jump {
                label, line, offset, ..
            } = piece
            {
                let idx = self
                    .labels
                    .get(label)
                    .copied()
                    .ok_or(VMError::UndefinedLabel {
                        label: label.to_string(),
                        line: *line,
                        offset: *offset,
                    })?;
                targets.push(idx);
            }
        }

        let mut offsets = vec![0i64; targets.len()];
        loop {
            let mut starts = Vec::with_capacity(self.pieces.len());
            let mut ends = Vec::with_capacity(targets.len());
            let mut pos = 0usize;
            let mut jump = 0usize;
            for piece in &self.pieces {
                starts.push(pos);
                match piece {
                    Piece::Code(code) => pos += code.len(),
                    Piece::Label => {}
                    Piece::Jump { conditional, .. } => {
                        pos += jump_code(*conditional, offsets[jump]).len();
                        ends.push(pos);
                        jump += 1;
                    }
                }
            }

            let resolved: Vec<i64> = targets
                .iter()
                .zip(&ends)
                .map(|(target, end)| starts[*target] as i64 - *end as i64)
                .collect();
            if resolved == offsets {
                break;
            }
            offsets = resolved;
        }

        let mut out = Vec::new();
        let mut jump = 0usize;
        for piece in &self.pieces {
            match piece {
                Piece::Code(code) => out.extend_from_slice(code),
                Piece::Label => {}
                Piece::Jump { conditional, .. } => {
                    out.extend(jump_code(*conditional, offsets[jump]));
                    jump += 1;
                }
            }
        }
        Ok(out)
    }
}

/// `[1] offset jumpif`; the unconditional form pushes its own condition.
fn jump_code(conditional: bool, offset: i64) -> Vec<u8> {
    let mut code = Vec::new();
    if !conditional {
        code.push(SMALL_INT_BASE + 1);
    }
    code.extend(Item::Int(offset).encode());
    code.push(Instruction::JumpIf as u8);
    code
}

/// Assembles one (sub)program; labels are scoped to it.
fn assemble_nodes(nodes: &[Node<'_>]) -> Result<Vec<u8>, VMError> {
    let mut ctx = AsmContext::new();
    for node in nodes {
        ctx.lower(node)?;
    }
    ctx.finish()
}

/// Assembles source text into a program.
///
/// No semantic validation is performed: the result may fail at run time.
pub fn assemble(source: &str) -> Result<Vec<u8>, VMError> {
    let mut lexer = Lexer::new(source);
    let nodes = parse_group(&mut lexer, None)?;
    assemble_nodes(&nodes)
}

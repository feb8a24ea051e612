//! One-pass stack-machine decoder: turns the instruction stream into
//! anchored statements.

use crate::ast::{Anchored, BinaryOp, BranchPolarity, Expr, Stmt};
use crate::error::DesirError;
use crate::image::{ScriptImage, StringTable};
use crate::reader::Reader;

/// Whole-file decoding starts right after the fixed header.
pub const INSTRUCTION_STREAM_START: u32 = 0x10;

const OP_NEGATE: u8 = 0x01;
const OP_NOT: u8 = 0x07;
const OP_PUSH: u8 = 0x0D;
const OP_ARGS_OPEN: u8 = 0x23;
const OP_CALL: u8 = 0x24;
const OP_SCOPE_OPEN: u8 = 0x25;
const OP_SCOPE_CLOSE: u8 = 0x26;
const OP_EXPR_STMT: u8 = 0x27;
const OP_SPEAKER: u8 = 0x28;
const OP_BUNDLE_START: u8 = 0x2B;
const OP_BUNDLE_END: u8 = 0x2C;
const OP_TEXT: u8 = 0x2F;
const OP_RETURN: u8 = 0x30;
const OP_PAGE: u8 = 0x32;
const OP_SCENE_GOTO: u8 = 0x33;
const OP_LABEL: u8 = 0x34;
const OP_BRANCH: u8 = 0x35;
const OP_BRANCH_IF_TRUE: u8 = 0x36;
const OP_BRANCH_IF_FALSE: u8 = 0x37;
const OP_END_OF_FILE: u8 = 0x45;

const PUSH_INT: u8 = 0xF0;
const PUSH_FUNCTION: u8 = 0xF1;
const PUSH_STRING_OR_QUALIFIED: u8 = 0xF4;

const FRACTION_BITS: u32 = 10;
const FRACTION_MASK: u64 = (1 << FRACTION_BITS) - 1;

/// Statement that ends a decoding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Whole-file decoding.
    EndOfFile,
    /// Per-function decoding.
    ScopeClose,
}

impl Terminator {
    fn matches(self, stmt: &Stmt) -> bool {
        match self {
            Terminator::EndOfFile => matches!(stmt, Stmt::EndOfFile),
            Terminator::ScopeClose => matches!(stmt, Stmt::ScopeClose),
        }
    }
}

/// Operand stack and statement list of a single decoding pass.
///
/// After an error the session keeps everything decoded so far, so callers
/// can inspect the state at the failing instruction.
pub struct DecodeSession<'a> {
    image: &'a ScriptImage,
    strings: &'a StringTable<'a>,
    operands: Vec<Anchored<Expr>>,
    statements: Vec<Anchored<Stmt>>,
}

impl<'a> DecodeSession<'a> {
    pub fn new(image: &'a ScriptImage, strings: &'a StringTable<'a>) -> Self {
        Self {
            image,
            strings,
            operands: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn operands(&self) -> &[Anchored<Expr>] {
        &self.operands
    }

    pub fn statements(&self) -> &[Anchored<Stmt>] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Anchored<Stmt>> {
        self.statements
    }

    /// Steps from `start` until `terminator` is emitted. Returns the address
    /// following the terminator instruction.
    pub fn run(&mut self, start: u32, terminator: Terminator) -> Result<u32, DesirError> {
        let mut addr = start;
        loop {
            let at = addr;
            addr = self.step(at)?;
            let done = self
                .statements
                .last()
                .is_some_and(|s| terminator.matches(&s.node));
            if done {
                if !self.operands.is_empty() {
                    return Err(DesirError::ResidualOperands {
                        offset: at,
                        count: self.operands.len(),
                    });
                }
                return Ok(addr);
            }
        }
    }

    /// Decodes the instruction at `offset` and returns the next address.
    pub fn step(&mut self, offset: u32) -> Result<u32, DesirError> {
        let image = self.image;
        let mut r = image.reader_at(offset as usize);
        let op = r.get_u8()?;
        log::trace!("0x{offset:04X}: op {op:02X} (stack depth {})", self.operands.len());

        match op {
            OP_NEGATE => {
                let top = self.top_mut(offset)?;
                let inner = std::mem::replace(&mut top.node, Expr::Int(0));
                top.node = Expr::Negate(Box::new(inner));
            }
            OP_NOT => {
                let top = self.top_mut(offset)?;
                let inner = std::mem::replace(&mut top.node, Expr::Int(0));
                top.node = Expr::Not(Box::new(inner));
            }
            OP_PUSH => self.push_literal(offset, &mut r)?,
            OP_ARGS_OPEN => self.operands.push(Anchored::new(offset, Expr::Args(Vec::new()))),
            OP_CALL => self.fold_call(offset)?,
            OP_SCOPE_OPEN => self.emit(offset, Stmt::ScopeOpen),
            OP_SCOPE_CLOSE => self.emit(offset, Stmt::ScopeClose),
            OP_EXPR_STMT => {
                let e = self.pop(offset)?;
                self.emit(e.offset, Stmt::Expr(e.node));
            }
            OP_SPEAKER => {
                let text = self.strings.resolve(r.get_u16()?)?;
                self.emit(offset, Stmt::Speaker(text));
            }
            OP_BUNDLE_START => {
                let v = r.get_u8()?;
                self.emit(offset, Stmt::BundleStart(v));
            }
            OP_BUNDLE_END => {
                let v = r.get_u8()?;
                self.emit(offset, Stmt::BundleEnd(v));
            }
            OP_TEXT => {
                let text = self.strings.resolve(r.get_u16()?)?;
                self.emit(offset, Stmt::Text(text));
            }
            OP_RETURN => self.emit(offset, Stmt::Return),
            OP_PAGE => {
                let page = r.get_u16()?;
                self.emit(offset, Stmt::Page(page));
            }
            OP_SCENE_GOTO => {
                let scene = self.strings.resolve(r.get_u16()?)?;
                self.emit(offset, Stmt::SceneGoto(scene));
            }
            OP_LABEL => {
                let name = self.strings.resolve(r.get_u16()?)?;
                self.emit(offset, Stmt::Label(name));
            }
            OP_BRANCH => {
                let target = self.branch_target(offset, &mut r)?;
                self.emit(offset, Stmt::Branch { target });
            }
            OP_BRANCH_IF_TRUE | OP_BRANCH_IF_FALSE => {
                let target = self.branch_target(offset, &mut r)?;
                let polarity = if op == OP_BRANCH_IF_TRUE {
                    log::warn!("0x{offset:04X}: branch-if-true opcode has not been seen in real scripts");
                    BranchPolarity::IfTrue
                } else {
                    BranchPolarity::IfFalse
                };
                let cond = self.pop(offset)?;
                self.emit(
                    cond.offset,
                    Stmt::CondBranch {
                        cond: cond.node,
                        target,
                        polarity,
                    },
                );
            }
            OP_END_OF_FILE => self.emit(offset, Stmt::EndOfFile),
            _ => match BinaryOp::from_opcode(op) {
                Some(kind) => {
                    self.require(offset, 2)?;
                    let rhs = self.pop(offset)?;
                    let lhs = self.pop(offset)?;
                    self.operands
                        .push(Anchored::new(lhs.offset, Expr::binary(kind, lhs.node, rhs.node)));
                }
                None => return Err(DesirError::UnknownOpcode { opcode: op, offset }),
            },
        }

        Ok(r.pos() as u32)
    }

    fn emit(&mut self, offset: u32, stmt: Stmt) {
        self.statements.push(Anchored::new(offset, stmt));
    }

    /// Fails without touching the stack unless `needed` operands are present.
    fn require(&self, offset: u32, needed: usize) -> Result<(), DesirError> {
        let available = self.operands.len();
        if available < needed {
            return Err(DesirError::StackUnderflow { offset, needed, available });
        }
        Ok(())
    }

    fn pop(&mut self, offset: u32) -> Result<Anchored<Expr>, DesirError> {
        self.require(offset, 1)?;
        self.operands.pop().ok_or(DesirError::StackUnderflow {
            offset,
            needed: 1,
            available: 0,
        })
    }

    fn top_mut(&mut self, offset: u32) -> Result<&mut Anchored<Expr>, DesirError> {
        self.require(offset, 1)?;
        self.operands.last_mut().ok_or(DesirError::StackUnderflow {
            offset,
            needed: 1,
            available: 0,
        })
    }

    fn push_literal(&mut self, offset: u32, r: &mut Reader<'_>) -> Result<(), DesirError> {
        let sub = r.get_u8()?;
        let node = match sub {
            PUSH_INT => Expr::Int(fixed_point_whole(offset, r.get_varint(offset)?)?),
            PUSH_FUNCTION => Expr::FunctionName {
                namespace: None,
                name: self.strings.resolve(r.get_u16()?)?,
            },
            PUSH_STRING_OR_QUALIFIED => {
                let first = r.get_u16()?;
                let second = r.get_u16()?;
                if second != 0 {
                    Expr::FunctionName {
                        namespace: Some(self.strings.resolve(first)?),
                        name: self.strings.resolve(second)?,
                    }
                } else {
                    Expr::Str(self.strings.resolve(first)?)
                }
            }
            _ => return Err(DesirError::UnknownSubOpcode { opcode: OP_PUSH, sub, offset }),
        };
        self.operands.push(Anchored::new(offset, node));
        Ok(())
    }

    /// Folds everything above the nearest argument-list marker into a call
    /// on the function name beneath the marker.
    fn fold_call(&mut self, offset: u32) -> Result<(), DesirError> {
        let marker = self
            .operands
            .iter()
            .rposition(|e| matches!(e.node, Expr::Args(_)))
            .ok_or(DesirError::MissingArgList { offset })?;
        if marker == 0 {
            // function name, marker, then the arguments
            let available = self.operands.len();
            return Err(DesirError::StackUnderflow {
                offset,
                needed: available + 1,
                available,
            });
        }
        let args: Vec<Expr> = self.operands.drain(marker + 1..).map(|e| e.node).collect();
        self.operands.truncate(marker);
        let func = self.pop(offset)?;
        self.operands.push(Anchored::new(
            func.offset,
            Expr::Call {
                func: Box::new(func.node),
                args,
            },
        ));
        Ok(())
    }

    fn branch_target(&self, offset: u32, r: &mut Reader<'_>) -> Result<u32, DesirError> {
        let disp = r.get_i16()?;
        let target = r.pos() as i64 + i64::from(disp);
        if target < 0 || target > self.image.bytes().len() as i64 {
            return Err(DesirError::BranchOutOfRange { offset, target });
        }
        Ok(target as u32)
    }
}

/// Validates a raw literal varint and returns its whole part. Bit 0 is the
/// sign, the rest a magnitude with 10 fractional bits.
pub fn fixed_point_whole(offset: u32, raw: u64) -> Result<i32, DesirError> {
    if raw & 1 != 0 {
        return Err(DesirError::NegativeLiteral { offset });
    }
    let magnitude = raw >> 1;
    if magnitude > i32::MAX as u64 {
        return Err(DesirError::LiteralOutOfRange { offset, magnitude });
    }
    if magnitude & FRACTION_MASK != 0 {
        return Err(DesirError::FractionalLiteral { offset, magnitude });
    }
    Ok((magnitude >> FRACTION_BITS) as i32)
}

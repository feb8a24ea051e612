use thiserror::Error;

#[derive(Debug, Error)]
pub enum DesirError {
    #[error("unexpected end of input at 0x{offset:X} (needed {needed} bytes)")]
    Eof { offset: usize, needed: usize },

    #[error("bad magic {0:02X?}, expected \"SIR\"")]
    BadMagic([u8; 3]),

    #[error("unsupported format version 0x{0:02X} (8-byte pointers)")]
    UnsupportedFormatVersion(u8),

    #[error("unknown format version byte 0x{0:02X}")]
    UnknownFormatVersion(u8),

    #[error("unterminated string at 0x{0:X}")]
    UnterminatedString(usize),

    #[error("filename string at 0x{0:X} is not ASCII")]
    InvalidFilename(usize),

    #[error("unknown opcode 0x{opcode:02X} at 0x{offset:04X}")]
    UnknownOpcode { opcode: u8, offset: u32 },

    #[error("unknown sub-opcode {opcode:02X} {sub:02X} at 0x{offset:04X}")]
    UnknownSubOpcode { opcode: u8, sub: u8, offset: u32 },

    #[error("operand stack underflow at 0x{offset:04X} (needed {needed}, have {available})")]
    StackUnderflow { offset: u32, needed: usize, available: usize },

    #[error("{count} operand(s) left on the stack at terminator 0x{offset:04X}")]
    ResidualOperands { offset: u32, count: usize },

    #[error("call at 0x{offset:04X} has no argument list on the stack")]
    MissingArgList { offset: u32 },

    #[error("negative integer literal at 0x{offset:04X}")]
    NegativeLiteral { offset: u32 },

    #[error("integer literal at 0x{offset:04X} out of range (magnitude 0x{magnitude:X})")]
    LiteralOutOfRange { offset: u32, magnitude: u64 },

    #[error("fractional literal at 0x{offset:04X} (magnitude 0x{magnitude:X})")]
    FractionalLiteral { offset: u32, magnitude: u64 },

    #[error("varint at 0x{offset:04X} exceeds 5 groups")]
    VarintTooLong { offset: u32 },

    #[error("branch at 0x{offset:04X} targets {target}, outside the image")]
    BranchOutOfRange { offset: u32, target: i64 },

    #[error("duplicate entrypoint 0x{address:04X} ({first:?} and {second:?})")]
    DuplicateEntrypoint { address: u32, first: String, second: String },

    #[error("string id {id} out of range (count={count})")]
    StringIdOutOfRange { id: u32, count: u32 },

    #[error("block {block} branches to 0x{target:04X}, which is not a leader (nearest: {nearest:?})")]
    DanglingBranchTarget { block: usize, target: u32, nearest: Option<u32> },

    #[error("block {block} falls through past the last block (statement 0x{offset:04X})")]
    MissingFallthrough { block: usize, offset: u32 },

    #[error("leader 0x{leader:04X} does not start a statement")]
    LeaderNotAStatement { leader: u32 },

    #[error("block at leader 0x{leader:04X} has no statements")]
    EmptyBlock { leader: u32 },

    #[error("yaml serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub mod ast;
pub mod cfg;
pub mod codec;
pub mod decode;
pub mod error;
pub mod image;
pub mod reader;
pub mod render;

use serde::{Deserialize, Serialize};

pub use crate::ast::{Anchored, BinaryOp, BranchPolarity, Expr, Stmt};
pub use crate::cfg::{BasicBlock, ControlFlowGraph};
pub use crate::codec::{ShiftJisCodec, TextCodec};
pub use crate::decode::{DecodeSession, Terminator, INSTRUCTION_STREAM_START};
pub use crate::error::DesirError;
pub use crate::image::{EntrypointTable, ScriptHeader, ScriptImage, StringTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    Text,
    Cfg,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeMode {
    WholeFile,
    PerFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: OutputMode,
    pub decode: DecodeMode,
    pub mark_guesses: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: OutputMode::Text,
            decode: DecodeMode::WholeFile,
            mark_guesses: false,
        }
    }
}

/// One decoding pass: the whole file, or a single function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedUnit {
    pub name: Option<String>,
    pub start: u32,
    pub statements: Vec<Anchored<Stmt>>,
    pub cfg: ControlFlowGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decompiled {
    pub filename: String,
    pub header: ScriptHeader,
    pub entrypoints: EntrypointTable,
    pub units: Vec<DecodedUnit>,
}

impl Decompiled {
    /// Listing file name: the script's own name plus an extension for `mode`.
    pub fn output_file_name(&self, mode: OutputMode) -> String {
        match mode {
            OutputMode::Yaml => format!("{}.yaml", self.filename),
            OutputMode::Text | OutputMode::Cfg => format!("{}.txt", self.filename),
        }
    }
}

fn decode_unit(
    image: &ScriptImage,
    strings: &StringTable<'_>,
    name: Option<&str>,
    start: u32,
    terminator: Terminator,
    entries: impl IntoIterator<Item = u32>,
) -> Result<DecodedUnit, DesirError> {
    let mut session = DecodeSession::new(image, strings);
    session.run(start, terminator)?;
    let statements = session.into_statements();
    let cfg = ControlFlowGraph::build(&statements, entries)?;
    Ok(DecodedUnit {
        name: name.map(str::to_owned),
        start,
        statements,
        cfg,
    })
}

pub fn decode_image(
    image: &ScriptImage,
    codec: &dyn TextCodec,
    mode: DecodeMode,
) -> Result<Decompiled, DesirError> {
    let strings = StringTable::new(image, codec);
    let entrypoints = EntrypointTable::read(image, &strings)?;

    let units = match mode {
        DecodeMode::WholeFile => {
            vec![decode_unit(
                image,
                &strings,
                None,
                INSTRUCTION_STREAM_START,
                Terminator::EndOfFile,
                entrypoints.addresses(),
            )?]
        }
        DecodeMode::PerFunction => entrypoints
            .iter()
            .map(|(addr, name)| {
                log::debug!("decoding function {name} at 0x{addr:04X}");
                decode_unit(image, &strings, Some(name), addr, Terminator::ScopeClose, [addr])
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let stmt_count: usize = units.iter().map(|u| u.statements.len()).sum();
    let block_count: usize = units.iter().map(|u| u.cfg.blocks.len()).sum();
    log::info!(
        "decoded {} unit(s): {stmt_count} statements, {block_count} blocks, {} entrypoints",
        units.len(),
        entrypoints.len()
    );

    Ok(Decompiled {
        filename: image.filename()?,
        header: *image.header(),
        entrypoints,
        units,
    })
}

pub fn decompile_image(bytes: &[u8], options: DecompileOptions) -> Result<Decompiled, DesirError> {
    let image = ScriptImage::parse(bytes.to_vec())?;
    decode_image(&image, &ShiftJisCodec, options.decode)
}

pub fn render_with_options(d: &Decompiled, options: DecompileOptions) -> Result<String, DesirError> {
    match options.mode {
        OutputMode::Text => Ok(render::listing(d, options.mark_guesses)),
        OutputMode::Cfg => Ok(render::cfg_listing(d, options.mark_guesses)),
        OutputMode::Yaml => render::yaml(d),
    }
}

pub fn decompile_with_mode(bytes: &[u8], mode: OutputMode) -> Result<String, DesirError> {
    decompile_with_options(
        bytes,
        DecompileOptions {
            mode,
            ..DecompileOptions::default()
        },
    )
}

pub fn decompile_with_options(bytes: &[u8], options: DecompileOptions) -> Result<String, DesirError> {
    let d = decompile_image(bytes, options)?;
    render_with_options(&d, options)
}

pub fn decompile(bytes: &[u8]) -> Result<String, DesirError> {
    decompile_with_options(bytes, DecompileOptions::default())
}

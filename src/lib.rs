/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

pub mod assembler;
pub mod context;
pub mod directives;
pub mod encoder;
pub mod errors;
pub mod expr;
pub mod file_reader;
pub mod fnv;
pub mod isa;
pub mod lexer;
pub mod operand;
pub mod output;
pub mod symbols;

use std::path::Path;

use anyhow::{Context, Result};
use file_reader::FileReader;

/// Reads `source_path` through `reader`, assembles it, and returns the
/// finished object bytes (ELF32 ET_REL or a flat binary image, depending on
/// the source's `format` directive).
pub fn assemble<F: FileReader>(source_path: &Path, reader: &F) -> Result<Vec<u8>> {
    let source = reader
        .read_to_string(source_path)
        .with_context(|| format!("failed to read {}", source_path.display()))?;

    let object = assembler::assemble_bytes(&source)
        .map_err(|e| anyhow::anyhow!("{}", e.diagnostic()))
        .context("assembly failed")?;

    Ok(object.bytes)
}

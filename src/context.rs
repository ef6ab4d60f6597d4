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

use crate::errors::AsmError;
use crate::isa::{IsaIndex, ISA};
use crate::symbols::{Binding, Section, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Elf,
    Bin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Sizing,
    Emitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocType {
    Abs32,
    Pc32,
}

#[derive(Debug, Clone)]
pub struct Reloc {
    pub offset: u32,
    pub symbol_elf_index: u32,
    pub kind: RelocType,
}

pub struct SectionBuf {
    pub bytes: Vec<u8>,
    pub size: u32,
}

impl SectionBuf {
    fn new() -> Self {
        SectionBuf {
            bytes: Vec::new(),
            size: 0,
        }
    }
}

impl Default for SectionBuf {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AssemblerCtx {
    pub format: OutputFormat,
    pub code16: bool,
    pub default_size: u8,
    pub pass: Pass,
    pub cur_section: Section,

    pub text: SectionBuf,
    pub data: SectionBuf,
    pub bss_size: u32,

    pub rel_text: Vec<Reloc>,
    pub rel_data: Vec<Reloc>,

    pub symtab: SymbolTable,
    pub isa_index: IsaIndex,

    pub text_base: u32,
    pub data_base: u32,
    pub bss_base: u32,
    pub org: Option<u32>,
}

impl AssemblerCtx {
    pub fn new() -> Self {
        AssemblerCtx {
            format: OutputFormat::Elf,
            code16: false,
            default_size: 4,
            pass: Pass::Sizing,
            cur_section: Section::Text,
            text: SectionBuf::new(),
            data: SectionBuf::new(),
            bss_size: 0,
            rel_text: Vec::new(),
            rel_data: Vec::new(),
            symtab: SymbolTable::new(),
            isa_index: IsaIndex::build(ISA),
            text_base: 0,
            data_base: 0,
            bss_base: 0,
            org: None,
        }
    }

    pub fn section_size(&self, s: Section) -> u32 {
        match s {
            Section::Text => self.text.size,
            Section::Data => self.data.size,
            Section::Bss => self.bss_size,
            Section::Abs => 0,
        }
    }

    pub fn cur_offset(&self) -> u32 {
        self.section_size(self.cur_section)
    }

    pub fn emit_byte(&mut self, b: u8) {
        match self.cur_section {
            Section::Text => {
                self.text.size += 1;
                if self.pass == Pass::Emitting {
                    self.text.bytes.push(b);
                }
            }
            Section::Data => {
                self.data.size += 1;
                if self.pass == Pass::Emitting {
                    self.data.bytes.push(b);
                }
            }
            Section::Bss => {
                self.bss_size += 1;
            }
            Section::Abs => {}
        }
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.emit_byte(b);
        }
    }

    pub fn emit_word(&mut self, w: u16) {
        self.emit_bytes(&w.to_le_bytes());
    }

    pub fn emit_dword(&mut self, d: u32) {
        self.emit_bytes(&d.to_le_bytes());
    }

    /// Records a relocation at the current section/offset. Must be called
    /// *before* the referencing field's bytes are emitted, since the
    /// recorded offset is the section offset at the moment of the call.
    /// Only meaningful during the emitting pass, after ELF indices have
    /// been assigned.
    pub fn emit_reloc(&mut self, symbol_elf_index: u32, kind: RelocType) {
        if self.pass != Pass::Emitting {
            return;
        }
        let offset = self.cur_offset();
        let reloc = Reloc {
            offset,
            symbol_elf_index,
            kind,
        };
        match self.cur_section {
            Section::Text => self.rel_text.push(reloc),
            Section::Data => self.rel_data.push(reloc),
            _ => {}
        }
    }

    /// Binary-format absolute address for a defined symbol. Extern symbols
    /// are a hard error here rather than a panic — flat binary output has no
    /// linker to resolve them against, so there's nothing a `dd`/displacement
    /// referencing one could mean. The reference implementation panics; this
    /// crate surfaces it as a diagnosable `DirectiveMisuse`.
    ///
    /// During `Pass::Sizing` a forward reference to a label that hasn't been
    /// defined yet is expected — the label lands in the symbol table before
    /// pass 2 revisits this line — so a miss resolves to a placeholder `0`
    /// instead of failing. Only a miss during `Pass::Emitting` is final.
    pub fn resolve_abs_addr(&self, name: &str, line: usize) -> Result<u32, AsmError> {
        let sym = match self.symtab.find(name) {
            Some(sym) => sym,
            None if self.pass == Pass::Sizing => return Ok(0),
            None => {
                return Err(AsmError::UndefinedSymbol {
                    line,
                    name: name.to_string(),
                })
            }
        };
        if sym.binding == Binding::Extern {
            return Err(AsmError::DirectiveMisuse {
                line,
                reason: format!("'{name}' is extern; its address is unknown in binary output"),
            });
        }
        let base = match sym.section {
            Section::Text => self.text_base,
            Section::Data => self.data_base,
            Section::Bss => self.bss_base,
            Section::Abs => return Ok(sym.value as u32),
        };
        Ok(base + sym.value as u32)
    }
}

impl Default for AssemblerCtx {
    fn default() -> Self {
        Self::new()
    }
}

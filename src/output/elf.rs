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

//! ET_REL ELF32 writer: 9 section headers (null, .text, .data, .bss,
//! .symtab, .strtab, .shstrtab, .rel.text, .rel.data). `.symtab`'s
//! `sh_info` is set to the total symbol count rather than the index of the
//! first global — a deliberately preserved quirk, see DESIGN.md.

use crate::context::{AssemblerCtx, RelocType};
use crate::symbols::{Binding, Section};

const EI_NIDENT: usize = 16;
const ET_REL: u16 = 1;
const EM_386: u16 = 3;
const EV_CURRENT: u32 = 1;

const SHT_NULL: u32 = 0;
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_NOBITS: u32 = 8;
const SHT_REL: u32 = 9;

const SHF_ALLOC: u32 = 0x2;
const SHF_EXECINSTR: u32 = 0x4;
const SHF_WRITE: u32 = 0x1;

const STT_NOTYPE: u8 = 0;
const STB_LOCAL: u8 = 0;
const STB_GLOBAL: u8 = 1;

const R_386_32: u32 = 1;
const R_386_PC32: u32 = 2;

// Section header indices, fixed by the 9-section layout.
const SHN_TEXT: u16 = 1;
const SHN_DATA: u16 = 2;
const SHN_BSS: u16 = 3;
const SHN_SYMTAB: u16 = 4;
const SHN_STRTAB: u16 = 5;
const SHN_SHSTRTAB: u16 = 6;
const SHN_REL_TEXT: u16 = 7;
const SHN_REL_DATA: u16 = 8;

struct Shdr {
    name_off: u32,
    sh_type: u32,
    flags: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    addralign: u32,
    entsize: u32,
}

impl Shdr {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name_off.to_le_bytes());
        out.extend_from_slice(&self.sh_type.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_addr
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.link.to_le_bytes());
        out.extend_from_slice(&self.info.to_le_bytes());
        out.extend_from_slice(&self.addralign.to_le_bytes());
        out.extend_from_slice(&self.entsize.to_le_bytes());
    }
}

fn build_strtab(ctx: &AssemblerCtx) -> (Vec<u8>, Vec<u32>) {
    let mut strtab = vec![0u8]; // index 0 is the empty string
    let mut name_offsets = Vec::new();
    for sym in &ctx.symtab.syms {
        if sym.section == Section::Abs {
            continue;
        }
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(sym.name.as_bytes());
        strtab.push(0);
    }
    (strtab, name_offsets)
}

fn build_symtab(ctx: &AssemblerCtx, name_offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    // Null symbol (STN_UNDEF) always comes first.
    out.extend_from_slice(&[0u8; 16]);

    let mut i = 0;
    for sym in &ctx.symtab.syms {
        if sym.section == Section::Abs {
            continue;
        }
        let shndx = match (sym.binding, sym.section) {
            (Binding::Extern, _) => 0,
            (_, Section::Text) => SHN_TEXT,
            (_, Section::Data) => SHN_DATA,
            (_, Section::Bss) => SHN_BSS,
            (_, Section::Abs) => unreachable!(),
        };
        let bind = match sym.binding {
            Binding::Local => STB_LOCAL,
            Binding::Global | Binding::Extern => STB_GLOBAL,
        };
        let info = (bind << 4) | STT_NOTYPE;
        out.extend_from_slice(&name_offsets[i].to_le_bytes());
        out.extend_from_slice(&(sym.value as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // st_size
        out.push(info);
        out.push(0); // st_other
        out.extend_from_slice(&shndx.to_le_bytes());
        i += 1;
    }
    out
}

fn build_rel(relocs: &[crate::context::Reloc]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in relocs {
        let ty = match r.kind {
            RelocType::Abs32 => R_386_32,
            RelocType::Pc32 => R_386_PC32,
        };
        out.extend_from_slice(&r.offset.to_le_bytes());
        let info = (r.symbol_elf_index << 8) | ty;
        out.extend_from_slice(&info.to_le_bytes());
    }
    out
}

pub fn write(ctx: &AssemblerCtx) -> Vec<u8> {
    let shstrtab: &[u8] =
        b"\0.text\0.data\0.bss\0.symtab\0.strtab\0.shstrtab\0.rel.text\0.rel.data\0";
    let name = |needle: &str| -> u32 {
        let marker = format!("{needle}\0");
        find_sub(shstrtab, marker.as_bytes()).unwrap() as u32
    };

    let (strtab, name_offsets) = build_strtab(ctx);
    let symtab = build_symtab(ctx, &name_offsets);
    let rel_text = build_rel(&ctx.rel_text);
    let rel_data = build_rel(&ctx.rel_data);
    let symbol_count = (symtab.len() / 16) as u32;

    const EHDR_SIZE: u32 = 52;
    const SHDR_SIZE: u32 = 40;
    const NUM_SECTIONS: u32 = 9;

    let text_off = EHDR_SIZE;
    let data_off = text_off + ctx.text.bytes.len() as u32;
    let symtab_off = data_off + ctx.data.bytes.len() as u32; // .bss contributes 0 bytes on disk
    let strtab_off = symtab_off + symtab.len() as u32;
    let shstrtab_off = strtab_off + strtab.len() as u32;
    let rel_text_off = shstrtab_off + shstrtab.len() as u32;
    let rel_data_off = rel_text_off + rel_text.len() as u32;
    let shdr_off = rel_data_off + rel_data.len() as u32;

    let mut out = Vec::new();

    // e_ident
    let mut ident = [0u8; EI_NIDENT];
    ident[0..4].copy_from_slice(b"\x7fELF");
    ident[4] = 1; // ELFCLASS32
    ident[5] = 1; // ELFDATA2LSB
    ident[6] = 1; // EV_CURRENT
    out.extend_from_slice(&ident);
    out.extend_from_slice(&ET_REL.to_le_bytes());
    out.extend_from_slice(&EM_386.to_le_bytes());
    out.extend_from_slice(&EV_CURRENT.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // e_entry
    out.extend_from_slice(&0u32.to_le_bytes()); // e_phoff
    out.extend_from_slice(&shdr_off.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(NUM_SECTIONS as u16).to_le_bytes());
    out.extend_from_slice(&SHN_SHSTRTAB.to_le_bytes());

    debug_assert_eq!(out.len() as u32, EHDR_SIZE);

    out.extend_from_slice(&ctx.text.bytes);
    out.extend_from_slice(&ctx.data.bytes);
    out.extend_from_slice(&symtab);
    out.extend_from_slice(&strtab);
    out.extend_from_slice(shstrtab);
    out.extend_from_slice(&rel_text);
    out.extend_from_slice(&rel_data);

    let headers = [
        Shdr {
            name_off: 0,
            sh_type: SHT_NULL,
            flags: 0,
            offset: 0,
            size: 0,
            link: 0,
            info: 0,
            addralign: 0,
            entsize: 0,
        },
        Shdr {
            name_off: name(".text"),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_EXECINSTR,
            offset: text_off,
            size: ctx.text.bytes.len() as u32,
            link: 0,
            info: 0,
            addralign: 4,
            entsize: 0,
        },
        Shdr {
            name_off: name(".data"),
            sh_type: SHT_PROGBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            offset: data_off,
            size: ctx.data.bytes.len() as u32,
            link: 0,
            info: 0,
            addralign: 4,
            entsize: 0,
        },
        Shdr {
            name_off: name(".bss"),
            sh_type: SHT_NOBITS,
            flags: SHF_ALLOC | SHF_WRITE,
            offset: data_off + ctx.data.bytes.len() as u32,
            size: ctx.bss_size,
            link: 0,
            info: 0,
            addralign: 4,
            entsize: 0,
        },
        Shdr {
            name_off: name(".symtab"),
            sh_type: SHT_SYMTAB,
            flags: 0,
            offset: symtab_off,
            size: symtab.len() as u32,
            link: SHN_STRTAB as u32,
            info: symbol_count,
            addralign: 4,
            entsize: 16,
        },
        Shdr {
            name_off: name(".strtab"),
            sh_type: SHT_STRTAB,
            flags: 0,
            offset: strtab_off,
            size: strtab.len() as u32,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        },
        Shdr {
            name_off: name(".shstrtab"),
            sh_type: SHT_STRTAB,
            flags: 0,
            offset: shstrtab_off,
            size: shstrtab.len() as u32,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        },
        Shdr {
            name_off: name(".rel.text"),
            sh_type: SHT_REL,
            flags: 0,
            offset: rel_text_off,
            size: rel_text.len() as u32,
            link: SHN_SYMTAB as u32,
            info: SHN_TEXT as u32,
            addralign: 4,
            entsize: 8,
        },
        Shdr {
            name_off: name(".rel.data"),
            sh_type: SHT_REL,
            flags: 0,
            offset: rel_data_off,
            size: rel_data.len() as u32,
            link: SHN_SYMTAB as u32,
            info: SHN_DATA as u32,
            addralign: 4,
            entsize: 8,
        },
    ];

    for h in &headers {
        h.write(&mut out);
    }

    out
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use crate::assembler::assemble_bytes;

    #[test]
    fn writes_valid_elf_magic_and_section_count() {
        let obj = assemble_bytes("nop\n").unwrap();
        assert_eq!(&obj.bytes[0..4], b"\x7fELF");
        let e_shnum = u16::from_le_bytes([obj.bytes[48], obj.bytes[49]]);
        assert_eq!(e_shnum, 9);
    }

    #[test]
    fn symtab_sh_info_is_total_symbol_count_not_first_global() {
        let src = "global foo\nfoo:\nnop\n";
        let obj = assemble_bytes(src).unwrap();
        let e_shoff = u32::from_le_bytes(obj.bytes[32..36].try_into().unwrap());
        let symtab_shdr_off = e_shoff as usize + 40 * 4; // index 4 = .symtab
        let sh_info = u32::from_le_bytes(
            obj.bytes[symtab_shdr_off + 28..symtab_shdr_off + 32]
                .try_into()
                .unwrap(),
        );
        // null symbol + foo = 2 total symbols.
        assert_eq!(sh_info, 2);
    }
}

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

use asmc::assemble;
use asmc::file_reader::MockFileReader;
use std::path::Path;

fn assemble_str(src: &str) -> Vec<u8> {
    let mut reader = MockFileReader::default();
    reader.add_file("test.asm", src);
    assemble(Path::new("test.asm"), &reader).unwrap()
}

fn assemble_err(src: &str) -> String {
    let mut reader = MockFileReader::default();
    reader.add_file("test.asm", src);
    let err = assemble(Path::new("test.asm"), &reader).unwrap_err();
    format!("{err:#}")
}

fn elf_section_header(bytes: &[u8], idx: usize) -> &[u8] {
    let e_shoff = u32::from_le_bytes(bytes[32..36].try_into().unwrap()) as usize;
    let off = e_shoff + idx * 40;
    &bytes[off..off + 40]
}

fn sh_offset(h: &[u8]) -> u32 {
    u32::from_le_bytes(h[16..20].try_into().unwrap())
}

fn sh_size(h: &[u8]) -> u32 {
    u32::from_le_bytes(h[20..24].try_into().unwrap())
}

#[test]
fn null_program_is_a_valid_elf_with_nine_sections() {
    let bytes = assemble_str("");
    assert_eq!(&bytes[0..4], b"\x7fELF");
    let e_shnum = u16::from_le_bytes(bytes[48..50].try_into().unwrap());
    assert_eq!(e_shnum, 9);
}

#[test]
fn nop_appears_as_a_single_text_byte() {
    let bytes = assemble_str("nop\n");
    let text_hdr = elf_section_header(&bytes, 1);
    let (off, size) = (sh_offset(text_hdr) as usize, sh_size(text_hdr) as usize);
    assert_eq!(&bytes[off..off + size], &[0x90]);
}

#[test]
fn mov_immediate_to_register_encodes_with_b8_and_oi_mode() {
    let bytes = assemble_str("mov eax, 0x1234\n");
    let text_hdr = elf_section_header(&bytes, 1);
    let (off, size) = (sh_offset(text_hdr) as usize, sh_size(text_hdr) as usize);
    let text = &bytes[off..off + size];
    assert_eq!(text[0], 0xB8); // MOV EAX, imm32 (register folded into opcode)
    assert_eq!(&text[1..5], &0x1234u32.to_le_bytes());
}

#[test]
fn absolute_equ_constant_is_excluded_from_the_symbol_table() {
    let bytes = assemble_str("SIZE equ 16\nmov eax, SIZE\n");
    let symtab_hdr = elf_section_header(&bytes, 4);
    // Only the null symbol should be present: SIZE lives in the Abs
    // virtual section and never gets an ELF index.
    assert_eq!(sh_size(symtab_hdr), 16);
}

#[test]
fn jump_to_a_label_in_another_section_records_one_pc32_relocation() {
    let src = "jmp start\nsection data\nstart:\ndd 0\n";
    let bytes = assemble_str(src);
    let rel_text_hdr = elf_section_header(&bytes, 7);
    assert_eq!(sh_size(rel_text_hdr) / 8, 1);
    let off = sh_offset(rel_text_hdr) as usize;
    let r_info = u32::from_le_bytes(bytes[off + 4..off + 8].try_into().unwrap());
    assert_eq!(r_info & 0xff, 2); // R_386_PC32
}

#[test]
fn global_label_referenced_from_data_gets_an_abs32_reloc_in_rel_data() {
    let src = "global target\nsection data\ntarget:\ndd target\n";
    let bytes = assemble_str(src);
    let rel_data_hdr = elf_section_header(&bytes, 8);
    assert_eq!(sh_size(rel_data_hdr) / 8, 1);
    let off = sh_offset(rel_data_hdr) as usize;
    let r_info = u32::from_le_bytes(bytes[off + 4..off + 8].try_into().unwrap());
    let reloc_type = r_info & 0xff;
    assert_eq!(reloc_type, 1); // R_386_32
}

#[test]
fn local_scoped_labels_resolve_within_their_global_scope() {
    let src = "format binary\nstart:\n.loop:\n  jmp .loop\n";
    let bytes = assemble_str(src);
    // jmp rel32 to itself: E9 + (-5) = E9 FB FF FF FF
    assert_eq!(bytes[0], 0xE9);
    assert_eq!(&bytes[1..5], &(-5i32).to_le_bytes());
}

#[test]
fn local_label_before_any_global_label_is_an_error() {
    let err = assemble_err(".loop:\nnop\n");
    assert!(err.contains("local label used before any global label"));
}

#[test]
fn oversized_symbol_name_is_rejected() {
    let long_name = "x".repeat(64);
    let src = format!("{long_name}:\nnop\n");
    let err = assemble_err(&src);
    assert!(err.contains("exceeds 63 bytes"));
}

#[test]
fn org_biases_address_math_without_padding_the_image() {
    // `org` shifts the base used to resolve absolute addresses; it is not a
    // file-offset pad, so the image still starts with the first real byte.
    let src = "format binary\norg 0x7c00\nnop\n";
    let bytes = assemble_str(src);
    assert_eq!(bytes, vec![0x90]);
}

#[test]
fn binary_format_concatenates_text_and_data_with_no_header() {
    let src = "format binary\nnop\nsection data\ndb 1, 2, 3\n";
    let bytes = assemble_str(src);
    assert_eq!(bytes, vec![0x90, 1, 2, 3]);
}

#[test]
fn sixteen_bit_mode_restricts_addressing_registers() {
    let src = "format binary\nuse16\nmov ax, [eax]\n";
    let err = assemble_err(src);
    assert!(err.contains("not valid in a 16-bit address"));
}

#[test]
fn sixteen_bit_mode_allows_bx_si_addressing() {
    let bytes = assemble_str("format binary\nuse16\nmov ax, [bx+si]\n");
    // 8B 00: MOV r16, r/m16 with ModR/M mod=00 reg=AX(000) rm=[BX+SI](000)
    assert_eq!(bytes[0], 0x8B);
    assert_eq!(bytes[1], 0x00);
}

#[test]
fn sixteen_bit_memory_label_reloc_is_unsupported_in_elf() {
    let src = "use16\nmov ax, [label]\nsection data\nlabel:\ndw 0\n";
    let err = assemble_err(src);
    assert!(err.contains("not representable in ELF output"));
}

#[test]
fn division_by_zero_preserves_the_left_operand_quirk() {
    let bytes = assemble_str("mov eax, 10/0\n");
    let text_hdr = elf_section_header(&bytes, 1);
    let off = sh_offset(text_hdr) as usize;
    let text = &bytes[off..off + sh_size(text_hdr) as usize];
    assert_eq!(text[0], 0xB8); // MOV EAX, imm32
    assert_eq!(&text[1..5], &10u32.to_le_bytes());
}

#[test]
fn extern_symbol_is_marked_undefined_in_the_symbol_table() {
    let src = "extern helper\ncall helper\n";
    let bytes = assemble_str(src);
    let symtab_hdr = elf_section_header(&bytes, 4);
    let off = sh_offset(symtab_hdr) as usize;
    // Second entry (index 1, after the null symbol) is `helper`.
    let st_shndx = u16::from_le_bytes(bytes[off + 16 + 14..off + 16 + 16].try_into().unwrap());
    assert_eq!(st_shndx, 0); // SHN_UNDEF
}

#[test]
fn binary_mode_dd_of_an_extern_symbol_is_a_directive_misuse_error() {
    let src = "format binary\nextern helper\ndd helper\n";
    let err = assemble_err(src);
    assert!(err.contains("extern"));
}

#[test]
fn unknown_mnemonic_reports_a_diagnosable_error() {
    let err = assemble_err("frobnicate eax\n");
    assert!(err.contains("[ASMC ERROR]"));
}

#[test]
fn sib_addressing_with_scaled_index_encodes_correctly() {
    let bytes = assemble_str("mov eax, [ebx + ecx*4 + 8]\n");
    let text_hdr = elf_section_header(&bytes, 1);
    let off = sh_offset(text_hdr) as usize;
    let text = &bytes[off..off + sh_size(text_hdr) as usize];
    assert_eq!(text[0], 0x8B); // MOV r32, r/m32
    assert_eq!(text[1], 0x44); // mod=01, reg=EAX(000), rm=100 (SIB follows)
    assert_eq!(text[2], 0x8B); // SIB: scale=10(4), index=ECX(001), base=EBX(011)
    assert_eq!(text[3], 8); // disp8
}

#[test]
fn conditional_jump_forward_is_a_two_byte_0f_opcode_with_a_relocation() {
    let src = "cmp eax, 0\nje done\nnop\ndone:\nret\n";
    let bytes = assemble_str(src);
    let text_hdr = elf_section_header(&bytes, 1);
    let off = sh_offset(text_hdr) as usize;
    let text = &bytes[off..off + sh_size(text_hdr) as usize];
    // cmp eax, 0 (83 F8 00 = 3 bytes, sign-extended imm8 form) then JE rel32
    // (0F 84 + placeholder)
    assert_eq!(&text[0..3], &[0x83, 0xF8, 0x00]);
    assert_eq!(&text[3..5], &[0x0F, 0x84]);
    let rel_text_hdr = elf_section_header(&bytes, 7);
    assert_eq!(sh_size(rel_text_hdr) / 8, 1);
}

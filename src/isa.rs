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

//! The opcode catalogue: one row per encoding form a mnemonic supports,
//! indexed by an FNV-1a hash bucket table built once per assembly run
//! (never a process-wide static, so parallel test runs never share state).

use crate::fnv::{fnv1a, next_pow2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncMode {
    /// No operands, single opcode byte (`nop`, `hlt`, `cld`, ...).
    None,
    /// Two-byte `0F xx` opcode, no operands (`rdtsc`).
    Op0F,
    /// Register operand folded into the opcode's low 3 bits (`push`/`pop r`).
    OI,
    /// `reg, r/m` (destination register, ModR/M supplies the source).
    RM,
    /// `r/m, reg` (ModR/M supplies the destination, register is the source).
    MR,
    /// `r/m, imm` — ModR/M with an opcode-extension `/digit`, then immediate.
    MI,
    /// `r/m` alone, extension in ModR/M reg field (`inc`, `dec`, `neg`, `not`).
    M,
    /// Accumulator/r-m, immediate with no ModR/M (`cmp eax, imm32` short form).
    I,
    /// Shift/rotate group: `r/m, imm8` or `r/m, cl` via ModR/M `/digit`.
    Shift,
    /// Relative jump/call, 8- or 32-bit displacement depending on size.
    J,
    /// Two-byte `0F xx /r` with `reg, r/m` (`movzx`, `movsx`, `cmovcc`).
    Op0FRm,
    /// Two-byte `0F xx /r`, single r/m operand, reg field fixed at 0 (`setcc`).
    Op0FMr,
    /// Two-byte `0F xx /r` with `r/m, reg` form (`bt`/`bts`/`btr`/`btc`).
    Op0FBitMr,
    /// Two-byte `0F 8x` conditional relative jump, rel32 displacement.
    Jcc,
    /// Single opcode byte plus a signed rel8 displacement (`loop`).
    LoopRel,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrDef {
    pub mnemonic: &'static str,
    pub op_base: u8,
    pub op_ext: u8,
    pub mode: EncMode,
    /// 0 = any operand size is legal for this row.
    pub size: u8,
}

macro_rules! row {
    ($m:expr, $base:expr, $ext:expr, $mode:expr, $size:expr) => {
        InstrDef {
            mnemonic: $m,
            op_base: $base,
            op_ext: $ext,
            mode: $mode,
            size: $size,
        }
    };
}

pub static ISA: &[InstrDef] = &[
    row!("nop", 0x90, 0, EncMode::None, 0),
    row!("hlt", 0xF4, 0, EncMode::None, 0),
    row!("cli", 0xFA, 0, EncMode::None, 0),
    row!("sti", 0xFB, 0, EncMode::None, 0),
    row!("cld", 0xFC, 0, EncMode::None, 0),
    row!("std", 0xFD, 0, EncMode::None, 0),
    row!("pushf", 0x9C, 0, EncMode::None, 0),
    row!("popf", 0x9D, 0, EncMode::None, 0),
    row!("pusha", 0x60, 0, EncMode::None, 0),
    row!("popa", 0x61, 0, EncMode::None, 0),
    row!("leave", 0xC9, 0, EncMode::None, 0),
    row!("int3", 0xCC, 0, EncMode::None, 0),
    row!("ret", 0xC3, 0, EncMode::None, 0),
    row!("movsb", 0xA4, 0, EncMode::None, 0),
    row!("movsd", 0xA5, 0, EncMode::None, 0),
    row!("cmpsb", 0xA6, 0, EncMode::None, 0),
    row!("cmpsd", 0xA7, 0, EncMode::None, 0),
    row!("stosb", 0xAA, 0, EncMode::None, 0),
    row!("stosd", 0xAB, 0, EncMode::None, 0),
    row!("lodsb", 0xAC, 0, EncMode::None, 0),
    row!("lodsd", 0xAD, 0, EncMode::None, 0),
    row!("scasb", 0xAE, 0, EncMode::None, 0),
    row!("scasd", 0xAF, 0, EncMode::None, 0),
    row!("rdtsc", 0x31, 0, EncMode::Op0F, 0),
    row!("ud2", 0x0B, 0, EncMode::Op0F, 0),
    row!("int", 0xCD, 0, EncMode::I, 0),
    row!("push", 0x68, 0, EncMode::I, 4),
    row!("push", 0x6A, 0, EncMode::I, 1),
    row!("loop", 0xE2, 0, EncMode::LoopRel, 0),
    row!("mov", 0x88, 0, EncMode::MR, 1),
    row!("mov", 0x89, 0, EncMode::MR, 0),
    row!("mov", 0x8A, 0, EncMode::RM, 1),
    row!("mov", 0x8B, 0, EncMode::RM, 0),
    row!("mov", 0xB0, 0, EncMode::OI, 1),
    row!("mov", 0xB8, 0, EncMode::OI, 0),
    row!("mov", 0xC6, 0, EncMode::MI, 1),
    row!("mov", 0xC7, 0, EncMode::MI, 0),
    row!("lea", 0x8D, 0, EncMode::RM, 4),
    row!("xchg", 0x86, 0, EncMode::MR, 1),
    row!("xchg", 0x87, 0, EncMode::MR, 0),
    row!("movzx", 0xB6, 0, EncMode::Op0FRm, 1),
    row!("movzx", 0xB7, 0, EncMode::Op0FRm, 2),
    row!("movsx", 0xBE, 0, EncMode::Op0FRm, 1),
    row!("movsx", 0xBF, 0, EncMode::Op0FRm, 2),
    row!("add", 0x00, 0, EncMode::MR, 1),
    row!("add", 0x01, 0, EncMode::MR, 0),
    row!("add", 0x02, 0, EncMode::RM, 1),
    row!("add", 0x03, 0, EncMode::RM, 0),
    row!("add", 0x80, 0, EncMode::MI, 1),
    row!("add", 0x83, 0, EncMode::MI, 0),
    row!("add", 0x81, 0, EncMode::MI, 0),
    row!("adc", 0x10, 2, EncMode::MR, 1),
    row!("adc", 0x11, 2, EncMode::MR, 0),
    row!("adc", 0x12, 0, EncMode::RM, 1),
    row!("adc", 0x13, 0, EncMode::RM, 0),
    row!("adc", 0x80, 2, EncMode::MI, 1),
    row!("adc", 0x83, 2, EncMode::MI, 0),
    row!("adc", 0x81, 2, EncMode::MI, 0),
    row!("sbb", 0x18, 3, EncMode::MR, 1),
    row!("sbb", 0x19, 3, EncMode::MR, 0),
    row!("sbb", 0x1A, 0, EncMode::RM, 1),
    row!("sbb", 0x1B, 0, EncMode::RM, 0),
    row!("sbb", 0x80, 3, EncMode::MI, 1),
    row!("sbb", 0x83, 3, EncMode::MI, 0),
    row!("sbb", 0x81, 3, EncMode::MI, 0),
    row!("sub", 0x28, 5, EncMode::MR, 1),
    row!("sub", 0x29, 5, EncMode::MR, 0),
    row!("sub", 0x2A, 0, EncMode::RM, 1),
    row!("sub", 0x2B, 0, EncMode::RM, 0),
    row!("sub", 0x80, 5, EncMode::MI, 1),
    row!("sub", 0x83, 5, EncMode::MI, 0),
    row!("sub", 0x81, 5, EncMode::MI, 0),
    row!("and", 0x20, 4, EncMode::MR, 1),
    row!("and", 0x21, 4, EncMode::MR, 0),
    row!("and", 0x22, 0, EncMode::RM, 1),
    row!("and", 0x23, 0, EncMode::RM, 0),
    row!("and", 0x80, 4, EncMode::MI, 1),
    row!("and", 0x83, 4, EncMode::MI, 0),
    row!("and", 0x81, 4, EncMode::MI, 0),
    row!("or", 0x08, 1, EncMode::MR, 1),
    row!("or", 0x09, 1, EncMode::MR, 0),
    row!("or", 0x0A, 0, EncMode::RM, 1),
    row!("or", 0x0B, 0, EncMode::RM, 0),
    row!("or", 0x80, 1, EncMode::MI, 1),
    row!("or", 0x83, 1, EncMode::MI, 0),
    row!("or", 0x81, 1, EncMode::MI, 0),
    row!("xor", 0x30, 6, EncMode::MR, 1),
    row!("xor", 0x31, 6, EncMode::MR, 0),
    row!("xor", 0x32, 0, EncMode::RM, 1),
    row!("xor", 0x33, 0, EncMode::RM, 0),
    row!("xor", 0x80, 6, EncMode::MI, 1),
    row!("xor", 0x83, 6, EncMode::MI, 0),
    row!("xor", 0x81, 6, EncMode::MI, 0),
    row!("cmp", 0x38, 7, EncMode::MR, 1),
    row!("cmp", 0x39, 7, EncMode::MR, 0),
    row!("cmp", 0x3A, 0, EncMode::RM, 1),
    row!("cmp", 0x3B, 0, EncMode::RM, 0),
    row!("cmp", 0x80, 7, EncMode::MI, 1),
    row!("cmp", 0x83, 7, EncMode::MI, 0),
    row!("cmp", 0x81, 7, EncMode::MI, 0),
    // test has no dedicated reg<-r/m opcode; it's symmetric, so the same
    // MR byte doubles as the RM form when the register operand comes first.
    row!("test", 0x84, 0, EncMode::MR, 1),
    row!("test", 0x85, 0, EncMode::MR, 0),
    row!("test", 0x84, 0, EncMode::RM, 1),
    row!("test", 0x85, 0, EncMode::RM, 0),
    row!("test", 0xF6, 0, EncMode::MI, 1),
    row!("test", 0xF7, 0, EncMode::MI, 0),
    row!("inc", 0xFE, 0, EncMode::M, 1),
    row!("inc", 0xFF, 0, EncMode::M, 0),
    row!("dec", 0xFE, 1, EncMode::M, 1),
    row!("dec", 0xFF, 1, EncMode::M, 0),
    row!("neg", 0xF6, 3, EncMode::M, 1),
    row!("neg", 0xF7, 3, EncMode::M, 0),
    row!("not", 0xF6, 2, EncMode::M, 1),
    row!("not", 0xF7, 2, EncMode::M, 0),
    row!("mul", 0xF6, 4, EncMode::M, 1),
    row!("mul", 0xF7, 4, EncMode::M, 0),
    row!("imul", 0xF6, 5, EncMode::M, 1),
    row!("imul", 0xF7, 5, EncMode::M, 0),
    row!("div", 0xF6, 6, EncMode::M, 1),
    row!("div", 0xF7, 6, EncMode::M, 0),
    row!("idiv", 0xF6, 7, EncMode::M, 1),
    row!("idiv", 0xF7, 7, EncMode::M, 0),
    row!("shl", 0xC0, 4, EncMode::Shift, 1),
    row!("shl", 0xC1, 4, EncMode::Shift, 0),
    row!("sal", 0xC0, 4, EncMode::Shift, 1),
    row!("sal", 0xC1, 4, EncMode::Shift, 0),
    row!("shr", 0xC0, 5, EncMode::Shift, 1),
    row!("shr", 0xC1, 5, EncMode::Shift, 0),
    row!("sar", 0xC0, 7, EncMode::Shift, 1),
    row!("sar", 0xC1, 7, EncMode::Shift, 0),
    row!("rol", 0xC0, 0, EncMode::Shift, 1),
    row!("rol", 0xC1, 0, EncMode::Shift, 0),
    row!("ror", 0xC0, 1, EncMode::Shift, 1),
    row!("ror", 0xC1, 1, EncMode::Shift, 0),
    row!("push", 0x50, 0, EncMode::OI, 4),
    row!("pop", 0x58, 0, EncMode::OI, 4),
    row!("jmp", 0xE9, 0, EncMode::J, 0),
    row!("call", 0xE8, 0, EncMode::J, 0),
    row!("je", 0x84, 0, EncMode::Jcc, 0),
    row!("jz", 0x84, 0, EncMode::Jcc, 0),
    row!("jne", 0x85, 0, EncMode::Jcc, 0),
    row!("jnz", 0x85, 0, EncMode::Jcc, 0),
    row!("jl", 0x8C, 0, EncMode::Jcc, 0),
    row!("jge", 0x8D, 0, EncMode::Jcc, 0),
    row!("jle", 0x8E, 0, EncMode::Jcc, 0),
    row!("jg", 0x8F, 0, EncMode::Jcc, 0),
    row!("jb", 0x82, 0, EncMode::Jcc, 0),
    row!("jae", 0x83, 0, EncMode::Jcc, 0),
    row!("jbe", 0x86, 0, EncMode::Jcc, 0),
    row!("ja", 0x87, 0, EncMode::Jcc, 0),
    // setcc — full condition-code set, opcodes 0F 90-9F, with their
    // standard mnemonic aliases.
    row!("seto", 0x90, 0, EncMode::Op0FMr, 1),
    row!("setno", 0x91, 0, EncMode::Op0FMr, 1),
    row!("setb", 0x92, 0, EncMode::Op0FMr, 1),
    row!("setc", 0x92, 0, EncMode::Op0FMr, 1),
    row!("setnae", 0x92, 0, EncMode::Op0FMr, 1),
    row!("setae", 0x93, 0, EncMode::Op0FMr, 1),
    row!("setnb", 0x93, 0, EncMode::Op0FMr, 1),
    row!("setnc", 0x93, 0, EncMode::Op0FMr, 1),
    row!("sete", 0x94, 0, EncMode::Op0FMr, 1),
    row!("setz", 0x94, 0, EncMode::Op0FMr, 1),
    row!("setne", 0x95, 0, EncMode::Op0FMr, 1),
    row!("setnz", 0x95, 0, EncMode::Op0FMr, 1),
    row!("setbe", 0x96, 0, EncMode::Op0FMr, 1),
    row!("setna", 0x96, 0, EncMode::Op0FMr, 1),
    row!("seta", 0x97, 0, EncMode::Op0FMr, 1),
    row!("setnbe", 0x97, 0, EncMode::Op0FMr, 1),
    row!("sets", 0x98, 0, EncMode::Op0FMr, 1),
    row!("setns", 0x99, 0, EncMode::Op0FMr, 1),
    row!("setp", 0x9A, 0, EncMode::Op0FMr, 1),
    row!("setpe", 0x9A, 0, EncMode::Op0FMr, 1),
    row!("setnp", 0x9B, 0, EncMode::Op0FMr, 1),
    row!("setpo", 0x9B, 0, EncMode::Op0FMr, 1),
    row!("setl", 0x9C, 0, EncMode::Op0FMr, 1),
    row!("setnge", 0x9C, 0, EncMode::Op0FMr, 1),
    row!("setge", 0x9D, 0, EncMode::Op0FMr, 1),
    row!("setnl", 0x9D, 0, EncMode::Op0FMr, 1),
    row!("setle", 0x9E, 0, EncMode::Op0FMr, 1),
    row!("setng", 0x9E, 0, EncMode::Op0FMr, 1),
    row!("setg", 0x9F, 0, EncMode::Op0FMr, 1),
    row!("setnle", 0x9F, 0, EncMode::Op0FMr, 1),
    // cmovcc — full condition-code set, opcodes 0F 40-4F, with aliases.
    row!("cmovo", 0x40, 0, EncMode::Op0FRm, 0),
    row!("cmovno", 0x41, 0, EncMode::Op0FRm, 0),
    row!("cmovb", 0x42, 0, EncMode::Op0FRm, 0),
    row!("cmovc", 0x42, 0, EncMode::Op0FRm, 0),
    row!("cmovnae", 0x42, 0, EncMode::Op0FRm, 0),
    row!("cmovae", 0x43, 0, EncMode::Op0FRm, 0),
    row!("cmovnb", 0x43, 0, EncMode::Op0FRm, 0),
    row!("cmovnc", 0x43, 0, EncMode::Op0FRm, 0),
    row!("cmove", 0x44, 0, EncMode::Op0FRm, 0),
    row!("cmovz", 0x44, 0, EncMode::Op0FRm, 0),
    row!("cmovne", 0x45, 0, EncMode::Op0FRm, 0),
    row!("cmovnz", 0x45, 0, EncMode::Op0FRm, 0),
    row!("cmovbe", 0x46, 0, EncMode::Op0FRm, 0),
    row!("cmovna", 0x46, 0, EncMode::Op0FRm, 0),
    row!("cmova", 0x47, 0, EncMode::Op0FRm, 0),
    row!("cmovnbe", 0x47, 0, EncMode::Op0FRm, 0),
    row!("cmovs", 0x48, 0, EncMode::Op0FRm, 0),
    row!("cmovns", 0x49, 0, EncMode::Op0FRm, 0),
    row!("cmovp", 0x4A, 0, EncMode::Op0FRm, 0),
    row!("cmovpe", 0x4A, 0, EncMode::Op0FRm, 0),
    row!("cmovnp", 0x4B, 0, EncMode::Op0FRm, 0),
    row!("cmovpo", 0x4B, 0, EncMode::Op0FRm, 0),
    row!("cmovl", 0x4C, 0, EncMode::Op0FRm, 0),
    row!("cmovnge", 0x4C, 0, EncMode::Op0FRm, 0),
    row!("cmovge", 0x4D, 0, EncMode::Op0FRm, 0),
    row!("cmovnl", 0x4D, 0, EncMode::Op0FRm, 0),
    row!("cmovle", 0x4E, 0, EncMode::Op0FRm, 0),
    row!("cmovng", 0x4E, 0, EncMode::Op0FRm, 0),
    row!("cmovg", 0x4F, 0, EncMode::Op0FRm, 0),
    row!("cmovnle", 0x4F, 0, EncMode::Op0FRm, 0),
    row!("bt", 0xA3, 0, EncMode::Op0FBitMr, 0),
    row!("bts", 0xAB, 0, EncMode::Op0FBitMr, 0),
    row!("btr", 0xB3, 0, EncMode::Op0FBitMr, 0),
    row!("btc", 0xBB, 0, EncMode::Op0FBitMr, 0),
    row!("bsf", 0xBC, 0, EncMode::Op0FRm, 0),
    row!("bsr", 0xBD, 0, EncMode::Op0FRm, 0),
];

/// FNV-1a bucket-chained index over `ISA`, mirroring `isa_build_index` from
/// the reference implementation: built fresh per assembly run.
pub struct IsaIndex {
    buckets: Vec<Vec<u16>>,
}

impl IsaIndex {
    pub fn build(table: &[InstrDef]) -> Self {
        let size = next_pow2(table.len(), 64);
        let mut buckets: Vec<Vec<u16>> = vec![Vec::new(); size];
        let mask = size - 1;
        for (i, def) in table.iter().enumerate() {
            let slot = fnv1a(def.mnemonic) as usize & mask;
            buckets[slot].push(i as u16);
        }
        IsaIndex { buckets }
    }

    pub fn rows<'a>(&self, table: &'a [InstrDef], mnemonic: &str) -> Vec<&'a InstrDef> {
        let mask = self.buckets.len() - 1;
        let slot = fnv1a(mnemonic) as usize & mask;
        self.buckets[slot]
            .iter()
            .map(|&i| &table[i as usize])
            .filter(|d| d.mnemonic.eq_ignore_ascii_case(mnemonic))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_finds_every_mnemonic_row() {
        let idx = IsaIndex::build(ISA);
        for def in ISA {
            assert!(
                !idx.rows(ISA, def.mnemonic).is_empty(),
                "missing index entry for {}",
                def.mnemonic
            );
        }
    }

    #[test]
    fn unknown_mnemonic_yields_no_rows() {
        let idx = IsaIndex::build(ISA);
        assert!(idx.rows(ISA, "frobnicate").is_empty());
    }
}

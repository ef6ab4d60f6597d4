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

//! Two-pass orchestration: `process_line` dispatches each source line to
//! the symbol table, directive handlers, or the encoder; `assemble_bytes`
//! drives pass 1, fixes up ELF indices and binary-mode bases, then drives
//! pass 2 and hands the finished context to the output writer.

use crate::context::{AssemblerCtx, OutputFormat, Pass};
use crate::directives::handle_directive;
use crate::encoder::{assemble_instr, choose_size};
use crate::errors::AsmError;
use crate::expr::eval;
use crate::isa::{EncMode, InstrDef};
use crate::lexer::{split_line, strip_size_override};
use crate::operand::{parse_operand, Operand};
use crate::output;
use crate::symbols::{Binding, Section};

pub struct AssembledObject {
    pub bytes: Vec<u8>,
}

pub fn assemble_bytes(source: &str) -> Result<AssembledObject, AsmError> {
    let mut ctx = AssemblerCtx::new();

    run_pass(&mut ctx, source, Pass::Sizing)?;
    ctx.symtab.assign_elf_indices();

    if ctx.format == OutputFormat::Bin {
        let org = ctx.org.unwrap_or(0);
        ctx.text_base = org;
        ctx.data_base = org + ctx.text.size;
        ctx.bss_base = ctx.data_base + ctx.data.size;
    }

    let sizing_text_size = ctx.text.size;
    let sizing_data_size = ctx.data.size;
    let sizing_bss_size = ctx.bss_size;

    // Pass 2 re-runs from a clean section/symbol state but keeps the
    // finalized ELF indices, binary bases, and global directive state
    // (format/code16/org) established above.
    ctx.pass = Pass::Emitting;
    ctx.text.bytes.clear();
    ctx.text.size = 0;
    ctx.data.bytes.clear();
    ctx.data.size = 0;
    ctx.bss_size = 0;
    ctx.cur_section = Section::Text;
    ctx.symtab.current_scope = None;
    ctx.rel_text.clear();
    ctx.rel_data.clear();

    run_pass(&mut ctx, source, Pass::Emitting)?;

    debug_assert_eq!(ctx.text.size, sizing_text_size);
    debug_assert_eq!(ctx.data.size, sizing_data_size);
    debug_assert_eq!(ctx.bss_size, sizing_bss_size);

    let bytes = match ctx.format {
        OutputFormat::Elf => output::elf::write(&ctx),
        OutputFormat::Bin => output::bin::write(&ctx),
    };
    Ok(AssembledObject { bytes })
}

fn run_pass(ctx: &mut AssemblerCtx, source: &str, pass: Pass) -> Result<(), AsmError> {
    ctx.pass = pass;
    for (i, raw) in source.lines().enumerate() {
        let line_no = i + 1;
        process_line(ctx, raw, line_no)?;
    }
    Ok(())
}

fn process_line(ctx: &mut AssemblerCtx, raw: &str, line: usize) -> Result<(), AsmError> {
    let parsed = split_line(raw);

    if let Some(label) = &parsed.label {
        ctx.symtab
            .define_label(label, ctx.cur_section, ctx.cur_offset() as i64, line)?;
    }

    let Some(mnemonic) = &parsed.mnemonic else {
        return Ok(());
    };

    // `NAME equ EXPR` — irregular shape: the "mnemonic" slot actually holds
    // the constant's name, and the first operand starts with the `equ`
    // keyword rather than being a real operand.
    if let Some(first) = parsed.operands.first() {
        if let Some(rest) = strip_keyword(first, "equ") {
            let value = eval(rest, &ctx.symtab, line)?;
            let name = ctx.symtab.normalize(mnemonic, line)?;
            ctx.symtab.add(&name, Binding::Local, Section::Abs, value);
            return Ok(());
        }
    }

    if handle_directive(ctx, mnemonic, &parsed.operands, line)? {
        return Ok(());
    }

    dispatch_instruction(ctx, mnemonic, &parsed.operands, line)
}

fn strip_keyword<'a>(s: &'a str, kw: &str) -> Option<&'a str> {
    let trimmed = s.trim_start();
    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(i) => (&trimmed[..i], trimmed[i..].trim_start()),
        None => (trimmed, ""),
    };
    if first.eq_ignore_ascii_case(kw) {
        Some(rest)
    } else {
        None
    }
}

fn dispatch_instruction(
    ctx: &mut AssemblerCtx,
    mnemonic: &str,
    raw_operands: &[String],
    line: usize,
) -> Result<(), AsmError> {
    // `movb` is `mov` with an explicit byte-size override folded in.
    let (mnemonic, forced_size) = if mnemonic.eq_ignore_ascii_case("movb") {
        ("mov", Some(1u8))
    } else {
        (mnemonic, None)
    };

    let mut sizes = Vec::with_capacity(raw_operands.len());
    let mut operands = Vec::with_capacity(raw_operands.len());
    for raw in raw_operands {
        let (size_override, rest) = strip_size_override(raw);
        let size_override = forced_size.or(size_override);
        let op = parse_operand(rest, size_override, ctx.code16, &ctx.symtab, line)?;
        sizes.push(size_override);
        operands.push(op);
    }

    let a = operands.first().cloned().unwrap_or(Operand::None);
    let b = operands.get(1).cloned().unwrap_or(Operand::None);
    let explicit_size = sizes.iter().flatten().next().copied();

    let candidates = ctx.isa_index.rows(crate::isa::ISA, mnemonic);
    if candidates.is_empty() {
        return Err(AsmError::UnknownInstruction {
            line,
            mnemonic: mnemonic.to_string(),
        });
    }

    let size = choose_size(explicit_size, &a, &b, ctx.default_size);

    let def: &InstrDef = candidates
        .iter()
        .find(|d| {
            if !operand_shape_fits(d.mode, &a, &b) {
                return false;
            }
            // movzx/movsx select their opcode by the *source* operand's
            // width, not the destination's — an explicit size override on
            // the source wins, else a bare register source supplies it.
            let row_size = match d.mode {
                EncMode::Op0FRm if b.is_register() => explicit_size.unwrap_or_else(|| b.size().unwrap_or(size)),
                _ => size,
            };
            if d.size != 0 && d.size != row_size {
                return false;
            }
            // The 0x83 sign-extended-imm8 form only applies when the
            // immediate actually fits in a signed byte; otherwise fall
            // through to the full-width 0x81/0x80 row.
            if d.op_base == 0x83 {
                if let Operand::Immediate { value, .. } = b {
                    if !(-128..=127).contains(value) {
                        return false;
                    }
                }
            }
            true
        })
        .copied()
        .ok_or_else(|| AsmError::UnknownInstruction {
            line,
            mnemonic: mnemonic.to_string(),
        })?;

    assemble_instr(ctx, def, &a, &b, size, line)
}

/// Does `mode`'s wire shape accept operands of these *kinds* (register vs.
/// memory vs. immediate vs. absent)? Ported from the reference assembler's
/// per-mode `continue` gates, which key off exactly this, not operand size.
fn operand_shape_fits(mode: EncMode, a: &Operand, b: &Operand) -> bool {
    let a_imm = matches!(a, Operand::Immediate { .. });
    let b_imm = matches!(b, Operand::Immediate { .. });
    match mode {
        EncMode::None | EncMode::Op0F => true,
        EncMode::OI => a.is_register() && (b_imm || matches!(b, Operand::None)),
        EncMode::RM => a.is_register() && !b_imm,
        EncMode::MR => b.is_register() && !a_imm,
        EncMode::MI => b_imm && !a_imm,
        EncMode::M => !a_imm && matches!(b, Operand::None),
        EncMode::I => a_imm,
        EncMode::Shift => !a_imm && b_imm,
        EncMode::J | EncMode::Jcc | EncMode::LoopRel => a_imm,
        EncMode::Op0FRm => a.is_register() && !b_imm,
        EncMode::Op0FMr => !a_imm,
        EncMode::Op0FBitMr => b.is_register() && !a_imm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_program_produces_minimal_elf() {
        let obj = assemble_bytes("").unwrap();
        assert_eq!(&obj.bytes[0..4], b"\x7fELF");
    }

    #[test]
    fn absolute_symbol_in_data_is_excluded_from_elf_indices() {
        let src = "SIZE equ 16\nsection data\nglobal SIZE\ndd SIZE\n";
        let obj = assemble_bytes(src).unwrap();
        assert_eq!(&obj.bytes[0..4], b"\x7fELF");
    }

    #[test]
    fn nop_emits_single_byte_text_section() {
        let src = "nop\n";
        let obj = assemble_bytes(src).unwrap();
        assert_eq!(&obj.bytes[0..4], b"\x7fELF");
    }

    #[test]
    fn binary_format_with_org_places_text_at_origin() {
        let src = "format binary\norg 0x7c00\nnop\n";
        let obj = assemble_bytes(src).unwrap();
        assert_eq!(obj.bytes[0], 0x90);
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let err = assemble_bytes("frobnicate\n").unwrap_err();
        assert!(matches!(err, AsmError::UnknownInstruction { .. }));
    }

    #[test]
    fn local_label_before_global_errors() {
        let err = assemble_bytes(".loop:\nnop\n").unwrap_err();
        assert!(matches!(err, AsmError::LocalBeforeGlobal { .. }));
    }

    #[test]
    fn forward_jump_to_a_later_label_does_not_error_during_the_sizing_pass() {
        // `done` isn't defined until after `je done`; pass 1 must tolerate
        // the as-yet-undefined symbol rather than failing outright.
        let src = "je done\nnop\ndone:\nret\n";
        assert!(assemble_bytes(src).is_ok());
    }

    #[test]
    fn reference_to_a_symbol_undefined_anywhere_in_the_file_is_an_error() {
        let err = assemble_bytes("jmp nowhere\n").unwrap_err();
        assert!(matches!(err, AsmError::UndefinedSymbol { .. }));
    }
}

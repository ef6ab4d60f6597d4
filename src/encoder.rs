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

//! ModR/M + SIB emission and the `assemble_instr` dispatcher that drives the
//! `EncMode` wire forms from `isa.rs`.

use crate::context::{AssemblerCtx, Pass, RelocType};
use crate::errors::AsmError;
use crate::isa::{EncMode, InstrDef};
use crate::operand::Operand;
use crate::symbols::Section;

fn reg_field(num: u8) -> u8 {
    num & 0x07
}

/// 16-bit addressing uses a fixed 8-combination rm table; scaled index and
/// arbitrary register pairs are not representable.
fn modrm16_rm(base: Option<u8>, index: Option<u8>) -> Option<u8> {
    // register numbers per get_reg_info's 16-bit table: BX=3 BP=5 SI=6 DI=7
    match (base, index) {
        (Some(3), Some(6)) | (Some(6), Some(3)) => Some(0b000), // BX+SI
        (Some(3), Some(7)) | (Some(7), Some(3)) => Some(0b001), // BX+DI
        (Some(5), Some(6)) | (Some(6), Some(5)) => Some(0b010), // BP+SI
        (Some(5), Some(7)) | (Some(7), Some(5)) => Some(0b011), // BP+DI
        (Some(6), None) => Some(0b100),                         // SI
        (Some(7), None) => Some(0b101),                         // DI
        (Some(5), None) => Some(0b110),                         // BP
        (Some(3), None) => Some(0b111),                         // BX
        (None, None) => None,                                   // pure disp16, handled separately
        _ => None,
    }
}

fn emit_modrm16(
    ctx: &mut AssemblerCtx,
    reg: u8,
    base: Option<u8>,
    index: Option<u8>,
    disp: i64,
    label: &Option<String>,
    line: usize,
) -> Result<(), AsmError> {
    use crate::context::OutputFormat;

    if label.is_some() && ctx.format == crate::context::OutputFormat::Elf {
        return Err(AsmError::Unsupported16BitReloc {
            line,
            name: label.clone().unwrap(),
        });
    }

    if base.is_none() && index.is_none() {
        // [disp16] absolute
        ctx.emit_byte((0b00 << 6) | (reg_field(reg) << 3) | 0b110);
        let addr = resolve_mem_value(ctx, disp, label, line)?;
        ctx.emit_word(addr as u16);
        return Ok(());
    }

    let rm = modrm16_rm(base, index).ok_or_else(|| AsmError::AddressingMode16Bit {
        line,
        reason: "register combination is not representable in 16-bit addressing".to_string(),
    })?;

    let bp_only = base == Some(5) && index.is_none();
    let needs_disp8 = disp != 0 || bp_only;
    let mode = if label.is_some() {
        0b01
    } else if disp == 0 && !bp_only {
        0b00
    } else if (-128..=127).contains(&disp) {
        0b01
    } else {
        0b10
    };

    ctx.emit_byte((mode << 6) | (reg_field(reg) << 3) | rm);
    if label.is_some() {
        let addr = resolve_mem_value(ctx, disp, label, line)?;
        ctx.emit_bytes(&(addr as i8).to_le_bytes());
    } else {
        match mode {
            0b01 => ctx.emit_bytes(&(disp as i8).to_le_bytes()),
            0b10 => ctx.emit_word(disp as u16),
            _ if needs_disp8 => ctx.emit_bytes(&(disp as i8).to_le_bytes()),
            _ => {}
        }
    }
    let _ = OutputFormat::Bin;
    Ok(())
}

/// Looks up `name`'s ELF index for a relocation site, tolerating a forward
/// reference during `Pass::Sizing` the same way `resolve_abs_addr` does.
fn reloc_target_index(ctx: &AssemblerCtx, name: &str, line: usize) -> Result<u32, AsmError> {
    match ctx.symtab.find(name) {
        Some(sym) => Ok(sym.elf_index),
        None if ctx.pass == Pass::Sizing => Ok(0),
        None => Err(AsmError::UndefinedSymbol {
            line,
            name: name.to_string(),
        }),
    }
}

fn resolve_mem_value(
    ctx: &mut AssemblerCtx,
    disp: i64,
    label: &Option<String>,
    line: usize,
) -> Result<i64, AsmError> {
    match label {
        None => Ok(disp),
        Some(name) => match ctx.format {
            crate::context::OutputFormat::Bin => {
                Ok(ctx.resolve_abs_addr(name, line)? as i64 + disp)
            }
            crate::context::OutputFormat::Elf => {
                let idx = reloc_target_index(ctx, name, line)?;
                ctx.emit_reloc(idx, RelocType::Abs32);
                Ok(disp)
            }
        },
    }
}

/// 32-bit ModR/M + SIB emission. `reg` carries either a true register number
/// or an opcode extension, selected by the caller.
fn emit_modrm32(
    ctx: &mut AssemblerCtx,
    reg: u8,
    rm: &Operand,
    line: usize,
) -> Result<(), AsmError> {
    match rm {
        Operand::Register { num, .. } => {
            ctx.emit_byte(0b11_000_000 | (reg_field(reg) << 3) | reg_field(*num));
            Ok(())
        }
        Operand::Memory {
            base,
            index,
            scale,
            disp,
            label,
        } => emit_mem_modrm32(ctx, reg, *base, *index, *scale, *disp, label, line),
        _ => Err(AsmError::OperandConstraint {
            line,
            reason: "expected a register or memory operand".to_string(),
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_mem_modrm32(
    ctx: &mut AssemblerCtx,
    reg: u8,
    base: Option<u8>,
    index: Option<u8>,
    scale: u8,
    disp: i64,
    label: &Option<String>,
    line: usize,
) -> Result<(), AsmError> {
    const ESP: u8 = 4;
    const EBP: u8 = 5;

    let needs_sib = index.is_some() || base == Some(ESP);

    if base.is_none() && index.is_none() {
        ctx.emit_byte((0b00 << 6) | (reg_field(reg) << 3) | 0b101);
        let v = resolve_mem_value(ctx, disp, label, line)?;
        ctx.emit_dword(v as u32);
        return Ok(());
    }

    let bp_only_zero = base == Some(EBP) && index.is_none() && disp == 0 && label.is_none();
    let mode = if label.is_some() {
        0b10
    } else if disp == 0 && !bp_only_zero {
        0b00
    } else if bp_only_zero {
        0b01
    } else if (-128..=127).contains(&disp) {
        0b01
    } else {
        0b10
    };

    let rm_field = if needs_sib { 0b100 } else { reg_field(base.unwrap()) };
    ctx.emit_byte((mode << 6) | (reg_field(reg) << 3) | rm_field);

    if needs_sib {
        let scale_bits = match scale {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => {
                return Err(AsmError::OperandConstraint {
                    line,
                    reason: format!("invalid SIB scale {scale}"),
                })
            }
        };
        let index_field = index.map(reg_field).unwrap_or(0b100);
        let base_field = base.map(reg_field).unwrap_or(0b101);
        ctx.emit_byte((scale_bits << 6) | (index_field << 3) | base_field);
        if base.is_none() {
            let v = resolve_mem_value(ctx, disp, label, line)?;
            ctx.emit_dword(v as u32);
            return Ok(());
        }
    }

    match mode {
        0b01 if bp_only_zero => ctx.emit_bytes(&0i8.to_le_bytes()),
        0b01 => ctx.emit_bytes(&(disp as i8).to_le_bytes()),
        0b10 => {
            let v = resolve_mem_value(ctx, disp, label, line)?;
            ctx.emit_dword(v as u32);
        }
        _ => {}
    }
    Ok(())
}

fn emit_modrm(
    ctx: &mut AssemblerCtx,
    reg: u8,
    rm: &Operand,
    line: usize,
) -> Result<(), AsmError> {
    if ctx.code16 {
        match rm {
            Operand::Register { num, .. } => {
                ctx.emit_byte(0b11_000_000 | (reg_field(reg) << 3) | reg_field(*num));
                Ok(())
            }
            Operand::Memory {
                base, index, disp, label, ..
            } => emit_modrm16(ctx, reg, *base, *index, *disp, label, line),
            _ => Err(AsmError::OperandConstraint {
                line,
                reason: "expected a register or memory operand".to_string(),
            }),
        }
    } else {
        emit_modrm32(ctx, reg, rm, line)
    }
}

/// Chooses the instruction's operand size per the spec's priority order:
/// explicit size override, then the first register operand's size, then
/// the second register operand's size, then the context default.
pub fn choose_size(explicit: Option<u8>, a: &Operand, b: &Operand, default_size: u8) -> u8 {
    if let Some(s) = explicit {
        return s;
    }
    if let Some(s) = a.size() {
        if a.is_register() {
            return s;
        }
    }
    if let Some(s) = b.size() {
        if b.is_register() {
            return s;
        }
    }
    default_size
}

fn emit_size_prefix(ctx: &mut AssemblerCtx, size: u8) {
    let is_16_instr = size == 2;
    if is_16_instr != ctx.code16 {
        ctx.emit_byte(0x66);
    }
}

fn emit_immediate(ctx: &mut AssemblerCtx, op: &Operand, size: u8, line: usize) -> Result<(), AsmError> {
    if let Operand::Immediate { value, label, .. } = op {
        let v = resolve_mem_value(ctx, *value, label, line)?;
        match size {
            1 => ctx.emit_bytes(&(v as i8).to_le_bytes()),
            2 => ctx.emit_bytes(&(v as i16).to_le_bytes()),
            _ => ctx.emit_dword(v as u32),
        }
        Ok(())
    } else {
        Err(AsmError::OperandConstraint {
            line,
            reason: "expected an immediate operand".to_string(),
        })
    }
}

pub fn assemble_instr(
    ctx: &mut AssemblerCtx,
    def: &InstrDef,
    a: &Operand,
    b: &Operand,
    size: u8,
    line: usize,
) -> Result<(), AsmError> {
    match def.mode {
        EncMode::None => ctx.emit_byte(def.op_base),
        EncMode::Op0F => {
            ctx.emit_byte(0x0F);
            ctx.emit_byte(def.op_base);
        }
        EncMode::OI => {
            if size == 2 {
                emit_size_prefix(ctx, size);
            }
            let num = match a {
                Operand::Register { num, .. } => *num,
                _ => {
                    return Err(AsmError::OperandConstraint {
                        line,
                        reason: "expected a register operand".to_string(),
                    })
                }
            };
            ctx.emit_byte(def.op_base + reg_field(num));
            if matches!(b, Operand::Immediate { .. }) {
                emit_immediate(ctx, b, size, line)?;
            }
        }
        EncMode::RM => {
            emit_size_prefix(ctx, size);
            ctx.emit_byte(def.op_base);
            let reg = match a {
                Operand::Register { num, .. } => *num,
                _ => {
                    return Err(AsmError::OperandConstraint {
                        line,
                        reason: "destination must be a register in this form".to_string(),
                    })
                }
            };
            emit_modrm(ctx, reg, b, line)?;
        }
        EncMode::MR => {
            emit_size_prefix(ctx, size);
            ctx.emit_byte(def.op_base);
            let reg = match b {
                Operand::Register { num, .. } => *num,
                _ => {
                    return Err(AsmError::OperandConstraint {
                        line,
                        reason: "source must be a register in this form".to_string(),
                    })
                }
            };
            emit_modrm(ctx, reg, a, line)?;
        }
        EncMode::MI => {
            emit_size_prefix(ctx, size);
            ctx.emit_byte(def.op_base);
            emit_modrm(ctx, def.op_ext, a, line)?;
            // The 0x83 sign-extended-imm8 form always carries a single
            // immediate byte, independent of the r/m operand's width.
            let imm_size = if def.op_base == 0x83 { 1 } else { size };
            emit_immediate(ctx, b, imm_size, line)?;
        }
        EncMode::M => {
            emit_size_prefix(ctx, size);
            ctx.emit_byte(def.op_base);
            emit_modrm(ctx, def.op_ext, a, line)?;
        }
        EncMode::I => {
            // `int` always takes a single immediate byte regardless of the
            // surrounding operand size.
            if def.op_base == 0xCD {
                ctx.emit_byte(def.op_base);
                emit_immediate(ctx, a, 1, line)?;
            } else {
                emit_size_prefix(ctx, size);
                ctx.emit_byte(def.op_base);
                emit_immediate(ctx, a, size, line)?;
            }
        }
        EncMode::Shift => {
            emit_size_prefix(ctx, size);
            ctx.emit_byte(def.op_base);
            emit_modrm(ctx, def.op_ext, a, line)?;
            if let Operand::Immediate { value, .. } = b {
                ctx.emit_byte(*value as u8);
            }
        }
        EncMode::J => {
            ctx.emit_byte(def.op_base);
            emit_jump_target(ctx, a, line)?;
        }
        EncMode::LoopRel => {
            ctx.emit_byte(def.op_base);
            emit_short_jump_target(ctx, a, line)?;
        }
        EncMode::Jcc => {
            ctx.emit_byte(0x0F);
            ctx.emit_byte(def.op_base);
            emit_jump_target(ctx, a, line)?;
        }
        EncMode::Op0FMr => {
            ctx.emit_byte(0x0F);
            ctx.emit_byte(def.op_base);
            emit_modrm(ctx, 0, a, line)?;
        }
        EncMode::Op0FBitMr => {
            ctx.emit_byte(0x0F);
            ctx.emit_byte(def.op_base);
            let reg = match b {
                Operand::Register { num, .. } => *num,
                _ => {
                    return Err(AsmError::OperandConstraint {
                        line,
                        reason: "source must be a register in this form".to_string(),
                    })
                }
            };
            emit_modrm(ctx, reg, a, line)?;
        }
        EncMode::Op0FRm => {
            ctx.emit_byte(0x0F);
            ctx.emit_byte(def.op_base);
            let reg = match a {
                Operand::Register { num, .. } => *num,
                _ => {
                    return Err(AsmError::OperandConstraint {
                        line,
                        reason: "destination must be a register in this form".to_string(),
                    })
                }
            };
            emit_modrm(ctx, reg, b, line)?;
        }
    }
    Ok(())
}

fn emit_jump_target(ctx: &mut AssemblerCtx, target: &Operand, line: usize) -> Result<(), AsmError> {
    let label = match target {
        Operand::Immediate { label: Some(l), .. } => Some(l.clone()),
        Operand::Immediate { value, label: None, .. } => {
            ctx.emit_dword(*value as u32);
            return Ok(());
        }
        _ => {
            return Err(AsmError::OperandConstraint {
                line,
                reason: "jump/call target must be a label or immediate".to_string(),
            })
        }
    };
    let name = label.unwrap();
    match ctx.format {
        crate::context::OutputFormat::Bin => {
            match ctx.symtab.find(&name) {
                Some(target_sym) => {
                    if target_sym.section != ctx.cur_section && target_sym.section != Section::Abs
                    {
                        return Err(AsmError::CrossSectionJump { line });
                    }
                }
                None if ctx.pass == Pass::Sizing => {}
                None => {
                    return Err(AsmError::UndefinedSymbol {
                        line,
                        name: name.clone(),
                    })
                }
            }
            let target_addr = ctx.resolve_abs_addr(&name, line)?;
            let next_ip = ctx.resolve_abs_addr_of_cur(4);
            ctx.emit_dword(target_addr.wrapping_sub(next_ip));
        }
        crate::context::OutputFormat::Elf => {
            let idx = reloc_target_index(ctx, &name, line)?;
            ctx.emit_reloc(idx, RelocType::Pc32);
            ctx.emit_dword(0);
        }
    }
    Ok(())
}

/// `loop`'s rel8 target: always computed directly against the current
/// section, never relocated — there's no ELF i386 relocation type for an
/// 8-bit PC-relative displacement, so a cross-section target is a hard
/// error rather than an unrepresentable relocation.
fn emit_short_jump_target(
    ctx: &mut AssemblerCtx,
    target: &Operand,
    line: usize,
) -> Result<(), AsmError> {
    let name = match target {
        Operand::Immediate { label: Some(l), .. } => l.clone(),
        Operand::Immediate { value, label: None, .. } => {
            ctx.emit_bytes(&(*value as i8).to_le_bytes());
            return Ok(());
        }
        _ => {
            return Err(AsmError::OperandConstraint {
                line,
                reason: "loop target must be a label or immediate".to_string(),
            })
        }
    };
    match ctx.symtab.find(&name) {
        Some(target_sym) => {
            if target_sym.section != ctx.cur_section && target_sym.section != Section::Abs {
                return Err(AsmError::CrossSectionJump { line });
            }
        }
        None if ctx.pass == Pass::Sizing => {}
        None => {
            return Err(AsmError::UndefinedSymbol {
                line,
                name: name.clone(),
            })
        }
    }
    let target_addr = ctx.resolve_abs_addr(&name, line)?;
    let next_ip = ctx.resolve_abs_addr_of_cur(1);
    let delta = target_addr.wrapping_sub(next_ip) as i32;
    if !(-128..=127).contains(&delta) {
        return Err(AsmError::OperandConstraint {
            line,
            reason: format!("loop target out of rel8 range ({delta})"),
        });
    }
    ctx.emit_bytes(&(delta as i8).to_le_bytes());
    Ok(())
}

impl AssemblerCtx {
    /// The address immediately following the 4-byte displacement about to
    /// be emitted, used for PC-relative jump math in binary mode.
    fn resolve_abs_addr_of_cur(&self, disp_width: u32) -> u32 {
        let base = match self.cur_section {
            Section::Text => self.text_base,
            Section::Data => self.data_base,
            Section::Bss => self.bss_base,
            Section::Abs => 0,
        };
        base + self.cur_offset() + disp_width
    }
}

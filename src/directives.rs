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

use crate::context::{AssemblerCtx, OutputFormat, Pass};
use crate::errors::AsmError;
use crate::expr::eval;
use crate::symbols::{Binding, Section};

/// Returns `true` if `mnemonic` named a directive and it was handled;
/// `false` means the caller should try instruction dispatch instead.
pub fn handle_directive(
    ctx: &mut AssemblerCtx,
    mnemonic: &str,
    operands: &[String],
    line: usize,
) -> Result<bool, AsmError> {
    let kw = mnemonic.to_ascii_lowercase();
    match kw.as_str() {
        "format" => {
            let arg = arg(operands, 0, line, "format")?;
            ctx.format = match arg.to_ascii_lowercase().as_str() {
                "elf" => OutputFormat::Elf,
                "binary" | "bin" => OutputFormat::Bin,
                other => {
                    return Err(AsmError::DirectiveMisuse {
                        line,
                        reason: format!("unknown output format '{other}'"),
                    })
                }
            };
            Ok(true)
        }
        "use16" => {
            ctx.code16 = true;
            ctx.default_size = 2;
            Ok(true)
        }
        "use32" => {
            ctx.code16 = false;
            ctx.default_size = 4;
            Ok(true)
        }
        "org" => {
            if ctx.format != OutputFormat::Bin {
                return Err(AsmError::DirectiveMisuse {
                    line,
                    reason: "'org' is only valid in binary format".to_string(),
                });
            }
            let v = eval(&arg(operands, 0, line, "org")?, &ctx.symtab, line)?;
            ctx.org = Some(v as u32);
            Ok(true)
        }
        "section" => {
            let name = arg(operands, 0, line, "section")?;
            ctx.cur_section = match name.to_ascii_lowercase().as_str() {
                "text" | ".text" => Section::Text,
                "data" | ".data" => Section::Data,
                "bss" | ".bss" => Section::Bss,
                other => {
                    return Err(AsmError::DirectiveMisuse {
                        line,
                        reason: format!("unknown section '{other}'"),
                    })
                }
            };
            Ok(true)
        }
        "global" => {
            for raw in operands {
                let name = ctx.symtab.normalize(raw, line)?;
                set_binding(ctx, &name, Binding::Global);
            }
            Ok(true)
        }
        "extern" => {
            for raw in operands {
                let name = ctx.symtab.normalize(raw, line)?;
                set_binding(ctx, &name, Binding::Extern);
            }
            Ok(true)
        }
        "align" => {
            let n = eval(&arg(operands, 0, line, "align")?, &ctx.symtab, line)? as u32;
            align_section(ctx, n);
            Ok(true)
        }
        "db" => {
            emit_data_list(ctx, operands, 1, line)?;
            Ok(true)
        }
        "dw" => {
            emit_data_list(ctx, operands, 2, line)?;
            Ok(true)
        }
        "dd" => {
            emit_data_list(ctx, operands, 4, line)?;
            Ok(true)
        }
        "resb" | "rb" => {
            reserve(ctx, &arg(operands, 0, line, &kw)?, 1, line)?;
            Ok(true)
        }
        "resw" | "rw" => {
            reserve(ctx, &arg(operands, 0, line, &kw)?, 2, line)?;
            Ok(true)
        }
        "resd" | "rd" => {
            reserve(ctx, &arg(operands, 0, line, &kw)?, 4, line)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn arg(operands: &[String], idx: usize, line: usize, directive: &str) -> Result<String, AsmError> {
    operands
        .get(idx)
        .cloned()
        .ok_or_else(|| AsmError::DirectiveMisuse {
            line,
            reason: format!("'{directive}' requires an argument"),
        })
}

/// Records a `global`/`extern` binding. The placeholder section is `Text`,
/// never `Abs` — an `extern` symbol must still receive a real ELF symbol
/// index (with `st_shndx = SHN_UNDEF`), and `Abs` symbols are excluded from
/// the symbol table entirely.
fn set_binding(ctx: &mut AssemblerCtx, name: &str, binding: Binding) {
    if let Some(sym) = ctx.symtab.find_mut(name) {
        sym.binding = binding;
    } else {
        ctx.symtab.add(name, binding, Section::Text, 0);
    }
}

fn align_section(ctx: &mut AssemblerCtx, n: u32) {
    if n <= 1 {
        return;
    }
    let cur = ctx.cur_offset();
    let rem = cur % n;
    if rem == 0 {
        return;
    }
    let pad = n - rem;
    for _ in 0..pad {
        ctx.emit_byte(0);
    }
}

fn reserve(ctx: &mut AssemblerCtx, count_expr: &str, unit: u32, line: usize) -> Result<(), AsmError> {
    if ctx.cur_section != Section::Bss {
        return Err(AsmError::DirectiveMisuse {
            line,
            reason: "resb/resw/resd is only valid in the .bss section".to_string(),
        });
    }
    let n = eval(count_expr, &ctx.symtab, line)? as u32;
    ctx.bss_size += n * unit;
    Ok(())
}

fn emit_data_list(
    ctx: &mut AssemblerCtx,
    items: &[String],
    unit: u8,
    line: usize,
) -> Result<(), AsmError> {
    for item in items {
        if let Some(s) = item.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            if unit != 1 {
                return Err(AsmError::DirectiveMisuse {
                    line,
                    reason: "string literals are only valid with 'db'".to_string(),
                });
            }
            for b in s.bytes() {
                ctx.emit_byte(b);
            }
            continue;
        }
        if let Some(c) = item.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            let b = c.bytes().next().ok_or_else(|| AsmError::Syntax {
                line,
                reason: "empty character literal".to_string(),
            })?;
            emit_unit(ctx, b as i64, unit, None, line)?;
            continue;
        }
        // A bare label in a `dd` initializer is emitted as a relocation
        // against that symbol rather than evaluated as a constant.
        if unit == 4 && crate::operand::get_reg_info(item).is_none() && is_plain_identifier(item) {
            if ctx.symtab.find(item).map(|s| s.section != Section::Abs).unwrap_or(true) {
                emit_unit(ctx, 0, unit, Some(item.clone()), line)?;
                continue;
            }
        }
        let v = eval(item, &ctx.symtab, line)?;
        emit_unit(ctx, v, unit, None, line)?;
    }
    Ok(())
}

fn is_plain_identifier(s: &str) -> bool {
    s.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_' || c == '.').unwrap_or(false)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

fn emit_unit(
    ctx: &mut AssemblerCtx,
    value: i64,
    unit: u8,
    label: Option<String>,
    line: usize,
) -> Result<(), AsmError> {
    match label {
        Some(name) => match ctx.format {
            OutputFormat::Bin => {
                let addr = ctx.resolve_abs_addr(&name, line)? as i64 + value;
                ctx.emit_dword(addr as u32);
            }
            OutputFormat::Elf => {
                let idx = match ctx.symtab.find(&name) {
                    Some(sym) => sym.elf_index,
                    None if ctx.pass == Pass::Sizing => 0,
                    None => {
                        return Err(AsmError::UndefinedSymbol {
                            line,
                            name: name.clone(),
                        })
                    }
                };
                ctx.emit_reloc(idx, crate::context::RelocType::Abs32);
                ctx.emit_dword(value as u32);
            }
        },
        None => match unit {
            1 => ctx.emit_byte(value as u8),
            2 => ctx.emit_word(value as u16),
            _ => ctx.emit_dword(value as u32),
        },
    }
    Ok(())
}

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

//! Operand classification: register / immediate / memory, including the
//! bracketed memory-operand grammar and the 16-bit addressing restrictions.

use crate::errors::AsmError;
use crate::expr::eval;
use crate::symbols::SymbolTable;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Register { num: u8, size: u8 },
    Immediate { value: i64, label: Option<String>, size: u8 },
    Memory {
        base: Option<u8>,
        index: Option<u8>,
        scale: u8,
        disp: i64,
        label: Option<String>,
    },
}

impl Operand {
    pub fn size(&self) -> Option<u8> {
        match self {
            Operand::Register { size, .. } => Some(*size),
            Operand::Immediate { size, .. } => Some(*size),
            _ => None,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory { .. })
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register { .. })
    }
}

/// `(register_number, size_in_bytes)`; `None` if not a recognized register.
pub fn get_reg_info(name: &str) -> Option<(u8, u8)> {
    let upper = name.to_ascii_uppercase();
    const R32: [&str; 8] = ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI"];
    const R16: [&str; 8] = ["AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI"];
    const R8: [&str; 8] = ["AL", "CL", "DL", "BL", "AH", "CH", "DH", "BH"];
    if let Some(n) = R32.iter().position(|r| *r == upper) {
        return Some((n as u8, 4));
    }
    if let Some(n) = R16.iter().position(|r| *r == upper) {
        return Some((n as u8, 2));
    }
    if let Some(n) = R8.iter().position(|r| *r == upper) {
        return Some((n as u8, 1));
    }
    None
}

/// BX=3, BP=5, SI=6, DI=7 are the only registers legal inside a 16-bit
/// addressing-mode bracket.
pub fn is_16bit_addr_reg(num: u8) -> bool {
    matches!(num, 3 | 5 | 6 | 7)
}

pub fn parse_operand(
    raw: &str,
    explicit_size: Option<u8>,
    code16: bool,
    symtab: &SymbolTable,
    line: usize,
) -> Result<Operand, AsmError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Operand::None);
    }
    if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return parse_memory(inner.trim(), code16, symtab, line);
    }
    if let Some((num, size)) = get_reg_info(raw) {
        return Ok(Operand::Register { num, size });
    }
    // Immediate: either a pure constant expression, or a bare label that
    // will be resolved via relocation at emission time.
    if is_bare_label(raw, symtab) {
        return Ok(Operand::Immediate {
            value: 0,
            label: Some(raw.to_string()),
            size: explicit_size.unwrap_or(4),
        });
    }
    let value = eval(raw, symtab, line)?;
    Ok(Operand::Immediate {
        value,
        label: None,
        size: explicit_size.unwrap_or(default_imm_size(value)),
    })
}

fn default_imm_size(value: i64) -> u8 {
    if (i8::MIN as i64..=u8::MAX as i64).contains(&value) {
        1
    } else if (i16::MIN as i64..=u16::MAX as i64).contains(&value) {
        2
    } else {
        4
    }
}

/// A bare identifier that isn't a register and doesn't evaluate as a pure
/// numeric/absolute-symbol expression is treated as a forward/extern label
/// reference rather than reported as undefined at parse time.
fn is_bare_label(raw: &str, symtab: &SymbolTable) -> bool {
    let is_ident = raw
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_' || c == '.')
        .unwrap_or(false)
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if !is_ident {
        return false;
    }
    match symtab.find(raw) {
        Some(sym) => sym.section != crate::symbols::Section::Abs,
        None => true,
    }
}

fn parse_memory(
    inner: &str,
    code16: bool,
    symtab: &SymbolTable,
    line: usize,
) -> Result<Operand, AsmError> {
    if inner.is_empty() {
        return Err(AsmError::Syntax {
            line,
            reason: "empty memory operand".to_string(),
        });
    }
    let mut base: Option<u8> = None;
    let mut index: Option<u8> = None;
    let mut scale: u8 = 1;
    let mut disp: i64 = 0;
    let mut label: Option<String> = None;

    for (term_idx, raw_term) in split_additive_terms(inner).into_iter().enumerate() {
        let (term, negate) = raw_term;
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        if let Some((mul_lhs, mul_rhs)) = term.split_once('*') {
            let (reg_part, scale_part) = if get_reg_info(mul_lhs.trim()).is_some() {
                (mul_lhs.trim(), mul_rhs.trim())
            } else {
                (mul_rhs.trim(), mul_lhs.trim())
            };
            let (num, _) = get_reg_info(reg_part).ok_or_else(|| AsmError::OperandConstraint {
                line,
                reason: format!("'{reg_part}' is not a valid index register"),
            })?;
            let s: i64 = scale_part.parse().map_err(|_| AsmError::OperandConstraint {
                line,
                reason: format!("invalid scale '{scale_part}'"),
            })?;
            if code16 {
                return Err(AsmError::AddressingMode16Bit {
                    line,
                    reason: "scaled index addressing is not available in 16-bit mode".to_string(),
                });
            }
            if ![1, 2, 4, 8].contains(&s) {
                return Err(AsmError::OperandConstraint {
                    line,
                    reason: format!("scale must be 1, 2, 4, or 8, got {s}"),
                });
            }
            if index.is_some() {
                return Err(AsmError::OperandConstraint {
                    line,
                    reason: "multiple index registers in memory operand".to_string(),
                });
            }
            index = Some(num);
            scale = s as u8;
            continue;
        }
        if let Some((num, size)) = get_reg_info(term) {
            if code16 && !is_16bit_addr_reg(num) {
                return Err(AsmError::AddressingMode16Bit {
                    line,
                    reason: format!("register '{term}' is not valid in a 16-bit address"),
                });
            }
            if !code16 && size != 4 {
                return Err(AsmError::OperandConstraint {
                    line,
                    reason: format!("'{term}' cannot address memory in 32-bit mode"),
                });
            }
            if base.is_none() && term_idx == 0 {
                base = Some(num);
            } else if base.is_none() {
                base = Some(num);
            } else if index.is_none() {
                index = Some(num);
            } else {
                return Err(AsmError::OperandConstraint {
                    line,
                    reason: "too many registers in memory operand".to_string(),
                });
            }
            continue;
        }
        if is_bare_label(term, symtab) {
            if label.is_some() {
                return Err(AsmError::OperandConstraint {
                    line,
                    reason: "multiple labels in memory operand".to_string(),
                });
            }
            label = Some(term.to_string());
            continue;
        }
        let v = eval(term, symtab, line)?;
        disp += if negate { -v } else { v };
    }

    if code16 {
        if let Some(b) = base {
            if !is_16bit_addr_reg(b) {
                return Err(AsmError::AddressingMode16Bit {
                    line,
                    reason: "base register not legal in 16-bit addressing".to_string(),
                });
            }
        }
        if let Some(i) = index {
            if !is_16bit_addr_reg(i) {
                return Err(AsmError::AddressingMode16Bit {
                    line,
                    reason: "index register not legal in 16-bit addressing".to_string(),
                });
            }
        }
    }

    Ok(Operand::Memory {
        base,
        index,
        scale,
        disp,
        label,
    })
}

/// Splits `a+b*4-8` into `[(a,false), (b*4, false), (8, true)]` without
/// touching brackets or parens (none are legal inside a memory operand).
fn split_additive_terms(s: &str) -> Vec<(String, bool)> {
    let mut terms = Vec::new();
    let mut cur = String::new();
    let mut negate = false;
    let mut chars = s.chars().peekable();
    let mut first = true;
    while let Some(c) = chars.next() {
        if (c == '+' || c == '-') && !cur.trim().is_empty() {
            terms.push((std::mem::take(&mut cur), negate));
            negate = c == '-';
            first = false;
            continue;
        }
        if (c == '+' || c == '-') && cur.trim().is_empty() && first {
            negate = c == '-';
            first = false;
            continue;
        }
        cur.push(c);
    }
    if !cur.trim().is_empty() {
        terms.push((cur, negate));
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolTable;

    #[test]
    fn recognizes_registers_by_size() {
        assert_eq!(get_reg_info("EAX"), Some((0, 4)));
        assert_eq!(get_reg_info("ax"), Some((0, 2)));
        assert_eq!(get_reg_info("bl"), Some((3, 1)));
        assert_eq!(get_reg_info("nope"), None);
    }

    #[test]
    fn sixteen_bit_addr_regs_are_restricted() {
        assert!(is_16bit_addr_reg(3)); // BX
        assert!(is_16bit_addr_reg(5)); // BP
        assert!(!is_16bit_addr_reg(0)); // AX not legal
    }

    #[test]
    fn parses_plain_register_operand() {
        let t = SymbolTable::new();
        let op = parse_operand("eax", None, false, &t, 1).unwrap();
        assert_eq!(op, Operand::Register { num: 0, size: 4 });
    }

    #[test]
    fn parses_absolute_memory_operand() {
        let t = SymbolTable::new();
        let op = parse_operand("[0x1000]", None, false, &t, 1).unwrap();
        match op {
            Operand::Memory {
                base, index, disp, label, ..
            } => {
                assert!(base.is_none());
                assert!(index.is_none());
                assert_eq!(disp, 0x1000);
                assert!(label.is_none());
            }
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn rejects_32bit_memory_register_in_16bit_mode() {
        let t = SymbolTable::new();
        let err = parse_operand("[eax]", None, true, &t, 1).unwrap_err();
        assert!(matches!(err, AsmError::AddressingMode16Bit { .. }));
    }
}

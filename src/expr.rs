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

//! Recursive-descent constant expression evaluator.
//!
//! Precedence, lowest to highest: `|` `^` `&` (`<<` `>>`) (`+` `-`) (`*` `/`)
//! unary `+`/`-`, primary. Division by zero returns the left operand
//! unchanged rather than erroring — a documented quirk inherited from the
//! reference assembler, preserved because downstream tests depend on it.

use crate::errors::AsmError;
use crate::symbols::{Section, SymbolTable};

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    symtab: &'a SymbolTable,
    line: usize,
}

const OPERATOR_CHARS: &[u8] = b"+-*/&|^<>()";

/// Fast path for the overwhelmingly common case of a bare number or bare
/// identifier with no operators at all.
pub fn eval_simple_number(expr: &str, symtab: &SymbolTable, line: usize) -> Option<i64> {
    let trimmed = expr.trim();
    if trimmed.is_empty() || trimmed.bytes().any(|b| OPERATOR_CHARS.contains(&b)) {
        return None;
    }
    parse_number(trimmed).or_else(|| lookup_identifier(trimmed, symtab).ok())
}

pub fn eval(expr: &str, symtab: &SymbolTable, line: usize) -> Result<i64, AsmError> {
    if let Some(v) = eval_simple_number(expr, symtab, line) {
        return Ok(v);
    }
    let mut p = Parser {
        bytes: expr.trim().as_bytes(),
        pos: 0,
        symtab,
        line,
    };
    let v = p.parse_or()?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(AsmError::Syntax {
            line,
            reason: format!("unexpected trailing characters in expression '{expr}'"),
        });
    }
    Ok(v)
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&mut self) -> Option<(u8, u8)> {
        self.skip_ws();
        if self.pos + 1 < self.bytes.len() {
            Some((self.bytes[self.pos], self.bytes[self.pos + 1]))
        } else {
            None
        }
    }

    fn parse_or(&mut self) -> Result<i64, AsmError> {
        let mut lhs = self.parse_xor()?;
        loop {
            match self.peek() {
                Some(b'|') => {
                    self.pos += 1;
                    lhs |= self.parse_xor()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_xor(&mut self) -> Result<i64, AsmError> {
        let mut lhs = self.parse_and()?;
        loop {
            match self.peek() {
                Some(b'^') => {
                    self.pos += 1;
                    lhs ^= self.parse_and()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_and(&mut self) -> Result<i64, AsmError> {
        let mut lhs = self.parse_shift()?;
        loop {
            match self.peek() {
                Some(b'&') => {
                    self.pos += 1;
                    lhs &= self.parse_shift()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_shift(&mut self) -> Result<i64, AsmError> {
        let mut lhs = self.parse_add()?;
        loop {
            match self.peek2() {
                Some((b'<', b'<')) => {
                    self.pos += 2;
                    lhs <<= self.parse_add()?;
                }
                Some((b'>', b'>')) => {
                    self.pos += 2;
                    lhs >>= self.parse_add()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_add(&mut self) -> Result<i64, AsmError> {
        let mut lhs = self.parse_mul()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    lhs += self.parse_mul()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    lhs -= self.parse_mul()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_mul(&mut self) -> Result<i64, AsmError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    lhs *= self.parse_unary()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    // Documented quirk: division by zero returns the left operand.
                    lhs = if rhs == 0 { lhs } else { lhs / rhs };
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<i64, AsmError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.parse_unary()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<i64, AsmError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let v = self.parse_or()?;
                self.skip_ws();
                if self.peek() != Some(b')') {
                    return Err(AsmError::Syntax {
                        line: self.line,
                        reason: "missing closing ')' in expression".to_string(),
                    });
                }
                self.pos += 1;
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() => self.parse_number_token(),
            Some(c) if c == b'_' || c.is_ascii_alphabetic() || c == b'.' => {
                self.parse_identifier_token()
            }
            _ => Err(AsmError::Syntax {
                line: self.line,
                reason: "expected a number, identifier, or '(' in expression".to_string(),
            }),
        }
    }

    fn parse_number_token(&mut self) -> Result<i64, AsmError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'x')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        parse_number(text).ok_or_else(|| AsmError::Syntax {
            line: self.line,
            reason: format!("invalid numeric literal '{text}'"),
        })
    }

    fn parse_identifier_token(&mut self) -> Result<i64, AsmError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric()
                || self.bytes[self.pos] == b'_'
                || self.bytes[self.pos] == b'.'
                || self.bytes[self.pos] == b'$')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        lookup_identifier(text, self.symtab)
    }
}

/// A symbol that exists but is not absolute evaluates to 0 in a constant
/// expression; only `equ`-bound (`Abs`) symbols carry a usable value here.
fn lookup_identifier(name: &str, symtab: &SymbolTable) -> Result<i64, AsmError> {
    match symtab.find(name) {
        Some(sym) if sym.section == Section::Abs => Ok(sym.value),
        Some(_) => Ok(0),
        None => Ok(0),
    }
}

fn parse_number(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<i64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Binding;

    fn empty_table() -> SymbolTable {
        SymbolTable::new()
    }

    #[test]
    fn precedence_tower() {
        let t = empty_table();
        assert_eq!(eval("1+2*3", &t, 1).unwrap(), 7);
        assert_eq!(eval("(1+2)*3", &t, 1).unwrap(), 9);
        assert_eq!(eval("1<<2+1", &t, 1).unwrap(), 8);
        assert_eq!(eval("6&3|8", &t, 1).unwrap(), 10);
        assert_eq!(eval("5^1", &t, 1).unwrap(), 4);
    }

    #[test]
    fn division_by_zero_returns_left_operand() {
        let t = empty_table();
        assert_eq!(eval("10/0", &t, 1).unwrap(), 10);
    }

    #[test]
    fn hex_and_decimal_literals() {
        let t = empty_table();
        assert_eq!(eval("0x10", &t, 1).unwrap(), 16);
        assert_eq!(eval("16", &t, 1).unwrap(), 16);
    }

    #[test]
    fn abs_symbol_resolves_value() {
        let mut t = empty_table();
        t.add("SIZE", Binding::Local, Section::Abs, 42);
        assert_eq!(eval("SIZE+1", &t, 1).unwrap(), 43);
    }

    #[test]
    fn non_abs_symbol_evaluates_to_zero() {
        let mut t = empty_table();
        t.add("label", Binding::Global, Section::Text, 10);
        assert_eq!(eval("label", &t, 1).unwrap(), 0);
    }

    #[test]
    fn fast_path_used_for_operator_free_input() {
        let t = empty_table();
        assert_eq!(eval_simple_number("0x20", &t, 1), Some(32));
        assert_eq!(eval_simple_number("1+1", &t, 1), None);
    }
}

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

//! Line tokenization: strips comments, pulls off an optional leading
//! `label:`, then splits the rest into a mnemonic/directive keyword plus a
//! comma-separated operand list. Operand strings keep their internal
//! whitespace (`"byte [ebx+4]"`) — `[...]`/`"..."`/`'...'` stay atomic
//! across both the label/mnemonic split and the comma split.

#[derive(Debug, Clone)]
pub struct Line {
    pub label: Option<String>,
    pub mnemonic: Option<String>,
    pub operands: Vec<String>,
}

pub fn strip_comment(raw: &str) -> &str {
    let mut in_string = false;
    let mut in_char = false;
    for (i, c) in raw.char_indices() {
        match c {
            '"' if !in_char => in_string = !in_string,
            '\'' if !in_string => in_char = !in_char,
            ';' if !in_string && !in_char => return &raw[..i],
            _ => {}
        }
    }
    raw
}

/// Splits `s` on top-level commas, leaving `[...]`/`"..."`/`'...'` intact.
fn split_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut in_char = false;
    for c in s.chars() {
        match c {
            '"' if !in_char => {
                in_string = !in_string;
                cur.push(c);
            }
            '\'' if !in_string => {
                in_char = !in_char;
                cur.push(c);
            }
            '[' if !in_string && !in_char => {
                depth += 1;
                cur.push(c);
            }
            ']' if !in_string && !in_char => {
                depth -= 1;
                cur.push(c);
            }
            ',' if depth == 0 && !in_string && !in_char => {
                parts.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        parts.push(cur);
    }
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn split_line(raw: &str) -> Line {
    let code = strip_comment(raw).trim_end_matches('\r').trim();
    if code.is_empty() {
        return Line {
            label: None,
            mnemonic: None,
            operands: Vec::new(),
        };
    }

    let (first_word, rest) = match code.find(char::is_whitespace) {
        Some(i) => (&code[..i], code[i..].trim_start()),
        None => (code, ""),
    };

    let mut label = None;
    let mut mnemonic_region = code;
    if let Some(stripped) = first_word.strip_suffix(':') {
        label = Some(stripped.to_string());
        mnemonic_region = rest;
    }

    let mnemonic_region = mnemonic_region.trim();
    if mnemonic_region.is_empty() {
        return Line {
            label,
            mnemonic: None,
            operands: Vec::new(),
        };
    }

    let (mnemonic, operand_region) = match mnemonic_region.find(char::is_whitespace) {
        Some(i) => (&mnemonic_region[..i], &mnemonic_region[i..]),
        None => (mnemonic_region, ""),
    };

    Line {
        label,
        mnemonic: Some(mnemonic.to_string()),
        operands: split_commas(operand_region),
    }
}

/// Strips a leading `byte|word|dword [ptr]` size override from an operand
/// string, returning `(explicit_size, remainder)`.
pub fn strip_size_override(operand: &str) -> (Option<u8>, &str) {
    let trimmed = operand.trim_start();
    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(i) => (&trimmed[..i], trimmed[i..].trim_start()),
        None => return (None, trimmed),
    };
    let size = match first.to_ascii_lowercase().as_str() {
        "byte" => Some(1u8),
        "word" => Some(2u8),
        "dword" => Some(4u8),
        _ => return (None, trimmed),
    };
    let rest = rest
        .strip_prefix("ptr")
        .or_else(|| rest.strip_prefix("PTR"))
        .map(|r| r.trim_start())
        .unwrap_or(rest);
    (size, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_comment() {
        assert_eq!(strip_comment("mov eax, 1 ; comment"), "mov eax, 1 ");
    }

    #[test]
    fn keeps_semicolon_inside_string_literal() {
        assert_eq!(strip_comment(r#"db "a;b""#), r#"db "a;b""#);
    }

    #[test]
    fn splits_mnemonic_and_operands() {
        let line = split_line("mov eax, [ebx + ecx*4 + 8]");
        assert_eq!(line.mnemonic.as_deref(), Some("mov"));
        assert_eq!(line.operands, vec!["eax", "[ebx + ecx*4 + 8]"]);
    }

    #[test]
    fn label_extracted_with_trailing_instruction() {
        let line = split_line("start: mov eax, 1");
        assert_eq!(line.label.as_deref(), Some("start"));
        assert_eq!(line.mnemonic.as_deref(), Some("mov"));
        assert_eq!(line.operands, vec!["eax", "1"]);
    }

    #[test]
    fn label_only_line() {
        let line = split_line("loop_top:");
        assert_eq!(line.label.as_deref(), Some("loop_top"));
        assert!(line.mnemonic.is_none());
    }

    #[test]
    fn size_override_is_stripped() {
        assert_eq!(strip_size_override("byte [ebx]"), (Some(1), "[ebx]"));
        assert_eq!(strip_size_override("dword ptr [ebx]"), (Some(4), "[ebx]"));
        assert_eq!(strip_size_override("eax"), (None, "eax"));
    }
}

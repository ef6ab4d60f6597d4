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

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Clone)]
pub enum AsmError {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("line {line}: unknown instruction '{mnemonic}' for the given operands")]
    UnknownInstruction { line: usize, mnemonic: String },

    #[error("line {line}: {reason}")]
    OperandConstraint { line: usize, reason: String },

    #[error("line {line}: {reason}")]
    AddressingMode16Bit { line: usize, reason: String },

    #[error("line {line}: local label used before any global label")]
    LocalBeforeGlobal { line: usize },

    #[error("line {line}: symbol name '{name}' exceeds 63 bytes after scope normalization")]
    SymbolNameTooLong { line: usize, name: String },

    #[error("line {line}: undefined symbol '{name}'")]
    UndefinedSymbol { line: usize, name: String },

    #[error("line {line}: {reason}")]
    DirectiveMisuse { line: usize, reason: String },

    #[error("line {line}: 16-bit memory operand with label '{name}' is not representable in ELF output")]
    Unsupported16BitReloc { line: usize, name: String },

    #[error("line {line}: relative jump crosses sections in binary format")]
    CrossSectionJump { line: usize },

    #[error("{0}")]
    FileIo(String),
}

impl AsmError {
    pub fn line(&self) -> Option<usize> {
        match self {
            AsmError::Syntax { line, .. }
            | AsmError::UnknownInstruction { line, .. }
            | AsmError::OperandConstraint { line, .. }
            | AsmError::AddressingMode16Bit { line, .. }
            | AsmError::LocalBeforeGlobal { line }
            | AsmError::SymbolNameTooLong { line, .. }
            | AsmError::UndefinedSymbol { line, .. }
            | AsmError::DirectiveMisuse { line, .. }
            | AsmError::Unsupported16BitReloc { line, .. }
            | AsmError::CrossSectionJump { line } => Some(*line),
            AsmError::FileIo(_) => None,
        }
    }

    /// `[ASMC ERROR] Line <N>: <msg>` — the one true diagnostic format.
    pub fn diagnostic(&self) -> String {
        match self.line() {
            Some(line) => format!("[ASMC ERROR] Line {line}: {}", self.reason_only()),
            None => format!("[ASMC ERROR] {}", self.reason_only()),
        }
    }

    fn reason_only(&self) -> String {
        let full = self.to_string();
        match full.split_once(": ") {
            Some((_, rest)) => rest.to_string(),
            None => full,
        }
    }
}

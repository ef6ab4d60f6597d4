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

use crate::errors::AsmError;
use crate::fnv::{fnv1a, next_pow2};

pub const MAX_SYMBOL_NAME: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Data,
    Bss,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    Global,
    Extern,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub binding: Binding,
    pub section: Section,
    pub value: i64,
    pub elf_index: u32,
}

/// Hand-rolled open-addressing hash table (FNV-1a, linear probing), parallel
/// to an insertion-ordered `Vec<Symbol>` so ELF symbol indices stay stable.
pub struct SymbolTable {
    buckets: Vec<Option<usize>>,
    pub syms: Vec<Symbol>,
    pub current_scope: Option<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            buckets: vec![None; next_pow2(1, 32)],
            syms: Vec::new(),
            current_scope: None,
        }
    }

    fn grow_if_needed(&mut self) {
        if self.syms.len() * 4 < self.buckets.len() * 3 {
            return;
        }
        let new_size = next_pow2(self.buckets.len() * 2, 32);
        let mut new_buckets: Vec<Option<usize>> = vec![None; new_size];
        for (idx, sym) in self.syms.iter().enumerate() {
            Self::insert_index(&mut new_buckets, &sym.name, idx);
        }
        self.buckets = new_buckets;
    }

    fn insert_index(buckets: &mut [Option<usize>], name: &str, idx: usize) {
        let mask = buckets.len() - 1;
        let mut slot = fnv1a(name) as usize & mask;
        loop {
            match buckets[slot] {
                None => {
                    buckets[slot] = Some(idx);
                    return;
                }
                Some(_) => slot = (slot + 1) & mask,
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        let mask = self.buckets.len() - 1;
        let mut slot = fnv1a(name) as usize & mask;
        let mut probes = 0;
        while probes < self.buckets.len() {
            match self.buckets[slot] {
                Some(idx) if self.syms[idx].name == name => return Some(&self.syms[idx]),
                Some(_) => {
                    slot = (slot + 1) & mask;
                    probes += 1;
                }
                None => return None,
            }
        }
        None
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        let mask = self.buckets.len() - 1;
        let mut slot = fnv1a(name) as usize & mask;
        let mut probes = 0;
        while probes < self.buckets.len() {
            match self.buckets[slot] {
                Some(idx) if self.syms[idx].name == name => return Some(&mut self.syms[idx]),
                Some(_) => {
                    slot = (slot + 1) & mask;
                    probes += 1;
                }
                None => return None,
            }
        }
        None
    }

    /// Inserts a new symbol, or returns the existing one if already present.
    pub fn add(&mut self, name: &str, binding: Binding, section: Section, value: i64) -> usize {
        if let Some(sym) = self.find_mut(name) {
            sym.binding = binding;
            sym.section = section;
            sym.value = value;
            return self.index_of(name).unwrap();
        }
        self.grow_if_needed();
        let idx = self.syms.len();
        self.syms.push(Symbol {
            name: name.to_string(),
            binding,
            section,
            value,
            elf_index: 0,
        });
        Self::insert_index(&mut self.buckets, name, idx);
        idx
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        let mask = self.buckets.len() - 1;
        let mut slot = fnv1a(name) as usize & mask;
        let mut probes = 0;
        while probes < self.buckets.len() {
            match self.buckets[slot] {
                Some(idx) if self.syms[idx].name == name => return Some(idx),
                Some(_) => {
                    slot = (slot + 1) & mask;
                    probes += 1;
                }
                None => return None,
            }
        }
        None
    }

    /// Normalizes a raw label/reference according to scoping rules: a
    /// `.`-prefixed name becomes `"<scope>$<tail>"`; anything else updates
    /// the current scope (when defining a label) or passes through
    /// unchanged (when merely referenced).
    pub fn normalize(&self, raw: &str, line: usize) -> Result<String, AsmError> {
        if let Some(tail) = raw.strip_prefix('.') {
            let scope = self
                .current_scope
                .as_ref()
                .ok_or(AsmError::LocalBeforeGlobal { line })?;
            let name = format!("{scope}${tail}");
            if name.len() > MAX_SYMBOL_NAME {
                return Err(AsmError::SymbolNameTooLong { line, name });
            }
            Ok(name)
        } else {
            if raw.len() > MAX_SYMBOL_NAME {
                return Err(AsmError::SymbolNameTooLong {
                    line,
                    name: raw.to_string(),
                });
            }
            Ok(raw.to_string())
        }
    }

    /// Defines a label at the current section/offset, updating scope if it
    /// is a global (non-local) name.
    pub fn define_label(
        &mut self,
        raw: &str,
        section: Section,
        value: i64,
        line: usize,
    ) -> Result<(), AsmError> {
        let name = self.normalize(raw, line)?;
        if !raw.starts_with('.') {
            self.current_scope = Some(raw.to_string());
        }
        let existing_binding = self.find(&name).map(|s| s.binding).unwrap_or(Binding::Local);
        self.add(&name, existing_binding, section, value);
        Ok(())
    }

    /// Assigns ELF symbol indices in insertion order, skipping `Abs` symbols
    /// (which get index 0 and are excluded from ELF output). Must run after
    /// pass 1 and before pass 2.
    pub fn assign_elf_indices(&mut self) {
        let mut next = 1u32;
        for sym in self.syms.iter_mut() {
            if sym.section == Section::Abs {
                sym.elf_index = 0;
            } else {
                sym.elf_index = next;
                next += 1;
            }
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_find_roundtrip() {
        let mut t = SymbolTable::new();
        t.add("foo", Binding::Global, Section::Text, 4);
        assert_eq!(t.find("foo").unwrap().value, 4);
        assert!(t.find("bar").is_none());
    }

    #[test]
    fn local_before_global_fails() {
        let t = SymbolTable::new();
        assert!(matches!(
            t.normalize(".loop", 3),
            Err(AsmError::LocalBeforeGlobal { line: 3 })
        ));
    }

    #[test]
    fn local_label_scopes_to_last_global() {
        let mut t = SymbolTable::new();
        t.define_label("start", Section::Text, 0, 1).unwrap();
        let name = t.normalize(".loop", 2).unwrap();
        assert_eq!(name, "start$loop");
    }

    #[test]
    fn oversized_name_rejected() {
        let t = SymbolTable::new();
        let long = "x".repeat(64);
        assert!(matches!(
            t.normalize(&long, 1),
            Err(AsmError::SymbolNameTooLong { .. })
        ));
    }

    #[test]
    fn elf_indices_skip_abs_and_preserve_insertion_order() {
        let mut t = SymbolTable::new();
        t.add("k", Binding::Local, Section::Abs, 42);
        t.add("a", Binding::Global, Section::Text, 0);
        t.add("b", Binding::Global, Section::Data, 0);
        t.assign_elf_indices();
        assert_eq!(t.find("k").unwrap().elf_index, 0);
        assert_eq!(t.find("a").unwrap().elf_index, 1);
        assert_eq!(t.find("b").unwrap().elf_index, 2);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t = SymbolTable::new();
        for i in 0..100 {
            t.add(&format!("sym{i}"), Binding::Local, Section::Text, i as i64);
        }
        for i in 0..100 {
            assert_eq!(t.find(&format!("sym{i}")).unwrap().value, i as i64);
        }
    }
}

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

//! Flat binary writer: `.text` followed immediately by `.data`, no headers,
//! `.bss` contributes nothing (its bytes are never present on disk).

use crate::context::AssemblerCtx;

pub fn write(ctx: &AssemblerCtx) -> Vec<u8> {
    let mut out = Vec::with_capacity(ctx.text.bytes.len() + ctx.data.bytes.len());
    out.extend_from_slice(&ctx.text.bytes);
    out.extend_from_slice(&ctx.data.bytes);
    out
}

#[cfg(test)]
mod tests {
    use crate::assembler::assemble_bytes;

    #[test]
    fn text_and_data_are_concatenated_with_no_header() {
        let src = "format binary\nnop\nsection data\ndb 0xAA\n";
        let obj = assemble_bytes(src).unwrap();
        assert_eq!(obj.bytes, vec![0x90, 0xAA]);
    }
}

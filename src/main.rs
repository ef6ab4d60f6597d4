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

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use asmc::assemble;
use asmc::file_reader::AsmFileReader;
use clap::Parser as ClapParser;

#[derive(ClapParser)]
#[clap(version = "0.1.0", author = "Connor Nolan")]
struct Opts {
    /// Assembly source file.
    input: PathBuf,
    /// Output object/image path.
    output: PathBuf,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    let reader = AsmFileReader;

    match assemble(&opts.input, &reader) {
        Ok(bytes) => {
            if let Err(e) = fs::write(&opts.output, &bytes) {
                eprintln!("[ASMC ERROR] failed to write {}: {e}", opts.output.display());
                return ExitCode::FAILURE;
            }
            println!(
                "assembled {} -> {} ({} bytes)",
                opts.input.display(),
                opts.output.display(),
                bytes.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, NamedSource, Result};
use tarn_syntax::Stage;

#[derive(Parser)]
#[command(name = "tarn", version, about = "Parse and inspect tarn IR modules")]
struct Cli {
    /// Path to a textual IR module
    file: PathBuf,

    /// Print a summary of the parsed module
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let src = fs::read_to_string(&cli.file).into_diagnostic()?;
    let module = tarn_parse::parse_source(&src).map_err(|report| {
        report.with_source_code(NamedSource::new(cli.file.display().to_string(), src.clone()))
    })?;

    let stage = match module.stage {
        Stage::Raw => "raw",
        Stage::Canonical => "canonical",
    };
    println!(
        "module \"{}\" stage {stage}: {} type alias(es), {} struct(s), {} function(s)",
        module.name,
        module.type_aliases.len(),
        module.structs.len(),
        module.functions.len(),
    );

    if cli.dump {
        for alias in &module.type_aliases {
            match &alias.ty {
                Some(ty) => println!("type %{} = {}", alias.name, ty.display(&module)),
                None => println!("type %{} = opaque", alias.name),
            }
        }
        for def in &module.structs {
            println!("struct %{} ({} fields)", def.name, def.fields.len());
        }
        for function in &module.functions {
            let role = if function.is_definition() {
                "definition"
            } else {
                "declaration"
            };
            let instruction_count: usize =
                function.blocks.iter().map(|b| b.instructions.len()).sum();
            println!(
                "func @{}: {} [{role}, {} block(s), {} instruction(s)]",
                function.name,
                function.ty().display(&module),
                function.blocks.len(),
                instruction_count,
            );
        }
    }

    Ok(())
}

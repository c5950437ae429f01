use std::process::ExitCode;
use std::{fs, io};

use clap::Parser;

use rglslc::compiler::lang::lex;
use rglslc::compiler::lang::{TextureFilter, TextureRepeat};
use rglslc::compiler::{
    DefaultIdentifierActions, DeprecatedConverter, IdentifierActions, ShaderCompiler, ShaderMode,
    Stage,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Arguments {
    #[arg()]
    input: String,
    #[arg(short, long)]
    output: Option<String>,
    /// Migrate a legacy-dialect shader to the current dialect instead of
    /// lowering it to GLSL.
    #[arg(long)]
    convert: bool,
    /// Keep going past unported constructs, stamping comments instead of
    /// failing (only meaningful with --convert).
    #[arg(long)]
    keep_unported: bool,
}

fn entry_points(mode: ShaderMode) -> Vec<(&'static str, Stage)> {
    match mode {
        ShaderMode::Spatial | ShaderMode::CanvasItem => vec![
            ("vertex", Stage::Vertex),
            ("fragment", Stage::Fragment),
            ("light", Stage::Fragment),
        ],
        ShaderMode::Particles => vec![("start", Stage::Compute), ("process", Stage::Compute)],
        ShaderMode::Sky => vec![("sky", Stage::Fragment)],
        ShaderMode::Fog => vec![("fog", Stage::Fragment)],
        ShaderMode::Compute => vec![("compute", Stage::Compute)],
    }
}

fn run(args: &Arguments) -> Result<String, String> {
    let code = fs::read_to_string(&args.input)
        .map_err(|e| format!("cannot read {}: {}", args.input, e))?;

    if args.convert {
        let mut converter = DeprecatedConverter::new(code);
        if !converter.is_legacy() {
            return Err("input is not a legacy-dialect shader".to_string());
        }
        converter.set_fail_on_unported(!args.keep_unported);
        if !converter.convert() {
            return Err(format!(
                "line {}: {}",
                converter.error_line(),
                converter.error_text()
            ));
        }
        return Ok(converter.emit());
    }

    let mode_name =
        lex::get_shader_type(&code).ok_or_else(|| "missing shader_type header".to_string())?;
    let mode = ShaderMode::from_name(&mode_name)
        .ok_or_else(|| format!("unknown shader type '{}'", mode_name))?;

    let shader_compiler = ShaderCompiler::new(DefaultIdentifierActions {
        default_filter: TextureFilter::Linear,
        default_repeat: TextureRepeat::Disable,
        base_uniform_string: "material.".to_string(),
        global_buffer_array_variable: "global_shader_uniforms.data".to_string(),
        instance_uniform_index_variable: "draw_call.instance_uniform_offset".to_string(),
        ..DefaultIdentifierActions::default()
    });
    let mut actions = IdentifierActions::default();
    for (name, stage) in entry_points(mode) {
        actions
            .entry_point_stages
            .insert(name.to_string(), stage);
    }
    let gen_code = shader_compiler
        .compile(mode, &code, &mut actions, &args.input)
        .map_err(|e| e.to_string())?;

    let mut out = String::new();
    for define in &gen_code.defines {
        out += &format!("{}\n", define);
    }
    for (stage, globals) in ["vertex", "fragment", "compute"]
        .iter()
        .zip(gen_code.stage_globals.iter())
    {
        if !globals.is_empty() {
            out += &format!("// stage: {}\n{}\n", stage, globals);
        }
    }
    let mut entries: Vec<_> = gen_code.code.iter().collect();
    entries.sort();
    for (entry, body) in entries {
        out += &format!("// entry: {}\n{}\n", entry, body);
    }
    Ok(out)
}

fn main() -> ExitCode {
    let args = Arguments::parse();
    match run(&args) {
        Ok(text) => {
            match &args.output {
                Some(path) => fs::write(path, text).expect("cannot write output"),
                None => {
                    use io::Write;
                    io::stdout().write_all(text.as_bytes()).unwrap();
                }
            }
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

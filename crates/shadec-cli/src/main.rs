use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use miette::{Context, IntoDiagnostic};

use shadec_backend_core::GeneratorRegistry;
use shadec_backend_glsl::GlslGenerator;
use shadec_ir::{CollectingReporter, ShaderStage};
use shadec_library::ShaderLibraryData;
use shadec_linker::{LinkerOptions, compile_library};
use shadec_parser::{FileSystemIncludes, ParseOptions};

/// shadec: compiles a shader library into the binary shader library format
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input source file
    #[arg(required_unless_present = "list_targets")]
    input: Option<PathBuf>,

    /// Output prefix; writes <OUTPUT>.struct.bin and <OUTPUT>.data.bin
    /// (default: the input path without its extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Opcode generator
    #[arg(short, long, default_value = "glsl")]
    target: String,

    /// Directory searched for `#include <...>` files
    #[arg(short = 'I', long = "include-dir", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Predefined macro, NAME or NAME=VALUE
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]", value_parser = parse_define)]
    defines: Vec<(String, String)>,

    /// Dump the parsed library to stderr
    #[arg(long)]
    emit_ast: bool,

    /// Write every generated stage into DIR
    #[arg(long, value_name = "DIR")]
    emit_code: Option<PathBuf>,

    /// Compile everything but write no library
    #[arg(long)]
    dry_run: bool,

    /// Check generated GLSL with naga
    #[arg(long)]
    validate: bool,

    /// Store shader blobs uncompressed
    #[arg(long)]
    no_compress: bool,

    /// Print the available targets and exit
    #[arg(long)]
    list_targets: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_define(s: &str) -> Result<(String, String), String> {
    let (name, value) = s.split_once('=').unwrap_or((s, "1"));
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid macro name '{name}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn print_diagnostics(reporter: &CollectingReporter) {
    for diag in &reporter.diagnostics {
        eprintln!("{diag}");
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(prefix.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

fn validate_glsl(data: &ShaderLibraryData) -> miette::Result<()> {
    let mut failures = 0;
    for (index, blob) in data.blobs.iter().enumerate() {
        let stage = match ShaderStage::from_raw(blob.stage) {
            Some(ShaderStage::Vertex) => naga::ShaderStage::Vertex,
            Some(ShaderStage::Pixel) => naga::ShaderStage::Fragment,
            Some(ShaderStage::Compute) => naga::ShaderStage::Compute,
            other => {
                log::warn!("skipping validation of blob {index}: naga has no {other:?} stage");
                continue;
            }
        };
        let code = data.unpack_shader(index as u32).into_diagnostic()?;
        let text = std::str::from_utf8(&code)
            .into_diagnostic()
            .wrap_err_with(|| format!("blob {index} is not GLSL text"))?;
        let mut frontend = naga::front::glsl::Frontend::default();
        if let Err(errors) = frontend.parse(&naga::front::glsl::Options::from(stage), text) {
            failures += 1;
            eprintln!("blob {index} ({stage:?}) failed validation:\n{errors:?}");
        }
    }
    if failures > 0 {
        return Err(miette::miette!("{failures} generated shader(s) failed validation"));
    }
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // 1. Generators.
    let mut registry = GeneratorRegistry::with_builtins();
    registry.register(Box::new(GlslGenerator));
    if cli.list_targets {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }
    let generator = registry.find(&cli.target).ok_or_else(|| {
        miette::miette!("unknown target '{}' (available: {registry})", cli.target)
    })?;

    // 2. Read source file.
    let input = cli.input.ok_or_else(|| miette::miette!("no input file"))?;
    let source = std::fs::read_to_string(&input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", input.display()))?;

    // 3. Parse.
    let mut reporter = CollectingReporter::new();
    let includes = FileSystemIncludes::new(cli.include_dirs);
    let options = ParseOptions { defines: cli.defines };
    let parsed = shadec_parser::parse_library(&source, &input.to_string_lossy(), &includes, &mut reporter, &options);
    print_diagnostics(&reporter);
    let lib = parsed.map_err(|_| miette::miette!("failed to parse {}", input.display()))?;

    if cli.emit_ast {
        eprintln!("{}", shadec_ir::dump_library(&lib));
    }
    if lib.exports.is_empty() {
        log::warn!("{} exports nothing", input.display());
    }

    // 4. Link every export.
    let options = LinkerOptions {
        compress: !cli.no_compress,
        dump_dir: cli.emit_code,
        ..LinkerOptions::default()
    };
    let mut reporter = CollectingReporter::new();
    let linked = compile_library(&lib, &lib.exports, generator, &options, &mut reporter);
    print_diagnostics(&reporter);
    let linked = linked.map_err(|_| {
        miette::miette!("compilation failed with {} error(s)", reporter.errors().count())
    })?;

    let structure = linked.builder.extract_structure_data();
    let shader_data = linked.builder.extract_shader_data();

    // 5. Optionally validate what the GLSL generator produced.
    if cli.validate {
        if generator.name() != "glsl" {
            return Err(miette::miette!("--validate needs the glsl target, not '{}'", generator.name()));
        }
        let data = ShaderLibraryData::from_buffers(&structure, &shader_data).into_diagnostic()?;
        validate_glsl(&data)?;
    }

    // 6. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 7. Write output.
    let prefix = cli.output.unwrap_or_else(|| input.with_extension(""));
    for (suffix, bytes) in [(".struct.bin", &structure), (".data.bin", &shader_data)] {
        let path = with_suffix(&prefix, suffix);
        std::fs::write(&path, bytes)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    }
    log::info!(
        "wrote {} bundle(s): {} + {} bytes",
        linked.bundles.len(),
        structure.len(),
        shader_data.len()
    );
    Ok(())
}

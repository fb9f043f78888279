//! `fbc` — drives the BASIC-to-native compiler pipeline: build a CFG from
//! a `Program`, lower it to IL text, and (for JIT-path input) collect
//! `JitInst` records. This binary has no parser of its own — the source
//! language and its front end are out of scope — so its real input is
//! either a JSON-serialized `fbc_ast::Program` or one of the built-in
//! `--demo` fixtures.

mod config;
mod demos;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;

use demos::Demo;
use fbc_ast::Program;
use fbc_jit::{JitCollector, JitHistogram, SimpleFunc};

#[derive(Parser)]
#[command(name = "fbc")]
#[command(about = "BASIC-to-native compiler driver")]
#[command(version)]
struct Cli {
    /// JSON-serialized fbc_ast::Program to compile.
    input: Option<PathBuf>,

    /// Run a built-in fixture program instead of reading `input` — one of
    /// the names listed by `Demo::names()`.
    #[arg(long)]
    demo: Option<String>,

    /// Output file (stdout if omitted).
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Stop after emitting IL; do not attempt the JIT path.
    #[arg(short = 'c', long)]
    compile_only: bool,

    /// Run the JIT collector over the input (only meaningful for
    /// `--demo madd-fusion`, the one fixture with a `FuncIr`).
    #[arg(long)]
    run: bool,

    /// Print the generated IL text.
    #[arg(long)]
    emit_qbe: bool,

    /// Print the collected JitInst stream as pseudo-assembly text.
    #[arg(long)]
    emit_asm: bool,

    /// Print pipeline progress to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Dump the input Program's debug representation to stderr.
    #[arg(long)]
    trace_ast: bool,

    /// Dump each function's CFG blocks/edges to stderr.
    #[arg(long)]
    trace_cfg: bool,

    /// Print per-phase wall-clock timing to stderr.
    #[arg(long)]
    profile: bool,

    /// Retain intermediate artifacts. No external assembler/linker step
    /// exists in this pipeline, so this currently only controls whether
    /// `-o -` temp buffers are kept after a failed run; preserved for
    /// CLI-surface completeness against the full driver this one stands in for.
    #[arg(long)]
    keep_temps: bool,

    #[arg(long, conflicts_with = "disable_madd_fusion")]
    enable_madd_fusion: bool,

    #[arg(long)]
    disable_madd_fusion: bool,

    /// Target triple-ish string. Only "aarch64" is implemented — JIT
    /// portability to other architectures is explicitly out of scope.
    #[arg(long)]
    target: Option<String>,

    /// TOML file with default values for target/fusion/keep-temps.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => config::load(path)?,
        None => config::FileConfig::default(),
    };

    let target = cli.target.clone().or(file_config.target.clone()).unwrap_or_else(|| "aarch64".to_string());
    if target != "aarch64" {
        bail!("unsupported target '{target}': only aarch64 is implemented");
    }

    if cli.compile_only && cli.run {
        bail!("-c/--compile-only and --run are mutually exclusive");
    }

    let madd_fusion = resolve_madd_fusion(&cli, &file_config);
    let keep_temps = cli.keep_temps || file_config.keep_temps.unwrap_or(false);
    let _ = keep_temps;

    let demo = match cli.demo.as_deref() {
        Some(name) => Some(
            Demo::parse(name)
                .with_context(|| format!("unknown demo '{name}' (expected one of {:?})", Demo::names()))?,
        ),
        None => None,
    };

    if cli.verbose {
        eprintln!("fbc: target={target} madd_fusion={madd_fusion}");
    }

    let overall_start = Instant::now();

    if let Some(demo) = demo {
        if let Some(func) = demo.func() {
            run_jit_only(&cli, func, madd_fusion)?;
            if cli.profile {
                eprintln!("fbc: total {:?}", overall_start.elapsed());
            }
            return Ok(());
        }
        let program = demo.program().expect("every Demo yields either a Program or a FuncIr");
        run_codegen_pipeline(&cli, program, overall_start)?;
        return Ok(());
    }

    let input = cli.input.clone().context("no input file given (pass a path or --demo <name>)")?;
    let program = load_program(&input)?;
    run_codegen_pipeline(&cli, program, overall_start)?;
    Ok(())
}

fn resolve_madd_fusion(cli: &Cli, file_config: &config::FileConfig) -> bool {
    if cli.enable_madd_fusion {
        return true;
    }
    if cli.disable_madd_fusion {
        return false;
    }
    if let Some(from_config) = file_config.enable_madd_fusion {
        return from_config;
    }
    match std::env::var("ENABLE_MADD_FUSION").as_deref() {
        Ok("0") => false,
        Ok("1") => true,
        _ => true,
    }
}

fn load_program(path: &PathBuf) -> anyhow::Result<Program> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading input file '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing '{}' as a JSON-serialized Program", path.display()))
}

fn run_codegen_pipeline(cli: &Cli, program: Program, overall_start: Instant) -> anyhow::Result<()> {
    if cli.trace_ast {
        eprintln!("{:#?}", program);
    }

    if cli.trace_cfg {
        let cfg_start = Instant::now();
        match fbc_cfg::build_program_cfg(&program) {
            Ok(program_cfg) => {
                eprintln!("{:#?}", program_cfg);
            }
            Err(e) => eprintln!("fbc: trace-cfg: {e}"),
        }
        if cli.profile {
            eprintln!("fbc: cfg trace {:?}", cfg_start.elapsed());
        }
    }

    let codegen_start = Instant::now();
    let il = fbc_cfg::generate(&program)?;
    if cli.profile {
        eprintln!("fbc: codegen {:?}", codegen_start.elapsed());
    }

    if cli.run || cli.emit_asm {
        bail!("--run/--emit-asm require --demo madd-fusion: this workspace has no embedded IL backend to lower generated IL down to a FuncIr");
    }

    if cli.emit_qbe && cli.verbose {
        eprintln!("fbc: emitting {} bytes of IL text", il.len());
    }
    write_output(cli, &il)?;

    if cli.profile {
        eprintln!("fbc: total {:?}", overall_start.elapsed());
    }
    Ok(())
}

fn run_jit_only(cli: &Cli, func: SimpleFunc, madd_fusion: bool) -> anyhow::Result<()> {
    if cli.verbose {
        eprintln!("fbc: collecting JIT instructions for '{}'", func.name);
    }
    let mut collector = JitCollector::new().with_madd_fusion(madd_fusion);
    collector.collect_function(&func)?;

    let mut histogram = JitHistogram::default();
    histogram.accumulate(collector.insts());

    let mut out = String::new();
    for inst in collector.insts() {
        out.push_str(&render_pseudo_asm(inst));
        out.push('\n');
    }
    if cli.profile {
        out.push_str("; --- opcode histogram ---\n");
        out.push_str(&histogram.dump());
    }
    write_output(cli, &out)?;
    Ok(())
}

fn render_pseudo_asm(inst: &fbc_jit::JitInst) -> String {
    match inst.kind {
        fbc_jit::JitInstKind::Comment => format!("  ; {}", inst.sym_name()),
        fbc_jit::JitInstKind::Label => format!("L{}:", inst.target_id),
        fbc_jit::JitInstKind::FuncBegin => format!("{}:", inst.sym_name()),
        _ => format!("  {} rd={} rn={} rm={} ra={} imm={}", inst.kind.name(), inst.rd, inst.rn, inst.rm, inst.ra, inst.imm),
    }
}

fn write_output(cli: &Cli, text: &str) -> anyhow::Result<()> {
    match &cli.output {
        Some(path) => std::fs::write(path, text).with_context(|| format!("writing output file '{}'", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

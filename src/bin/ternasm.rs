use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use ternasm::config::CompilerConfig;
use ternasm::{Compiler, init_tracing};

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct CompileOptions {
    config: CompilerConfig,
    output: Option<PathBuf>, // -o <file>
    dump_grammar: bool,      // --dump-grammar
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { config: CompilerConfig::default(), output: None, dump_grammar: false }
    }
}

fn print_usage() {
    println!("ternasm v{}", VERSION);
    println!("Usage: ternasm [options] <source_file> [-o output.asm]");
    println!();
    println!("Options:");
    println!("  -O0                   只做结构性化简，关闭常量折叠和代数优化");
    println!("  -o <file>             输出文件 (默认: 源文件名.asm)");
    println!("  --grammar <file>      使用自定义产生式文件");
    println!("  --delim <text>        产生式分隔符 (默认: \" -> \")");
    println!("  --epsilon <text>      空串符号 (默认: ε)");
    println!("  --scope <name>        入口标签名 (默认: main)");
    println!("  --no-hint             不输出构建命令注释");
    println!("  --dump-grammar        打印产生式、First/Follow 集和分析表后退出");
    println!("  --version, -v         显示版本号");
    println!("  --help, -h            显示帮助信息");
    println!();
    println!("Examples:");
    println!("  ternasm prog.txt");
    println!("  ternasm -O0 prog.txt -o prog.asm");
    println!("  RUST_LOG=ternasm=debug ternasm prog.txt");
}

/// 取出选项后面的参数
fn value_of(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i).cloned().ok_or_else(|| format!("{} requires an argument", flag))
}

fn parse_args(args: &[String]) -> Result<(CompileOptions, Option<PathBuf>), String> {
    let mut options = CompileOptions::default();
    let mut input_file: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--version" | "-v" => {
                println!("ternasm v{}", VERSION);
                process::exit(0);
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            "-O0" => {
                options.config.optimize = false;
            }
            "-O1" | "-O2" => {
                options.config.optimize = true;
            }
            "-o" => {
                options.output = Some(PathBuf::from(value_of(args, &mut i, "-o")?));
            }
            "--grammar" => {
                options.config.grammar_path = Some(PathBuf::from(value_of(args, &mut i, "--grammar")?));
            }
            "--delim" => {
                options.config.delimiter = value_of(args, &mut i, "--delim")?;
            }
            "--epsilon" => {
                options.config.epsilon = value_of(args, &mut i, "--epsilon")?;
            }
            "--scope" => {
                options.config.scope_name = value_of(args, &mut i, "--scope")?;
            }
            "--no-hint" => {
                options.config.build_hint = false;
            }
            "--dump-grammar" => {
                options.dump_grammar = true;
            }
            _ => {
                if arg.starts_with('-') {
                    return Err(format!("unknown option: {}", arg));
                }
                if input_file.is_some() {
                    return Err(format!("unexpected argument: {}", arg));
                }
                input_file = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    if input_file.is_none() && !options.dump_grammar {
        return Err("no input file".to_string());
    }
    Ok((options, input_file))
}

fn output_path(input: &Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| input.with_extension("asm"))
}

fn run(mut options: CompileOptions, input: Option<PathBuf>) -> Result<bool> {
    let output = input.as_deref().map(|p| output_path(p, options.output.take()));
    if let Some(stem) = output.as_deref().and_then(Path::file_stem).and_then(|s| s.to_str()) {
        options.config.output_stem = stem.to_string();
    }

    let compiler = Compiler::new(options.config).context("failed to load grammar")?;

    if options.dump_grammar {
        let ll1 = compiler.ll1();
        println!("{}", ll1.render_productions());
        println!("{}", ll1.render_sets());
        println!("{}", ll1.render_table());
        if input.is_none() {
            return Ok(true);
        }
    }

    let (Some(input), Some(output)) = (input, output) else {
        return Ok(true);
    };
    let source = fs::read_to_string(&input).with_context(|| format!("cannot read {}", input.display()))?;
    let result = compiler.compile(&source);
    fs::write(&output, &result.listing).with_context(|| format!("cannot write {}", output.display()))?;

    for diagnostic in &result.diagnostics {
        eprintln!("{}", diagnostic);
    }
    println!("{} -> {}", input.display(), output.display());
    Ok(result.is_clean())
}

fn main() {
    init_tracing();
    let args: Vec<String> = env::args().collect();

    let (options, input) = match parse_args(&args) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {}", e);
            print_usage();
            process::exit(2);
        }
    };

    match run(options, input) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(2);
        }
    }
}

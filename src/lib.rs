pub mod error;
pub mod types;
pub mod config;
pub mod ast;
pub mod lexer;
pub mod grammar;
pub mod preprocessor;
pub mod parser;
pub mod optimizer;
pub mod semantic;
pub mod codegen;

use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing::{info, warn};

use codegen::NasmGenerator;
use config::CompilerConfig;
use error::{Diagnostic, FatalResult};
use grammar::{Grammar, LL1};
use optimizer::{OptLevel, Optimizer};
use parser::OperatorTable;
use preprocessor::{IfAccumulator, Unit};
use semantic::Analyzer;

static TRACING_INIT: Once = Once::new();

/// 初始化日志输出，只在设置了 `RUST_LOG` 时生效。可以重复调用。
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

/// 一次编译的结果：出错的语句被跳过，列表总会生成
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub listing: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

pub struct Compiler {
    config: CompilerConfig,
    ll1: LL1,
    ops: OperatorTable,
}

impl Compiler {
    /// 载入文法并构造分析表
    pub fn new(config: CompilerConfig) -> FatalResult<Self> {
        config.validate()?;
        let grammar = match &config.grammar_path {
            Some(path) => Grammar::parse(&fs::read_to_string(path)?, &config.delimiter, &config.epsilon)?,
            None => Grammar::builtin()?,
        };
        let ll1 = LL1::new(grammar);
        Ok(Compiler { config, ll1, ops: OperatorTable::new() })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn ll1(&self) -> &LL1 {
        &self.ll1
    }

    pub fn compile(&self, source: &str) -> CompileOutput {
        let level = if self.config.optimize { OptLevel::Full } else { OptLevel::Structural };
        let mut analyzer = Analyzer::new(&self.ll1, &self.ops, Optimizer::new(level));
        let mut accumulator = IfAccumulator::new();
        let mut diagnostics = Vec::new();

        let source = source.replace('\r', "");
        for (idx, line) in source.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            for unit in accumulator.feed(idx + 1, line) {
                Self::process(&mut analyzer, &unit, &mut diagnostics);
            }
        }
        if let Some(unit) = accumulator.finish() {
            Self::process(&mut analyzer, &unit, &mut diagnostics);
        }

        let table = analyzer.into_table();
        let listing = NasmGenerator::new(&table, &self.config).generate();
        info!(entries = table.order().len(), diagnostics = diagnostics.len(), "compiled");
        CompileOutput { listing, diagnostics }
    }

    fn process(analyzer: &mut Analyzer, unit: &Unit, diagnostics: &mut Vec<Diagnostic>) {
        let line = match unit {
            Unit::Statement { line, .. } => *line,
            Unit::IfBlock(block) => block.line,
        };
        if let Err(error) = analyzer.process(unit) {
            warn!(line, %error, "statement rejected");
            diagnostics.push(Diagnostic { line, error });
        }
    }

    /// 读取源文件，写出汇编列表，返回诊断信息
    pub fn compile_file(&self, input: &Path, output: &Path) -> FatalResult<Vec<Diagnostic>> {
        let source = fs::read_to_string(input)?;
        let result = self.compile(&source);
        fs::write(output, &result.listing)?;
        Ok(result.diagnostics)
    }
}


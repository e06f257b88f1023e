//! 编译器配置
use std::path::PathBuf;

use crate::error::{FatalError, FatalResult};

/// 编译选项，由命令行填充，未指定的字段使用默认值
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// 完整代数优化；关闭时只做结构性化简
    pub optimize: bool,
    /// 唯一作用域的标签名
    pub scope_name: String,
    /// 自定义产生式文件，None 时使用内置文法
    pub grammar_path: Option<PathBuf>,
    pub delimiter: String,
    pub epsilon: String,
    /// 是否输出 "How to build" 注释头
    pub build_hint: bool,
    pub output_stem: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            optimize: true,
            scope_name: "main".to_string(),
            grammar_path: None,
            delimiter: " -> ".to_string(),
            epsilon: "ε".to_string(),
            build_hint: true,
            output_stem: "output".to_string(),
        }
    }
}

impl CompilerConfig {
    pub fn without_optimization(mut self) -> Self {
        self.optimize = false;
        self
    }

    pub fn without_build_hint(mut self) -> Self {
        self.build_hint = false;
        self
    }

    /// 作用域名会成为汇编标签，必须是合法标识符
    pub fn validate(&self) -> FatalResult<()> {
        let mut chars = self.scope_name.chars();
        let valid_scope = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_scope {
            return Err(FatalError::Config(format!("invalid scope name '{}'", self.scope_name)));
        }
        if self.delimiter.trim().is_empty() {
            return Err(FatalError::Config("production delimiter must not be blank".to_string()));
        }
        if self.epsilon.trim().is_empty() {
            return Err(FatalError::Config("epsilon symbol must not be blank".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CompilerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = CompilerConfig::default();
        config.scope_name = "1main".to_string();
        assert!(matches!(config.validate(), Err(FatalError::Config(_))));

        let mut config = CompilerConfig::default();
        config.epsilon = " ".to_string();
        assert!(config.validate().is_err());
    }
}

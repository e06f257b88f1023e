//! NASM x86-64 代码生成
pub mod templates;
mod generator;

use std::fmt;

pub use generator::NasmGenerator;

/// 汇编片段的接收端，片段按调用顺序原样追加
pub trait Sink {
    fn write_fragment(&mut self, fragment: &str);
}

impl Sink for String {
    fn write_fragment(&mut self, fragment: &str) {
        self.push_str(fragment);
    }
}

/// 逐片段保存的列表
#[derive(Debug, Default, Clone)]
pub struct Listing {
    fragments: Vec<String>,
}

impl Listing {
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }
}

impl Sink for Listing {
    fn write_fragment(&mut self, fragment: &str) {
        self.fragments.push(fragment.to_string());
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for fragment in &self.fragments {
            f.write_str(fragment)?;
        }
        Ok(())
    }
}

use std::fmt;

/// 源语言支持的两种数值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Float,
}

impl ValueType {
    /// 从类型关键字解析（int / int32 / float / float32）
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "int" | "int32" => Some(ValueType::Int),
            "float" | "float32" => Some(ValueType::Float),
            _ => None,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            ValueType::Int => 4,
            ValueType::Float => 4,
        }
    }

    /// NASM 内存操作数的尺寸关键字
    pub fn size_word(&self) -> &'static str {
        match self.size_in_bytes() {
            1 => "BYTE",
            2 => "WORD",
            8 => "QWORD",
            _ => "DWORD",
        }
    }

    /// 数据段中 printf 格式串的标签
    pub fn format_label(&self) -> &'static str {
        match self {
            ValueType::Int => "int32",
            ValueType::Float => "float32",
        }
    }

    /// 两个操作数运算后的结果类型（取较宽者）
    pub fn widen(self, other: ValueType) -> ValueType {
        if self == ValueType::Float || other == ValueType::Float {
            ValueType::Float
        } else {
            ValueType::Int
        }
    }

    /// 判断一段文本是否为数值字面量，并返回其类型
    pub fn of_literal(text: &str) -> Option<ValueType> {
        let digits = text.strip_prefix('-').unwrap_or(text);
        if digits.is_empty() {
            return None;
        }
        if digits.chars().all(|c| c.is_ascii_digit()) {
            return Some(ValueType::Int);
        }
        let dots = digits.chars().filter(|c| *c == '.').count();
        if dots == 1 && digits.chars().all(|c| c.is_ascii_digit() || c == '.') && digits.len() > 1 {
            return Some(ValueType::Float);
        }
        None
    }
}

/// 类型关键字保留字，不能作为变量名或值使用
pub const RESERVED_TYPE_NAMES: [&str; 4] = ["int", "int32", "float", "float32"];

pub fn is_reserved_type_name(text: &str) -> bool {
    RESERVED_TYPE_NAMES.contains(&text)
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
        }
    }
}

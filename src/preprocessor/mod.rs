//! 语句降级模块
//!
//! 源码按行送入 [`IfAccumulator`]：
//! - 普通行在顶层 `;` 处切分为语句
//! - `if (...) { ... } else { ... }` 可以跨越多行，收集成一个 [`IfBlock`]
//!
//! [`lower_if`] 把收集到的 if 子句改写为三元语句
//! `( cond ) ? ( s1 ; s2 ; ) : ( void )`，嵌套的 if 与 `else if` 链递归改写。

use crate::error::{StmtResult, structure_error};
use crate::lexer::{split_statements, starts_with_keyword};

/// 收集完成的 if 子句，保留每段文本来自的行号
#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub line: usize,
    text: String,
    /// (文本中的字节偏移, 行号)
    marks: Vec<(usize, usize)>,
}

impl IfBlock {
    fn new(line: usize) -> Self {
        IfBlock { line, text: String::new(), marks: Vec::new() }
    }

    /// 单行文本直接构成一个 if 子句
    pub fn from_text(line: usize, text: &str) -> Self {
        let mut block = IfBlock::new(line);
        block.push(line, text);
        block
    }

    fn push(&mut self, line: usize, fragment: &str) {
        if fragment.trim().is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.marks.push((self.text.len(), line));
        self.text.push_str(fragment);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 文本偏移所在的源码行
    pub fn line_at(&self, offset: usize) -> usize {
        self.marks
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map_or(self.line, |(_, line)| *line)
    }
}

/// 驱动器逐个处理的单元
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    Statement { line: usize, text: String },
    IfBlock(IfBlock),
}

/// 子句头部扫描到的位置
#[derive(Debug, Clone, Copy, PartialEq)]
enum HeaderScan {
    /// `if` 之后，等待 `(`
    Keyword,
    /// `else` 之后，只能跟 `if` 或 `{`
    AfterElse,
    /// 条件括号内，记录括号深度
    Condition(usize),
    /// 条件已闭合，只能跟 `{`
    Closed,
}

/// 头部扫描一段文本的结果
enum HeaderStep {
    /// `{` 的字节位置
    Open(usize),
    Pending(HeaderScan),
    /// 头部之后出现了不是 `{` 的内容
    Rejected,
}

impl HeaderScan {
    fn advance(mut self, code: &str) -> HeaderStep {
        let mut chars = code.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c == '{' {
                return HeaderStep::Open(idx);
            }
            self = match (self, c) {
                (_, c) if c.is_whitespace() => continue,
                (HeaderScan::Keyword, '(') => HeaderScan::Condition(1),
                (HeaderScan::Keyword, _) => HeaderScan::Keyword,
                (HeaderScan::AfterElse, _) if starts_with_keyword(&code[idx..], "if") => {
                    chars.next();
                    HeaderScan::Keyword
                }
                (HeaderScan::Condition(depth), '(') => HeaderScan::Condition(depth + 1),
                (HeaderScan::Condition(1), ')') => HeaderScan::Closed,
                (HeaderScan::Condition(depth), ')') => HeaderScan::Condition(depth - 1),
                (HeaderScan::Condition(depth), _) => HeaderScan::Condition(depth),
                (HeaderScan::AfterElse | HeaderScan::Closed, _) => return HeaderStep::Rejected,
            };
        }
        HeaderStep::Pending(self)
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Outside,
    /// 在 `if (...)` 或 `else` 之后、`{` 之前
    Header(IfBlock, HeaderScan),
    Body { block: IfBlock, depth: usize },
    /// 语句体刚刚在深度 0 闭合，等待可能出现的 else
    AwaitElse(IfBlock),
}

/// 行状态机：识别跨行的 if/else 子句
#[derive(Debug, Default)]
pub struct IfAccumulator {
    state: State,
}

/// 一行内 `//` 之前的部分
fn strip_comment(text: &str) -> &str {
    match text.find("//") {
        Some(idx) => &text[..idx],
        None => text,
    }
}

impl IfAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 送入一行源码，返回已经完整的单元
    pub fn feed(&mut self, line: usize, text: &str) -> Vec<Unit> {
        let mut units = Vec::new();
        let mut rest = text;

        loop {
            match std::mem::take(&mut self.state) {
                State::Outside => {
                    let mut offset = 0;
                    let mut if_start = None;
                    for piece in split_statements(rest) {
                        if starts_with_keyword(&piece, "if") {
                            if_start = Some(offset);
                            break;
                        }
                        offset += piece.len();
                        let stmt = piece.trim();
                        if !stmt.is_empty() && stmt != ";" && !stmt.starts_with("//") {
                            units.push(Unit::Statement { line, text: stmt.to_string() });
                        }
                    }
                    match if_start {
                        Some(start) => {
                            rest = &rest[start..];
                            self.state = State::Header(IfBlock::new(line), HeaderScan::Keyword);
                        }
                        None => break,
                    }
                }
                State::Header(mut block, scan) => {
                    let code = strip_comment(rest);
                    match scan.advance(code) {
                        HeaderStep::Open(idx) => {
                            block.push(line, &code[..=idx]);
                            rest = &code[idx + 1..];
                            self.state = State::Body { block, depth: 1 };
                        }
                        HeaderStep::Pending(scan) => {
                            block.push(line, code);
                            self.state = State::Header(block, scan);
                            break;
                        }
                        HeaderStep::Rejected => {
                            // 交给 lower_if 报告缺少 `{`，下一行重新开始
                            block.push(line, code);
                            units.push(Unit::IfBlock(block));
                            break;
                        }
                    }
                }
                State::Body { mut block, mut depth } => {
                    let code = strip_comment(rest);
                    let mut closed_at = None;
                    for (idx, c) in code.char_indices() {
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    closed_at = Some(idx);
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    match closed_at {
                        Some(idx) => {
                            block.push(line, &code[..=idx]);
                            rest = &code[idx + 1..];
                            self.state = State::AwaitElse(block);
                        }
                        None => {
                            block.push(line, code);
                            self.state = State::Body { block, depth };
                            break;
                        }
                    }
                }
                State::AwaitElse(mut block) => {
                    let trimmed = strip_comment(rest).trim_start();
                    if trimmed.is_empty() {
                        self.state = State::AwaitElse(block);
                        break;
                    }
                    if starts_with_keyword(trimmed, "else") {
                        block.push(line, "else");
                        rest = &trimmed["else".len()..];
                        self.state = State::Header(block, HeaderScan::AfterElse);
                    } else {
                        units.push(Unit::IfBlock(block));
                        rest = trimmed;
                    }
                }
            }
        }

        units
    }

    /// 输入结束时取出尚未交付的 if 子句
    pub fn finish(&mut self) -> Option<Unit> {
        match std::mem::take(&mut self.state) {
            State::Outside => None,
            State::Header(block, _) | State::AwaitElse(block) | State::Body { block, .. } => {
                Some(Unit::IfBlock(block))
            }
        }
    }
}

/// 降级结果
#[derive(Debug, Clone, PartialEq)]
pub struct Lowered {
    /// 三元语句文本
    pub text: String,
    /// `if (cond)` 形式的头部，用作注释
    pub header: String,
    /// 各分支内语句的 (行号, 源码)，按前序排列；嵌套 if 以其头部出现
    pub statements: Vec<(usize, String)>,
}

struct Cursor<'a> {
    block: &'a IfBlock,
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn at_keyword(&self, kw: &str) -> bool {
        let rest = &self.text[self.pos..];
        rest.starts_with(kw) && starts_with_keyword(rest, kw)
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    /// 当前位置必须是 `open`，返回配对括号内部的范围，游标移到闭括号之后
    fn balanced(&mut self, open: char, close: char) -> StmtResult<(usize, usize)> {
        if self.peek() != Some(open) {
            return Err(structure_error(format!(
                "expected '{}' near '{}'",
                open,
                self.text[self.pos..].lines().next().unwrap_or("").trim()
            )));
        }
        let start = self.pos + open.len_utf8();
        let mut depth = 0usize;
        for (idx, c) in self.text[self.pos..].char_indices() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    let end = self.pos + idx;
                    self.pos = end + close.len_utf8();
                    return Ok((start, end));
                }
            }
        }
        Err(structure_error(format!("missing '{}'", close)))
    }

    fn lower_construct(&mut self, out: &mut Vec<(usize, String)>) -> StmtResult<(String, String)> {
        self.skip_ws();
        if !self.at_keyword("if") {
            return Err(structure_error("expected 'if'"));
        }
        self.pos += "if".len();
        self.skip_ws();

        let (cs, ce) = self.balanced('(', ')')?;
        let condition = self.text[cs..ce].trim().to_string();
        if condition.is_empty() {
            return Err(structure_error("empty if condition"));
        }
        let header = format!("if ({})", condition);

        self.skip_ws();
        let true_body = self.lower_braced(out)?;

        self.skip_ws();
        let false_body = if self.at_keyword("else") {
            self.pos += "else".len();
            self.skip_ws();
            if self.at_keyword("if") {
                let nested = self.lower_nested(out)?;
                format!("( {} ; )", nested)
            } else {
                self.lower_braced(out)?
            }
        } else {
            "( void )".to_string()
        };

        Ok((format!("( {} ) ? {} : {}", condition, true_body, false_body), header))
    }

    /// 嵌套的 if：先在语句列表中占位，解析完再填入头部
    fn lower_nested(&mut self, out: &mut Vec<(usize, String)>) -> StmtResult<String> {
        let slot = out.len();
        out.push((self.block.line_at(self.pos), String::new()));
        let (text, header) = self.lower_construct(out)?;
        out[slot].1 = header;
        Ok(text)
    }

    fn lower_braced(&mut self, out: &mut Vec<(usize, String)>) -> StmtResult<String> {
        let (start, end) = self.balanced('{', '}')?;
        let resume = self.pos;
        self.pos = start;

        let mut statements = Vec::new();
        loop {
            self.skip_ws();
            if self.pos >= end {
                break;
            }
            if self.peek() == Some(';') {
                self.pos += 1;
                continue;
            }
            if self.at_keyword("if") {
                statements.push(self.lower_nested(out)?);
                continue;
            }
            if self.at_keyword("else") {
                return Err(structure_error("'else' without a matching 'if'"));
            }

            let mut depth = 0i32;
            let mut stop = end;
            for (idx, c) in self.text[self.pos..end].char_indices() {
                match c {
                    '(' | '{' => depth += 1,
                    ')' | '}' => depth -= 1,
                    ';' if depth == 0 => {
                        stop = self.pos + idx;
                        break;
                    }
                    _ => {}
                }
            }
            let stmt = self.text[self.pos..stop].trim();
            out.push((self.block.line_at(self.pos), stmt.to_string()));
            statements.push(stmt.to_string());
            self.pos = stop;
        }

        self.pos = resume;
        if statements.is_empty() {
            Ok("( void )".to_string())
        } else {
            Ok(format!("( {} ; )", statements.join(" ; ")))
        }
    }
}

/// 把 if 子句改写为三元语句
pub fn lower_if(block: &IfBlock) -> StmtResult<Lowered> {
    let mut cursor = Cursor { block, text: block.text(), pos: 0 };
    let mut statements = Vec::new();
    let (text, header) = cursor.lower_construct(&mut statements)?;

    cursor.skip_ws();
    if cursor.peek() == Some(';') {
        cursor.pos += 1;
        cursor.skip_ws();
    }
    if cursor.pos < cursor.text.len() {
        return Err(structure_error(format!(
            "unexpected text after if block: '{}'",
            cursor.text[cursor.pos..].trim()
        )));
    }

    Ok(Lowered { text, header, statements })
}

//! 单一作用域的符号表：栈槽分配、引用计数与槽位回收
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::ast::Node;
use crate::error::{StmtResult, semantic_error, table_error};
use crate::types::{ValueType, is_reserved_type_name};

/// 分支头部把变量原值写入其 home 槽
#[derive(Debug, Clone, PartialEq)]
pub struct Spill {
    /// 栈位置或立即数
    pub source: String,
    pub source_type: ValueType,
    pub home: String,
    pub home_type: ValueType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Else,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    /// 源程序中的变量名，history 记录它绑定过的值
    Variable,
    /// 以解析后表达式文本为键的不可变值，拥有一个栈槽
    Value,
    /// 在 if 结构中被赋值的变量的可写槽
    Home { variable: String },
    /// 分支内对 home 槽的写入
    Store { home: String },
    Call { function: String },
    Branch { has_else: bool, spills: Vec<Spill> },
    Signal { branch: String, signal: SignalKind },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub ty: ValueType,
    pub dependents: usize,
    pub offset: usize,
    pub size: usize,
    pub line: usize,
    pub version: usize,
    pub history: Vec<String>,
    /// 要生成的表达式（值、写入、调用参数、分支条件）
    pub expr: Option<Node>,
    /// 表达式引用的其他条目
    pub operands: Vec<String>,
    /// 注释用的源码文本
    pub source: String,
    pub emit: bool,
}

impl Symbol {
    fn new(kind: SymbolKind, ty: ValueType, line: usize, source: &str) -> Self {
        Symbol {
            kind,
            ty,
            dependents: 0,
            offset: 0,
            size: 0,
            line,
            version: 0,
            history: Vec::new(),
            expr: None,
            operands: Vec::new(),
            source: source.to_string(),
            emit: true,
        }
    }

    /// 是否占用栈槽
    pub fn owns_slot(&self) -> bool {
        matches!(self.kind, SymbolKind::Value | SymbolKind::Home { .. })
    }

    /// 栈位置，例如 `DWORD[rbp-8]`
    pub fn location(&self) -> String {
        stack_location(self.ty, self.offset)
    }

    /// 当前绑定的条目键
    pub fn current(&self) -> Option<&str> {
        self.history.get(self.version).map(String::as_str)
    }

    /// 值条目的表达式是否是字面量
    pub fn literal(&self) -> Option<&Node> {
        match (&self.kind, &self.expr) {
            (SymbolKind::Value, Some(expr)) if expr.is_literal() => Some(expr),
            _ => None,
        }
    }
}

pub fn stack_location(ty: ValueType, offset: usize) -> String {
    format!("{}[rbp-{}]", ty.size_word(), offset)
}

/// 待绑定的值
#[derive(Debug, Clone)]
pub struct PendingValue {
    pub key: String,
    pub expr: Node,
    pub operands: Vec<String>,
    pub ty: ValueType,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<String, Symbol>,
    order: Vec<String>,
    free: Vec<(usize, usize)>,
    high_water: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Symbol> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn free_list(&self) -> &[(usize, usize)] {
        &self.free
    }

    /// 帧大小：向上取整到 16 的倍数
    pub fn frame_size(&self, scratch_bytes: usize) -> usize {
        (self.high_water + scratch_bytes).div_ceil(16) * 16
    }

    /// 代码生成时的临时槽，位于所有已分配槽之后
    pub fn scratch_slot(&self, index: usize, ty: ValueType) -> String {
        stack_location(ty, self.high_water + ty.size_in_bytes() * (index + 1))
    }

    /// 以 `base` 为基础生成一个尚未使用的键
    pub fn unique_key(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}#{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// 仍然存活、可以共享的值
    pub fn is_live_value(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(false, |s| s.kind == SymbolKind::Value && s.dependents > 0)
    }

    /// 变量当前绑定的条目
    pub fn binding_of(&self, variable: &str) -> Option<&Symbol> {
        let var = self.entries.get(variable)?;
        if var.kind != SymbolKind::Variable {
            return None;
        }
        self.entries.get(var.current()?)
    }

    fn allocate(&mut self, size: usize) -> usize {
        if let Some(idx) = self.free.iter().position(|(_, s)| *s >= size) {
            let (offset, free_size) = self.free.remove(idx);
            if free_size > size {
                self.free.push((offset - size, free_size - size));
            }
            trace!(offset, size, "reused slot");
            return offset;
        }
        self.high_water += size;
        trace!(offset = self.high_water, size, "new slot");
        self.high_water
    }

    /// 引用计数加一
    pub fn retain(&mut self, key: &str) {
        if let Some(symbol) = self.entries.get_mut(key) {
            symbol.dependents += 1;
        }
    }

    /// 唯一的回收路径：计数减一，归零时释放栈槽并级联释放其操作数
    pub fn release(&mut self, key: &str) {
        let Some(symbol) = self.entries.get_mut(key) else {
            return;
        };
        if symbol.dependents == 0 {
            return;
        }
        symbol.dependents -= 1;
        if symbol.dependents > 0 {
            return;
        }

        symbol.emit = false;
        let operands = symbol.operands.clone();
        if symbol.owns_slot() {
            let range = (symbol.offset, symbol.size);
            debug!(key, offset = range.0, "slot reclaimed");
            self.free.push(range);
        }
        for operand in operands {
            self.release(&operand);
        }
    }

    fn check_reserved(key: &str, value: &str) -> StmtResult<()> {
        if is_reserved_type_name(key) {
            return Err(table_error(format!("'{}' is a reserved type name", key)));
        }
        if is_reserved_type_name(value) {
            return Err(table_error(format!("'{}' is a reserved type name and cannot be a value", value)));
        }
        Ok(())
    }

    /// 把变量 `key` 绑定到值 `value`。
    ///
    /// `decl` 为 Some 时表示声明。所有检查都在修改之前完成。
    /// 已存在的值只增加引用计数；新值先保留它的操作数，再释放变量的旧值，
    /// 最后分配栈槽，所以旧值刚释放的槽可以立即被新值复用。
    pub fn add_value(
        &mut self,
        key: &str,
        value: PendingValue,
        line: usize,
        decl: Option<ValueType>,
        source: &str,
    ) -> StmtResult<()> {
        Self::check_reserved(key, &value.key)?;

        let var_ty = match (decl, self.entries.get(key)) {
            (Some(_), Some(_)) => {
                return Err(semantic_error(format!("redeclaration of '{}'", key)));
            }
            (Some(ty), None) => ty,
            (None, None) => {
                return Err(semantic_error(format!("'{}' is not declared", key)));
            }
            (None, Some(existing)) if existing.kind != SymbolKind::Variable => {
                return Err(table_error(format!("'{}' is not a variable", key)));
            }
            (None, Some(existing)) => existing.ty,
        };
        if var_ty == ValueType::Int && value.ty == ValueType::Float {
            return Err(semantic_error(format!(
                "cannot assign float value '{}' to int '{}'",
                value.expr.render(),
                key
            )));
        }

        let shared = self.is_live_value(&value.key);
        let value_key = if shared || !self.contains(&value.key) {
            value.key.clone()
        } else {
            self.unique_key(&value.key)
        };

        if shared {
            self.retain(&value_key);
        } else {
            for operand in &value.operands {
                self.retain(operand);
            }
        }

        let old = self.entries.get(key).and_then(|v| v.current().map(str::to_string));
        if let Some(old) = old {
            self.release(&old);
        }

        if !shared {
            let size = value.ty.size_in_bytes();
            let offset = self.allocate(size);
            let mut symbol = Symbol::new(SymbolKind::Value, value.ty, line, source);
            symbol.dependents = 1;
            symbol.offset = offset;
            symbol.size = size;
            symbol.history.push(value_key.clone());
            symbol.expr = Some(value.expr);
            symbol.operands = value.operands;
            self.entries.insert(value_key.clone(), symbol);
            self.order.push(value_key.clone());
            debug!(key = %value_key, offset, "value allocated");
        }

        self.bind(key, &value_key, var_ty, line, source);
        Ok(())
    }

    /// 变量追加一个新版本
    fn bind(&mut self, variable: &str, target: &str, ty: ValueType, line: usize, source: &str) {
        match self.entries.get_mut(variable) {
            Some(var) => {
                var.history.push(target.to_string());
                var.version = var.history.len() - 1;
            }
            None => {
                let mut var = Symbol::new(SymbolKind::Variable, ty, line, source);
                var.history.push(target.to_string());
                self.entries.insert(variable.to_string(), var);
                self.order.push(variable.to_string());
            }
        }
    }

    /// 新建一个不会被回收的值（打印参数等），操作数被保留
    pub fn add_pinned_value(&mut self, value: PendingValue, line: usize, source: &str) -> String {
        if self.is_live_value(&value.key) {
            self.retain(&value.key);
            return value.key;
        }
        let key = self.unique_key(&value.key);
        for operand in &value.operands {
            self.retain(operand);
        }
        let size = value.ty.size_in_bytes();
        let offset = self.allocate(size);
        let mut symbol = Symbol::new(SymbolKind::Value, value.ty, line, source);
        symbol.dependents = 1;
        symbol.offset = offset;
        symbol.size = size;
        symbol.history.push(key.clone());
        symbol.expr = Some(value.expr);
        symbol.operands = value.operands;
        self.entries.insert(key.clone(), symbol);
        self.order.push(key.clone());
        key
    }

    /// 常驻条目（调用、分支、写入、信号），计数固定为一
    fn add_pinned(&mut self, key: &str, mut symbol: Symbol) -> String {
        let key = self.unique_key(key);
        for operand in &symbol.operands {
            if let Some(target) = self.entries.get_mut(operand) {
                target.dependents += 1;
            }
        }
        symbol.dependents = 1;
        symbol.history.push(key.clone());
        self.entries.insert(key.clone(), symbol);
        self.order.push(key.clone());
        key
    }

    pub fn add_call(
        &mut self,
        function: &str,
        argument: Node,
        operands: Vec<String>,
        ty: ValueType,
        line: usize,
        source: &str,
    ) -> String {
        let mut symbol = Symbol::new(SymbolKind::Call { function: function.to_string() }, ty, line, source);
        symbol.expr = Some(argument);
        symbol.operands = operands;
        self.add_pinned(&format!("{}_{}", line, function), symbol)
    }

    pub fn add_branch(
        &mut self,
        condition: Node,
        operands: Vec<String>,
        has_else: bool,
        spills: Vec<Spill>,
        line: usize,
        source: &str,
    ) -> String {
        let mut symbol = Symbol::new(SymbolKind::Branch { has_else, spills }, ValueType::Int, line, source);
        symbol.expr = Some(condition);
        symbol.operands = operands;
        // `@` 不会出现在标识符里，分支键不会与变量冲突
        self.add_pinned(&format!("@if_{}", line), symbol)
    }

    /// 分支条目创建之后才知道 home 槽，写入在这里补上
    pub fn attach_spills(&mut self, branch: &str, new_spills: Vec<Spill>) {
        if let Some(Symbol { kind: SymbolKind::Branch { spills, .. }, .. }) = self.entries.get_mut(branch) {
            spills.extend(new_spills);
        }
    }

    pub fn add_signal(&mut self, branch: &str, signal: SignalKind, line: usize) -> String {
        let suffix = match signal {
            SignalKind::Else => "else",
            SignalKind::Done => "done",
        };
        let symbol = Symbol::new(
            SymbolKind::Signal { branch: branch.to_string(), signal },
            ValueType::Int,
            line,
            "",
        );
        self.add_pinned(&format!("{}_{}", branch, suffix), symbol)
    }

    pub fn add_store(
        &mut self,
        variable: &str,
        expr: Node,
        operands: Vec<String>,
        line: usize,
        source: &str,
    ) -> StmtResult<String> {
        let home = self
            .binding_of(variable)
            .filter(|s| matches!(s.kind, SymbolKind::Home { .. }))
            .and_then(|s| s.history.first().cloned())
            .ok_or_else(|| {
                semantic_error(format!("'{}' has no storage inside this if block", variable))
            })?;
        let ty = self.entries.get(&home).map_or(ValueType::Int, |h| h.ty);
        let mut symbol = Symbol::new(SymbolKind::Store { home }, ty, line, source);
        symbol.expr = Some(expr);
        symbol.operands = operands;
        Ok(self.add_pinned(&format!("{}@{}", variable, line), symbol))
    }

    /// 为变量准备 home 槽并绑定过去。
    ///
    /// 返回需要在分支头部执行的写入；变量已经绑定在自己的 home 上时返回 None。
    /// `initial` 为变量原来的操作数（栈位置或立即数）。
    pub fn bind_home(
        &mut self,
        variable: &str,
        ty: ValueType,
        initial: (String, ValueType),
        line: usize,
    ) -> Option<Spill> {
        if let Some(Symbol { kind: SymbolKind::Home { variable: owner }, dependents, .. }) =
            self.binding_of(variable)
        {
            if owner == variable && *dependents > 0 {
                return None;
            }
        }

        let key = self.unique_key(&format!("{}@home", variable));
        let size = ty.size_in_bytes();

        let old = self.entries.get(variable).and_then(|v| v.current().map(str::to_string));
        if let Some(old) = old {
            self.release(&old);
        }

        let offset = self.allocate(size);
        let mut symbol = Symbol::new(SymbolKind::Home { variable: variable.to_string() }, ty, line, "");
        symbol.dependents = 1;
        symbol.offset = offset;
        symbol.size = size;
        symbol.history.push(key.clone());
        let home = symbol.location();
        self.entries.insert(key.clone(), symbol);
        self.order.push(key.clone());
        self.bind(variable, &key, ty, line, "");
        debug!(variable, home = %home, "home slot bound");

        Some(Spill { source: initial.0, source_type: initial.1, home, home_type: ty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatementError;

    fn literal(text: &str) -> PendingValue {
        let expr = Node::literal(text);
        PendingValue {
            key: text.to_string(),
            ty: expr.literal_type().unwrap(),
            expr,
            operands: Vec::new(),
        }
    }

    #[test]
    fn test_shared_literal_value() {
        let mut table = SymbolTable::new();
        table.add_value("x", literal("5"), 1, Some(ValueType::Int), "").unwrap();
        table.add_value("y", literal("5"), 2, Some(ValueType::Int), "").unwrap();
        let value = table.get("5").unwrap();
        assert_eq!(value.dependents, 2);
        assert_eq!(value.location(), "DWORD[rbp-4]");
        assert_eq!(table.high_water(), 4);
        assert_eq!(table.frame_size(0), 16);
    }

    #[test]
    fn test_reassignment_reuses_slot() {
        let mut table = SymbolTable::new();
        table.add_value("a", literal("1"), 1, Some(ValueType::Int), "").unwrap();
        table.add_value("a", literal("2"), 2, None, "").unwrap();
        let old = table.get("1").unwrap();
        assert_eq!(old.dependents, 0);
        assert!(!old.emit);
        assert_eq!(table.get("2").unwrap().offset, 4);
        assert_eq!(table.high_water(), 4);
        let a = table.get("a").unwrap();
        assert_eq!(a.history, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(a.version, 1);
    }

    #[test]
    fn test_freed_slot_reused_by_later_declaration() {
        let mut table = SymbolTable::new();
        table.add_value("a", literal("1"), 1, Some(ValueType::Int), "").unwrap();
        table.add_value("keep", literal("9"), 2, Some(ValueType::Int), "").unwrap();
        let a_offset = table.get("1").unwrap().offset;
        table.release("1");
        assert_eq!(table.free_list(), &[(a_offset, 4)]);
        table.add_value("b", literal("3"), 3, Some(ValueType::Int), "").unwrap();
        assert_eq!(table.get("3").unwrap().offset, a_offset);
        assert!(table.free_list().is_empty());
    }

    #[test]
    fn test_dependents_never_negative() {
        let mut table = SymbolTable::new();
        table.add_value("a", literal("1"), 1, Some(ValueType::Int), "").unwrap();
        table.release("1");
        table.release("1");
        assert_eq!(table.get("1").unwrap().dependents, 0);
        assert_eq!(table.free_list().len(), 1);
    }

    #[test]
    fn test_dead_key_not_revived() {
        let mut table = SymbolTable::new();
        table.add_value("a", literal("1"), 1, Some(ValueType::Int), "").unwrap();
        table.add_value("a", literal("2"), 2, None, "").unwrap();
        table.add_value("b", literal("1"), 3, Some(ValueType::Int), "").unwrap();
        let b = table.get("b").unwrap();
        assert_eq!(b.current(), Some("1#2"));
        assert!(table.get("1#2").unwrap().emit);
    }

    #[test]
    fn test_operand_kept_alive() {
        let mut table = SymbolTable::new();
        table.add_value("x", literal("5"), 1, Some(ValueType::Int), "").unwrap();
        let mut leaf = Node::leaf(crate::ast::NodeKind::Name, "x");
        leaf.resolved = "DWORD[rbp-4]".to_string();
        let expr = Node::op("+", leaf, Node::int(1));
        let pending = PendingValue {
            key: expr.render_resolved(),
            expr,
            operands: vec!["5".to_string()],
            ty: ValueType::Int,
        };
        table.add_value("x", pending, 2, None, "").unwrap();
        assert_eq!(table.get("5").unwrap().dependents, 1);
        assert_eq!(table.get("DWORD[rbp-4] + 1").unwrap().offset, 8);

        table.add_value("x", literal("0"), 3, None, "").unwrap();
        assert!(!table.get("5").unwrap().emit);
        assert_eq!(table.free_list().len(), 1);
    }

    #[test]
    fn test_errors_leave_table_untouched() {
        let mut table = SymbolTable::new();
        table.add_value("x", literal("5"), 1, Some(ValueType::Int), "").unwrap();
        assert!(matches!(
            table.add_value("x", literal("6"), 2, Some(ValueType::Int), ""),
            Err(StatementError::Semantic { .. })
        ));
        assert!(matches!(
            table.add_value("z", literal("6"), 2, None, ""),
            Err(StatementError::Semantic { .. })
        ));
        assert!(matches!(
            table.add_value("int", literal("6"), 2, Some(ValueType::Int), ""),
            Err(StatementError::Table { .. })
        ));
        assert!(matches!(
            table.add_value("i", literal("2.5"), 2, Some(ValueType::Int), ""),
            Err(StatementError::Semantic { .. })
        ));
        assert_eq!(table.order().len(), 2);
        assert!(!table.contains("6"));
    }

    #[test]
    fn test_pinned_entries() {
        let mut table = SymbolTable::new();
        table.add_value("x", literal("5"), 1, Some(ValueType::Int), "").unwrap();
        let call = table.add_call("print", Node::literal("5"), vec!["5".to_string()], ValueType::Int, 2, "print x;");
        assert_eq!(call, "2_print");
        assert_eq!(table.get("5").unwrap().dependents, 2);
        let again = table.add_call("print", Node::literal("5"), vec![], ValueType::Int, 2, "print x;");
        assert_eq!(again, "2_print#2");
        let branch = table.add_branch(Node::literal("1"), vec![], true, vec![], 4, "if (1)");
        assert_eq!(branch, "@if_4");
        assert_eq!(table.add_signal(&branch, SignalKind::Else, 4), "@if_4_else");
    }

    #[test]
    fn test_home_binding() {
        let mut table = SymbolTable::new();
        table.add_value("c", literal("0"), 1, Some(ValueType::Int), "").unwrap();
        let spill = table
            .bind_home("c", ValueType::Int, ("0".to_string(), ValueType::Int), 2)
            .unwrap();
        // 旧值的槽刚被释放，home 复用它
        assert_eq!(spill.home, "DWORD[rbp-4]");
        assert_eq!(spill.source, "0");
        assert!(table.bind_home("c", ValueType::Int, ("0".to_string(), ValueType::Int), 3).is_none());
        let store = table.add_store("c", Node::literal("1"), vec![], 2, "c = 1").unwrap();
        assert_eq!(store, "c@2");
        assert!(table.add_store("x", Node::literal("1"), vec![], 2, "").is_err());
    }
}

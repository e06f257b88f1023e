//! 语句分析：词法 → 降级 → 文法校验 → 建树 → 优化 → 符号解析 → 写入符号表
pub mod symbols;

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, instrument};

use crate::ast::{Node, NodeKind, is_relational};
use crate::error::{StmtResult, semantic_error, structure_error, table_error};
use crate::grammar::LL1;
use crate::lexer::{TokenKind, significant_tokens, tokenize};
use crate::optimizer::Optimizer;
use crate::parser::{OperatorTable, TreeBuilder};
use crate::preprocessor::{IfBlock, Unit, lower_if};
use crate::types::ValueType;
use symbols::{SignalKind, Spill, SymbolKind, SymbolTable, PendingValue};

/// 语句在源码中的位置和文本
#[derive(Debug, Clone)]
struct Origin {
    line: usize,
    source: String,
}

/// if 结构内各语句的来源，按前序依次取出
struct BodyQueue {
    items: VecDeque<(usize, String)>,
    fallback: Origin,
}

impl BodyQueue {
    fn next(&mut self) -> Origin {
        match self.items.pop_front() {
            Some((line, source)) => Origin { line, source },
            None => self.fallback.clone(),
        }
    }
}

/// 符号解析的结果：栈位置 -> 条目键
struct Resolution {
    node: Node,
    locations: HashMap<String, String>,
    homes: HashSet<String>,
}

impl Resolution {
    /// 优化后的树实际引用的条目
    fn operands(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_locations(&self.node, &mut |loc: &str| {
            if let Some(key) = self.locations.get(loc) {
                keys.push(key.clone());
            }
        });
        keys
    }

    fn touches_home(&self) -> bool {
        let mut found = false;
        collect_locations(&self.node, &mut |loc: &str| found |= self.homes.contains(loc));
        found
    }
}

fn collect_locations(node: &Node, f: &mut dyn FnMut(&str)) {
    match &node.children {
        None => {
            if node.value.kind == NodeKind::Name && !node.resolved.is_empty() {
                f(&node.resolved);
            }
        }
        Some(children) => {
            collect_locations(&children.0, f);
            collect_locations(&children.1, f);
        }
    }
}

/// 表达式的结果类型
pub fn expr_type(node: &Node) -> StmtResult<ValueType> {
    let (Some(left), Some(right)) = (node.left(), node.right()) else {
        return Ok(node.literal_type().or(node.ty).unwrap_or(ValueType::Int));
    };
    let (lt, rt) = (expr_type(left)?, expr_type(right)?);
    match node.lexeme() {
        op if is_relational(op) => Ok(ValueType::Int),
        "^" => {
            if rt == ValueType::Float {
                return Err(semantic_error(format!(
                    "exponent '{}' must be an integer",
                    right.render()
                )));
            }
            Ok(lt)
        }
        _ => Ok(lt.widen(rt)),
    }
}

/// 展开 `;` 链
fn flatten<'n>(node: &'n Node, out: &mut Vec<&'n Node>) {
    if node.is_operator(";") {
        if let (Some(l), Some(r)) = (node.left(), node.right()) {
            flatten(l, out);
            flatten(r, out);
        }
    } else if !node.is_void() {
        out.push(node);
    }
}

/// 收集 if 结构中所有被赋值或声明的变量
fn collect_targets(node: &Node, out: &mut Vec<(String, Option<ValueType>)>) -> StmtResult<()> {
    let mut record = |name: &str, decl: Option<ValueType>| -> StmtResult<()> {
        match out.iter().find(|(n, _)| n == name) {
            Some((_, existing)) => match (existing.is_some(), decl.is_some()) {
                (true, true) => Err(semantic_error(format!("redeclaration of '{}'", name))),
                (false, true) => Err(semantic_error(format!("'{}' is used before its declaration", name))),
                _ => Ok(()),
            },
            None => {
                out.push((name.to_string(), decl));
                Ok(())
            }
        }
    };

    match &node.value.kind {
        NodeKind::Declaration(ty) => record(node.lexeme(), Some(*ty)),
        _ if node.is_operator("=") => match node.left() {
            Some(target) => match &target.value.kind {
                NodeKind::Declaration(ty) => record(target.lexeme(), Some(*ty)),
                NodeKind::Name => record(target.lexeme(), None),
                _ => Err(structure_error("left side of '=' must be a name")),
            },
            None => Ok(()),
        },
        _ if node.is_operator("?") => match node.right() {
            Some(branches) => collect_targets(branches, out),
            None => Ok(()),
        },
        _ if node.is_operator(";") || node.is_operator(":") => {
            if let (Some(l), Some(r)) = (node.left(), node.right()) {
                collect_targets(l, out)?;
                collect_targets(r, out)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn zero_of(ty: ValueType) -> Node {
    match ty {
        ValueType::Int => Node::int(0),
        ValueType::Float => Node::literal("0.0"),
    }
}

pub struct Analyzer<'a> {
    ll1: &'a LL1,
    ops: &'a OperatorTable,
    optimizer: Optimizer,
    table: SymbolTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(ll1: &'a LL1, ops: &'a OperatorTable, optimizer: Optimizer) -> Self {
        Analyzer { ll1, ops, optimizer, table: SymbolTable::new() }
    }

    pub fn into_table(self) -> SymbolTable {
        self.table
    }

    /// 处理一个单元。失败时符号表恢复到处理之前的状态。
    #[instrument(skip_all)]
    pub fn process(&mut self, unit: &Unit) -> StmtResult<()> {
        let checkpoint = self.table.clone();
        let result = match unit {
            Unit::Statement { line, text } => self.statement(*line, text),
            Unit::IfBlock(block) => self.if_block(block),
        };
        if result.is_err() {
            self.table = checkpoint;
        }
        result
    }

    fn build(&self, text: &str) -> StmtResult<Option<Node>> {
        let tokens = significant_tokens(tokenize(text)?);
        if tokens.is_empty() {
            return Ok(None);
        }
        self.ll1.validate(&tokens)?;
        let tree = TreeBuilder::new(self.ops).build(&tokens)?;
        Ok(Some(self.optimizer.optimize(tree)?))
    }

    fn statement(&mut self, line: usize, text: &str) -> StmtResult<()> {
        let tokens = tokenize(text)?;
        if tokens.first().map(|t| t.kind) == Some(TokenKind::IfBlock) {
            return self.if_block(&IfBlock::from_text(line, text));
        }
        let Some(tree) = self.build(text)? else {
            return Ok(());
        };
        debug!(line, tree = %tree.render(), "statement");

        let origin = Origin { line, source: text.to_string() };
        let mut queue = BodyQueue { items: VecDeque::new(), fallback: origin.clone() };
        self.dispatch(&tree, &origin, false, &mut queue)
    }

    fn if_block(&mut self, block: &IfBlock) -> StmtResult<()> {
        let lowered = lower_if(block)?;
        debug!(line = block.line, lowered = %lowered.text, "if block lowered");
        let Some(tree) = self.build(&lowered.text)? else {
            return Err(structure_error("empty if block"));
        };
        let origin = Origin { line: block.line, source: lowered.header.clone() };
        let mut queue = BodyQueue {
            items: lowered.statements.into_iter().collect(),
            fallback: origin.clone(),
        };
        self.dispatch(&tree, &origin, false, &mut queue)
    }

    fn dispatch(&mut self, node: &Node, origin: &Origin, in_branch: bool, queue: &mut BodyQueue) -> StmtResult<()> {
        if node.is_operator(";") {
            let mut statements = Vec::new();
            flatten(node, &mut statements);
            for stmt in statements {
                self.dispatch(stmt, origin, in_branch, queue)?;
            }
            return Ok(());
        }
        if node.is_void() {
            return Ok(());
        }
        if let NodeKind::Declaration(ty) = node.value.kind {
            return self.assign(node, &zero_of(ty), origin, in_branch);
        }
        match (node.lexeme(), node.left(), node.right()) {
            ("=", Some(target), Some(expr)) if !node.is_leaf() => self.assign(target, expr, origin, in_branch),
            ("<<", Some(_), Some(arg)) if !node.is_leaf() => self.print(arg, origin, in_branch),
            ("?", Some(_), Some(_)) if !node.is_leaf() => self.branch(node, origin, in_branch, queue),
            _ => Err(structure_error(format!("statement has no effect: '{}'", node.render()))),
        }
    }

    /// 解析名字：绑定到字面量的名字直接替换为字面量，其余替换为栈位置
    fn resolve(&self, node: &Node) -> StmtResult<Resolution> {
        let mut locations = HashMap::new();
        let mut homes = HashSet::new();
        let node = self.resolve_node(node, &mut locations, &mut homes)?;
        Ok(Resolution { node, locations, homes })
    }

    fn resolve_node(
        &self,
        node: &Node,
        locations: &mut HashMap<String, String>,
        homes: &mut HashSet<String>,
    ) -> StmtResult<Node> {
        if let (Some(l), Some(r)) = (node.left(), node.right()) {
            if matches!(node.lexeme(), "=" | ";" | "?" | ":" | "<<") {
                return Err(structure_error(format!("unexpected '{}' inside an expression", node.lexeme())));
            }
            let left = self.resolve_node(l, locations, homes)?;
            let right = self.resolve_node(r, locations, homes)?;
            return Ok(Node::op(node.lexeme(), left, right));
        }

        match &node.value.kind {
            NodeKind::Int | NodeKind::Float => {
                let mut leaf = node.clone();
                leaf.resolved = node.lexeme().to_string();
                leaf.ty = node.literal_type();
                Ok(leaf)
            }
            NodeKind::Name => {
                let (key, symbol) = self.bound(node.lexeme())?;
                if let Some(literal) = symbol.literal() {
                    let mut leaf = Node::literal(literal.lexeme());
                    leaf.resolved = literal.lexeme().to_string();
                    leaf.ty = literal.literal_type();
                    return Ok(leaf);
                }
                let location = symbol.location();
                if matches!(symbol.kind, SymbolKind::Home { .. }) {
                    homes.insert(location.clone());
                }
                locations.insert(location.clone(), key);
                let mut leaf = node.clone();
                leaf.resolved = location;
                leaf.ty = Some(symbol.ty);
                Ok(leaf)
            }
            _ => Err(structure_error(format!("'{}' cannot be used as a value", node.render()))),
        }
    }

    /// 变量当前绑定的条目键与条目
    fn bound(&self, name: &str) -> StmtResult<(String, &symbols::Symbol)> {
        let var = match self.table.get(name) {
            Some(var) if var.kind == SymbolKind::Variable => var,
            Some(_) => return Err(table_error(format!("'{}' is not a variable", name))),
            None => return Err(semantic_error(format!("'{}' is not declared", name))),
        };
        let key = var
            .current()
            .ok_or_else(|| semantic_error(format!("'{}' has no value", name)))?
            .to_string();
        let symbol = self
            .table
            .get(&key)
            .ok_or_else(|| table_error(format!("dangling binding '{}' for '{}'", key, name)))?;
        Ok((key, symbol))
    }

    fn assign(&mut self, target: &Node, expr: &Node, origin: &Origin, in_branch: bool) -> StmtResult<()> {
        let (name, decl) = match &target.value.kind {
            NodeKind::Name => (target.lexeme().to_string(), None),
            NodeKind::Declaration(ty) => (target.lexeme().to_string(), Some(*ty)),
            _ => return Err(structure_error("left side of '=' must be a name")),
        };

        let mut resolution = self.resolve(expr)?;
        resolution.node = self.optimizer.optimize(resolution.node)?;
        let var_ty = decl.or_else(|| self.table.get(&name).map(|v| v.ty));
        if var_ty == Some(ValueType::Float) && resolution.node.literal_type() == Some(ValueType::Int) {
            let text = format!("{}.0", resolution.node.lexeme());
            resolution.node = Node::literal(&text);
            resolution.node.resolved = text;
            resolution.node.ty = Some(ValueType::Float);
        }
        let value_ty = expr_type(&resolution.node)?;
        let operands = resolution.operands();

        if in_branch {
            if value_ty == ValueType::Float && var_ty == Some(ValueType::Int) {
                return Err(semantic_error(format!(
                    "cannot assign float value '{}' to int '{}'",
                    resolution.node.render(),
                    name
                )));
            }
            let key = self.table.add_store(&name, resolution.node, operands, origin.line, &origin.source)?;
            debug!(store = %key, "branch store");
            return Ok(());
        }

        // 整数表达式赋给浮点变量时，值本身是浮点的
        let ty = match var_ty {
            Some(ValueType::Float) => ValueType::Float,
            _ => value_ty,
        };
        let converted = ty != value_ty;
        let touches_home = resolution.touches_home();
        let node = &resolution.node;
        let text = if converted {
            format!("{}({})", ty, node.render_resolved())
        } else {
            node.render_resolved()
        };
        let key = if touches_home {
            self.table.unique_key(&format!("{}@{}", text, origin.line))
        } else if !converted && node.is_leaf() && node.value.kind == NodeKind::Name {
            operands.first().cloned().unwrap_or(text)
        } else {
            text
        };

        let pending = PendingValue { key, expr: resolution.node, operands, ty };
        self.table.add_value(&name, pending, origin.line, decl, &origin.source)
    }

    fn print(&mut self, arg: &Node, origin: &Origin, in_branch: bool) -> StmtResult<()> {
        let mut resolution = if arg.value.kind == NodeKind::Name && arg.is_leaf() {
            // 打印参数总是一个栈位置，不做字面量替换
            let (key, symbol) = self.bound(arg.lexeme())?;
            let mut leaf = arg.clone();
            leaf.resolved = symbol.location();
            leaf.ty = Some(symbol.ty);
            let mut homes = HashSet::new();
            if matches!(symbol.kind, SymbolKind::Home { .. }) {
                homes.insert(leaf.resolved.clone());
            }
            Resolution { locations: HashMap::from([(leaf.resolved.clone(), key)]), node: leaf, homes }
        } else {
            self.resolve(arg)?
        };
        resolution.node = self.optimizer.optimize(resolution.node)?;
        let ty = expr_type(&resolution.node)?;

        let (argument, operands) = if resolution.node.is_leaf() && resolution.node.value.kind == NodeKind::Name {
            let operands = resolution.operands();
            (resolution.node, operands)
        } else {
            let text = resolution.node.render_resolved();
            let key = if in_branch || resolution.touches_home() {
                self.table.unique_key(&format!("{}@{}", text, origin.line))
            } else {
                text
            };
            let operands = resolution.operands();
            let pending = PendingValue { key, expr: resolution.node, operands, ty };
            let value_key = self.table.add_pinned_value(pending, origin.line, &origin.source);
            let location = self
                .table
                .get(&value_key)
                .map(|v| v.location())
                .ok_or_else(|| table_error(format!("missing value '{}'", value_key)))?;
            let mut leaf = Node::leaf(NodeKind::Name, value_key.clone());
            leaf.resolved = location;
            leaf.ty = Some(ty);
            (leaf, vec![value_key])
        };

        let key = self.table.add_call("print", argument, operands, ty, origin.line, &origin.source);
        debug!(call = %key, "print");
        Ok(())
    }

    /// 降级后的三元语句。最外层结构负责为被赋值的变量准备 home 槽。
    fn branch(&mut self, node: &Node, origin: &Origin, nested: bool, queue: &mut BodyQueue) -> StmtResult<()> {
        let (Some(condition), Some(branches)) = (node.left(), node.right()) else {
            return Err(structure_error("malformed ternary statement"));
        };
        if !branches.is_operator(":") {
            return Err(structure_error("ternary statement without ':'"));
        }
        let (Some(then_body), Some(else_body)) = (branches.left(), branches.right()) else {
            return Err(structure_error("malformed ternary statement"));
        };

        let mut targets = Vec::new();
        if !nested {
            collect_targets(branches, &mut targets)?;
            for (name, decl) in &targets {
                match (decl, self.table.get(name)) {
                    (Some(_), Some(_)) => return Err(semantic_error(format!("redeclaration of '{}'", name))),
                    (None, None) => return Err(semantic_error(format!("'{}' is not declared", name))),
                    (None, Some(v)) if v.kind != SymbolKind::Variable => {
                        return Err(table_error(format!("'{}' is not a variable", name)));
                    }
                    _ => {}
                }
            }
        }

        let mut resolution = self.resolve(condition)?;
        resolution.node = self.optimizer.optimize(resolution.node)?;
        let mut operands = resolution.operands();

        // 分支头部写入 home 的初值
        let mut initials = Vec::new();
        for (name, decl) in &targets {
            let (var_ty, initial) = match decl {
                Some(ty) => (*ty, Some((zero_of(*ty).lexeme().to_string(), *ty))),
                None => {
                    let (key, symbol) = self.bound(name)?;
                    let var_ty = self.table.get(name).map_or(symbol.ty, |v| v.ty);
                    let initial = match (&symbol.kind, symbol.literal()) {
                        (SymbolKind::Home { variable }, _) if variable == name && symbol.dependents > 0 => None,
                        (_, Some(lit)) => Some((lit.lexeme().to_string(), symbol.ty)),
                        _ => {
                            operands.push(key);
                            Some((symbol.location(), symbol.ty))
                        }
                    };
                    (var_ty, initial)
                }
            };
            if let Some(initial) = initial {
                initials.push((name.clone(), var_ty, initial));
            }
        }

        let has_else = !else_body.is_void();
        let key = self.table.add_branch(
            resolution.node,
            operands,
            has_else,
            Vec::new(),
            origin.line,
            &origin.source,
        );

        let mut spills: Vec<Spill> = Vec::new();
        for (name, var_ty, initial) in initials {
            spills.extend(self.table.bind_home(&name, var_ty, initial, origin.line));
        }
        self.table.attach_spills(&key, spills);
        debug!(branch = %key, has_else, "branch");

        self.body(then_body, queue)?;
        if has_else {
            self.table.add_signal(&key, SignalKind::Else, origin.line);
            self.body(else_body, queue)?;
        }
        self.table.add_signal(&key, SignalKind::Done, origin.line);
        Ok(())
    }

    fn body(&mut self, node: &Node, queue: &mut BodyQueue) -> StmtResult<()> {
        let mut statements = Vec::new();
        flatten(node, &mut statements);
        for stmt in statements {
            let origin = queue.next();
            self.dispatch(stmt, &origin, true, queue)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatementError;
    use crate::grammar::Grammar;
    use crate::optimizer::OptLevel;
    use crate::preprocessor::IfAccumulator;

    fn run(source: &str) -> (SymbolTable, Vec<StatementError>) {
        let ll1 = LL1::new(Grammar::builtin().unwrap());
        let ops = OperatorTable::new();
        let mut analyzer = Analyzer::new(&ll1, &ops, Optimizer::new(OptLevel::Full));
        let mut acc = IfAccumulator::new();
        let mut errors = Vec::new();
        let mut units = Vec::new();
        for (i, line) in source.lines().enumerate() {
            units.extend(acc.feed(i + 1, line));
        }
        units.extend(acc.finish());
        for unit in &units {
            if let Err(e) = analyzer.process(unit) {
                errors.push(e);
            }
        }
        (analyzer.into_table(), errors)
    }

    #[test]
    fn test_constant_propagation_shares_value() {
        let (table, errors) = run("int x = 5; int y = x * 1; print y;");
        assert!(errors.is_empty(), "{errors:?}");
        let five = table.get("5").unwrap();
        assert_eq!(five.dependents, 3);
        assert_eq!(table.high_water(), 4);
        assert_eq!(table.get("y").unwrap().current(), Some("5"));
    }

    #[test]
    fn test_folding_after_propagation() {
        let (table, errors) = run("int x = 5;\nint y = x * 2 + 1;");
        assert!(errors.is_empty());
        assert_eq!(table.get("y").unwrap().current(), Some("11"));
    }

    #[test]
    fn test_reassignment_folds_through_literals() {
        let (table, errors) = run("int a = 2;\na = a * a;\nint b = a + 1;");
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(table.get("a").unwrap().current(), Some("4"));
        assert_eq!(table.get("b").unwrap().current(), Some("5"));
        assert!(!table.get("2").unwrap().emit);
    }

    #[test]
    fn test_value_reading_home_is_unique() {
        let (table, errors) = run("int c = 1;\nif (c > 0) { c = 2; }\nint d = c + 1;\nint e = c + 1;\nfloat f = c;");
        assert!(errors.is_empty(), "{errors:?}");
        let home = table.binding_of("c").unwrap().location();
        let d = table.get("d").unwrap().current().unwrap().to_string();
        let e = table.get("e").unwrap().current().unwrap().to_string();
        assert_eq!(d, format!("{} + 1@3", home));
        assert_ne!(d, e);
        assert_eq!(table.get(&d).unwrap().operands, vec!["c@home".to_string()]);
        let f = table.binding_of("f").unwrap();
        assert_eq!(f.ty, ValueType::Float);
        assert_eq!(table.get("c@home").unwrap().dependents, 4);
    }

    #[test]
    fn test_errors_are_transactional() {
        let (table, errors) = run("int x = 1;\nint x = 2;\ny = 3;\nint z = x / 0;\nint w = 2.5;");
        assert_eq!(errors.len(), 4);
        assert!(matches!(errors[0], StatementError::Semantic { .. }));
        assert!(matches!(errors[1], StatementError::Semantic { .. }));
        assert!(matches!(errors[2], StatementError::Arithmetic { .. }));
        assert!(matches!(errors[3], StatementError::Semantic { .. }));
        assert_eq!(table.order().len(), 2);
    }

    #[test]
    fn test_float_declaration_from_int_literal() {
        let (table, errors) = run("float f = 3;");
        assert!(errors.is_empty());
        assert_eq!(table.get("f").unwrap().current(), Some("3.0"));
    }

    #[test]
    fn test_print_literal_gets_slot() {
        let (table, errors) = run("print 7;");
        assert!(errors.is_empty());
        assert!(table.get("7").is_some());
        assert!(table.get("1_print").is_some());
    }

    #[test]
    fn test_if_else_entries() {
        let (table, errors) = run(
            "int a = 1;\nint b = 2;\nint c = 0;\nif (a == b) {\n c = 1;\n} else {\n c = 2;\n}\nprint c;",
        );
        assert!(errors.is_empty(), "{errors:?}");
        let order = table.order();
        let pos = |k: &str| order.iter().position(|o| o == k).unwrap();
        assert!(pos("@if_4") < pos("c@5"));
        assert!(pos("c@5") < pos("@if_4_else"));
        assert!(pos("@if_4_else") < pos("c@7"));
        assert!(pos("c@7") < pos("@if_4_done"));
        match &table.get("@if_4").unwrap().kind {
            SymbolKind::Branch { has_else, spills } => {
                assert!(*has_else);
                assert_eq!(spills.len(), 1);
                assert_eq!(spills[0].source, "0");
            }
            other => panic!("unexpected {other:?}"),
        }
        // 结构之后 c 读取的是 home 槽
        let c_binding = table.binding_of("c").unwrap();
        assert!(matches!(c_binding.kind, SymbolKind::Home { .. }));
    }

    #[test]
    fn test_nested_if_and_declaration_inside() {
        let (table, errors) = run(
            "int a = 3;\nif (a > 1) {\n int t = a * 2;\n if (t > 4) { print t; }\n}",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(table.get("@if_2").is_some());
        assert!(table.get("@if_4").is_some());
        assert!(table.get("@if_4_done").is_some());
        assert!(table.get("t@3").is_some());
        assert!(table.get("4_print").is_some());
    }

    #[test]
    fn test_failed_if_block_rolls_back() {
        let (table, errors) = run("int a = 1;\nif (a > 0) { b = 1; }");
        assert_eq!(errors.len(), 1);
        assert!(!table.contains("@if_2"));
        assert_eq!(table.order().len(), 2);
    }

    #[test]
    fn test_expression_type() {
        let mut leaf = Node::leaf(NodeKind::Name, "f");
        leaf.ty = Some(ValueType::Float);
        assert_eq!(expr_type(&Node::op("+", leaf.clone(), Node::int(1))).unwrap(), ValueType::Float);
        assert_eq!(expr_type(&Node::op("<", leaf.clone(), Node::int(1))).unwrap(), ValueType::Int);
        assert!(expr_type(&Node::op("^", Node::int(2), leaf)).is_err());
    }
}

//! LL(1) 文法引擎：读取产生式、构造集合与分析表、校验 token 序列
pub mod sets;

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use tracing::{debug, instrument};

use crate::error::{FatalError, FatalResult, StmtResult, grammar_error};
use crate::lexer::{Token, TokenKind};
use sets::{ParseTable, SetFamily};

/// 输入结束标记
pub const EOF: &str = "eof";

/// 内置的语句文法
pub const BUILTIN_GRAMMAR: &str = include_str!("statements.ll1");

#[derive(Debug, Clone, PartialEq)]
pub struct Production {
    pub lhs: String,
    pub rhs: Vec<String>,
    /// 全局插入顺序编号
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Grammar {
    start: String,
    epsilon: String,
    nonterminals: Vec<String>,
    nonterminal_set: HashSet<String>,
    terminals: BTreeSet<String>,
    productions: Vec<Production>,
}

impl Grammar {
    /// 解析产生式文本。空行和 `#` 开头的行被忽略。
    pub fn parse(text: &str, delimiter: &str, epsilon: &str) -> FatalResult<Self> {
        let delimiter = delimiter.trim();
        if delimiter.is_empty() {
            return Err(FatalError::GrammarDefinition("empty production delimiter".to_string()));
        }

        let mut start: Option<String> = None;
        let mut nonterminals = Vec::new();
        let mut nonterminal_set = HashSet::new();
        let mut productions = Vec::new();

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (lhs, rhs) = line.split_once(delimiter).ok_or_else(|| {
                FatalError::GrammarDefinition(format!(
                    "line {}: missing delimiter '{}' in '{}'",
                    number + 1,
                    delimiter,
                    line
                ))
            })?;

            let mut lhs = lhs.trim();
            if let Some(stripped) = lhs.strip_prefix('*') {
                lhs = stripped.trim();
                match &start {
                    Some(existing) if existing != lhs => {
                        return Err(FatalError::GrammarDefinition(format!(
                            "line {}: second start symbol '{}' (already '{}')",
                            number + 1,
                            lhs,
                            existing
                        )));
                    }
                    _ => start = Some(lhs.to_string()),
                }
            }
            if lhs.is_empty() || lhs.contains(char::is_whitespace) {
                return Err(FatalError::GrammarDefinition(format!(
                    "line {}: left-hand side must be a single symbol",
                    number + 1
                )));
            }

            let rhs: Vec<String> = rhs.split_whitespace().map(str::to_string).collect();
            if rhs.is_empty() {
                return Err(FatalError::GrammarDefinition(format!(
                    "line {}: empty right-hand side, write '{}' instead",
                    number + 1,
                    epsilon
                )));
            }

            if nonterminal_set.insert(lhs.to_string()) {
                nonterminals.push(lhs.to_string());
            }
            let index = productions.len();
            productions.push(Production { lhs: lhs.to_string(), rhs, index });
        }

        let start = start.ok_or_else(|| {
            FatalError::GrammarDefinition("no start symbol marked with '*'".to_string())
        })?;

        let terminals = productions
            .iter()
            .flat_map(|p| p.rhs.iter())
            .filter(|s| !nonterminal_set.contains(*s) && s.as_str() != epsilon)
            .cloned()
            .collect();

        Ok(Grammar {
            start,
            epsilon: epsilon.to_string(),
            nonterminals,
            nonterminal_set,
            terminals,
            productions,
        })
    }

    pub fn builtin() -> FatalResult<Self> {
        Self::parse(BUILTIN_GRAMMAR, " -> ", "ε")
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn epsilon(&self) -> &str {
        &self.epsilon
    }

    pub fn nonterminals(&self) -> &[String] {
        &self.nonterminals
    }

    pub fn terminals(&self) -> &BTreeSet<String> {
        &self.terminals
    }

    pub fn productions(&self) -> &[Production] {
        &self.productions
    }

    pub fn is_nonterminal(&self, symbol: &str) -> bool {
        self.nonterminal_set.contains(symbol)
    }
}

/// 构造完成后只读的 LL(1) 分析器
#[derive(Debug, Clone)]
pub struct LL1 {
    grammar: Grammar,
    first: SetFamily,
    follow: SetFamily,
    first_plus: SetFamily,
    table: ParseTable,
}

impl LL1 {
    #[instrument(skip_all, fields(productions = grammar.productions().len()))]
    pub fn new(grammar: Grammar) -> Self {
        let first = sets::build_first(&grammar);
        let follow = sets::build_follow(&grammar, &first);
        let first_plus = sets::build_first_plus(&grammar, &first, &follow);
        let table = sets::build_table(&grammar, &first_plus);
        debug!(
            nonterminals = grammar.nonterminals().len(),
            terminals = grammar.terminals().len(),
            "LL(1) table built"
        );
        LL1 { grammar, first, follow, first_plus, table }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn first(&self) -> &SetFamily {
        &self.first
    }

    pub fn follow(&self) -> &SetFamily {
        &self.follow
    }

    pub fn first_plus(&self) -> &SetFamily {
        &self.first_plus
    }

    pub fn table(&self) -> &ParseTable {
        &self.table
    }

    /// token 到文法终结符的映射
    pub fn terminal_for(token: &Token) -> String {
        match token.kind {
            TokenKind::Name if token.lexeme == "void" => "void".to_string(),
            TokenKind::Name => "name".to_string(),
            TokenKind::Int | TokenKind::Float => "num".to_string(),
            TokenKind::Type => "type".to_string(),
            _ => token.lexeme.clone(),
        }
    }

    /// 纯接受器：序列合法返回 Ok(())，否则报告出错 token 的位置
    pub fn validate(&self, tokens: &[Token]) -> StmtResult<()> {
        let lexemes: Vec<String> = tokens.iter().map(|t| t.lexeme.clone()).collect();
        let mut input: Vec<String> = tokens.iter().map(Self::terminal_for).collect();
        input.push(EOF.to_string());

        let eps = self.grammar.epsilon();
        let mut stack: Vec<&str> = vec![EOF, self.grammar.start()];
        let mut pos = 0;

        loop {
            let next = input[pos].as_str();
            let Some(&top) = stack.last() else {
                return Err(grammar_error(&lexemes, pos, "stack exhausted before end of input"));
            };

            if top == EOF && next == EOF {
                return Ok(());
            }

            if !self.grammar.is_nonterminal(top) {
                if top == next {
                    stack.pop();
                    pos += 1;
                    continue;
                }
                return Err(grammar_error(
                    &lexemes,
                    pos,
                    format!("invalid symbol or missing bracket (expected '{}')", top),
                ));
            }

            let index = self.table.get(top).and_then(|row| row.get(next));
            let Some(&index) = index else {
                return Err(grammar_error(
                    &lexemes,
                    pos,
                    format!("no applicable production for {} on '{}'", top, next),
                ));
            };

            stack.pop();
            let production = &self.grammar.productions()[index];
            for symbol in production.rhs.iter().rev() {
                if symbol != eps {
                    stack.push(symbol.as_str());
                }
            }
        }
    }

    pub fn render_productions(&self) -> String {
        let mut out = String::new();
        for p in self.grammar.productions() {
            let marker = if p.lhs == self.grammar.start() && self.is_first_of_lhs(p) { "*" } else { "" };
            let _ = writeln!(out, "{:>3}: {}{} -> {}", p.index, marker, p.lhs, p.rhs.join(" "));
        }
        out
    }

    fn is_first_of_lhs(&self, production: &Production) -> bool {
        self.grammar
            .productions()
            .iter()
            .find(|p| p.lhs == production.lhs)
            .map_or(false, |p| p.index == production.index)
    }

    pub fn render_sets(&self) -> String {
        let mut out = String::new();
        for (title, family) in [("First", &self.first), ("Follow", &self.follow), ("First+", &self.first_plus)] {
            for nt in self.grammar.nonterminals() {
                let items: Vec<&str> = family
                    .get(nt)
                    .map(|s| s.iter().map(String::as_str).collect())
                    .unwrap_or_default();
                let _ = writeln!(out, "{}({}) = {{ {} }}", title, nt, items.join(", "));
            }
        }
        out
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        for nt in self.grammar.nonterminals() {
            let cells: Vec<String> = self
                .table
                .get(nt)
                .map(|row| row.iter().map(|(t, i)| format!("{} => {}", t, i)).collect())
                .unwrap_or_default();
            let _ = writeln!(out, "{}: {}", nt, cells.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{significant_tokens, tokenize};
    use crate::error::StatementError;
    use proptest::prelude::*;
    use proptest::sample::select;

    fn builtin() -> LL1 {
        LL1::new(Grammar::builtin().unwrap())
    }

    fn check(ll1: &LL1, text: &str) -> StmtResult<()> {
        ll1.validate(&significant_tokens(tokenize(text).unwrap()))
    }

    #[test]
    fn test_parse_marks_start() {
        let g = Grammar::builtin().unwrap();
        assert_eq!(g.start(), "Goal");
        assert!(g.is_nonterminal("Expr"));
        assert!(g.terminals().contains("name"));
        assert!(!g.terminals().contains("ε"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Grammar::parse("A -> a", " -> ", "ε"), Err(FatalError::GrammarDefinition(_))));
        assert!(matches!(Grammar::parse("*A a", " -> ", "ε"), Err(FatalError::GrammarDefinition(_))));
        assert!(matches!(Grammar::parse("*A -> a\n*B -> b", " -> ", "ε"), Err(FatalError::GrammarDefinition(_))));
    }

    #[test]
    fn test_custom_delimiter_and_epsilon() {
        let g = Grammar::parse("*S ::= a T\nT ::= b\nT ::= EPS", "::=", "EPS").unwrap();
        let ll1 = LL1::new(g);
        let tokens = vec![Token::new(TokenKind::Name, "a")];
        // name 不是这个文法里的终结符
        assert!(ll1.validate(&tokens).is_err());
        assert!(ll1.first()["T"].contains("EPS"));
    }

    #[test]
    fn test_validate_accepts_statements() {
        let ll1 = builtin();
        for text in [
            "int x = 5;",
            "int x;",
            "float f = 2.5 * x;",
            "x = (a + 2) * b ^ 2;",
            "print y;",
            "<< x - -1",
            "( a > 0 ) ? ( b = 1 ; c = b ; ) : ( void )",
            "( a == b ) ? ( ( c != 0 ) ? ( << c ; ) : ( void ) ; ) : ( b = 2 ; )",
        ] {
            assert!(check(&ll1, text).is_ok(), "rejected: {text}");
        }
    }

    #[test]
    fn test_validate_reports_position() {
        let ll1 = builtin();
        match check(&ll1, "int x = = 5;") {
            Err(StatementError::Grammar { position, token, .. }) => {
                assert_eq!(position, 3);
                assert_eq!(token, "=");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match check(&ll1, "x = (a + 1;") {
            Err(StatementError::Grammar { position, .. }) => assert_eq!(position, 6),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(check(&ll1, "5 = x;").is_err());
    }

    const ACCEPTED: [&str; 6] = [
        "int x = 5 ; x = x * 2",
        "float f = 2.5 * x",
        "x = ( a + 2 ) * b ^ 2",
        "<< x - - 1",
        "y = a <= b",
        "( a > 0 ) ? ( b = 1 ; c = b ; ) : ( void )",
    ];

    const REPLACEMENTS: [&str; 12] = ["x", "7", "=", "+", "*", "(", ")", ";", "?", ":", "<<", "int"];

    fn tokens_of(text: &str) -> Vec<Token> {
        significant_tokens(tokenize(text).unwrap())
    }

    fn rejected_at(ll1: &LL1, tokens: &[Token]) -> Option<usize> {
        match ll1.validate(tokens) {
            Ok(()) => None,
            Err(StatementError::Grammar { position, .. }) => Some(position),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn substituted_token_is_never_blamed_early(
            text in select(ACCEPTED.to_vec()),
            replacement in select(REPLACEMENTS.to_vec()),
            index in any::<prop::sample::Index>(),
        ) {
            let ll1 = builtin();
            let mut tokens = tokens_of(text);
            prop_assert!(ll1.validate(&tokens).is_ok());

            let i = index.index(tokens.len());
            tokens[i] = tokens_of(replacement).remove(0);

            if let Some(position) = rejected_at(&ll1, &tokens) {
                prop_assert!(position >= i, "blamed {} before substitution at {}", position, i);
                // 前缀在 i 处已经不可延伸时，整句也必须在 i 处被拒绝
                if rejected_at(&ll1, &tokens[..=i]) == Some(i) {
                    prop_assert_eq!(position, i);
                }
            }
        }

        #[test]
        fn misplaced_print_rejected_where_it_stands(
            text in select(ACCEPTED[..5].to_vec()),
            index in any::<prop::sample::Index>(),
        ) {
            let ll1 = builtin();
            let mut tokens = tokens_of(text);
            let i = 1 + index.index(tokens.len() - 1);
            prop_assume!(!tokens[i - 1].is(";"));
            tokens[i] = tokens_of("<<").remove(0);
            prop_assert_eq!(rejected_at(&ll1, &tokens), Some(i));
        }
    }

    #[test]
    fn test_terminal_mapping() {
        assert_eq!(LL1::terminal_for(&Token::new(TokenKind::Name, "void")), "void");
        assert_eq!(LL1::terminal_for(&Token::new(TokenKind::Float, "1.5")), "num");
        assert_eq!(LL1::terminal_for(&Token::new(TokenKind::Ternary, "<=")), "<=");
    }

    #[test]
    fn test_render() {
        let ll1 = builtin();
        assert!(ll1.render_productions().starts_with("  0: *Goal -> Stmt StmtTail"));
        assert!(ll1.render_sets().contains("Follow(Goal) = { eof }"));
        assert!(ll1.render_table().contains("Factor: "));
    }
}

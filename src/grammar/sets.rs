//! First / Follow / First+ 集合与 LL(1) 分析表的构造
use std::collections::{BTreeMap, BTreeSet, HashMap};
use super::{Grammar, EOF};

/// 符号 -> 终结符集合（ε 作为标记出现在集合中）
pub type SetFamily = HashMap<String, BTreeSet<String>>;

/// 非终结符 -> (终结符 -> 产生式编号)
pub type ParseTable = HashMap<String, BTreeMap<String, usize>>;

/// First 集初值：非终结符为空，终结符为自身，ε 为 {ε}
pub fn initial_first(grammar: &Grammar) -> SetFamily {
    let mut first = SetFamily::new();
    for nt in grammar.nonterminals() {
        first.insert(nt.clone(), BTreeSet::new());
    }
    for t in grammar.terminals() {
        first.insert(t.clone(), BTreeSet::from([t.clone()]));
    }
    let eps = grammar.epsilon().to_string();
    first.insert(eps.clone(), BTreeSet::from([eps]));
    first.insert(EOF.to_string(), BTreeSet::from([EOF.to_string()]));
    first
}

fn first_of<'a>(first: &'a SetFamily, symbol: &str) -> Option<&'a BTreeSet<String>> {
    first.get(symbol)
}

/// 一轮 First 集迭代，返回是否有集合发生变化
pub fn first_pass(grammar: &Grammar, first: &mut SetFamily) -> bool {
    let eps = grammar.epsilon();
    let mut changed = false;

    for production in grammar.productions() {
        let mut rhs_set = BTreeSet::new();
        let mut all_nullable = true;
        for symbol in &production.rhs {
            let Some(sym_first) = first_of(first, symbol) else {
                all_nullable = false;
                break;
            };
            rhs_set.extend(sym_first.iter().filter(|s| s.as_str() != eps).cloned());
            if !sym_first.contains(eps) {
                all_nullable = false;
                break;
            }
        }
        if all_nullable {
            rhs_set.insert(eps.to_string());
        }

        let target = first.entry(production.lhs.clone()).or_default();
        let before = target.len();
        target.extend(rhs_set);
        changed |= target.len() != before;
    }

    changed
}

/// 迭代到不动点
pub fn build_first(grammar: &Grammar) -> SetFamily {
    let mut first = initial_first(grammar);
    while first_pass(grammar, &mut first) {}
    first
}

/// Follow 集初值：开始符号为 {eof}，其余为空
pub fn initial_follow(grammar: &Grammar) -> SetFamily {
    let mut follow = SetFamily::new();
    for nt in grammar.nonterminals() {
        follow.insert(nt.clone(), BTreeSet::new());
    }
    follow
        .entry(grammar.start().to_string())
        .or_default()
        .insert(EOF.to_string());
    follow
}

/// 一轮 Follow 集迭代（每个产生式从右向左扫描，trailer 初值为 Follow(A)）
pub fn follow_pass(grammar: &Grammar, first: &SetFamily, follow: &mut SetFamily) -> bool {
    let eps = grammar.epsilon();
    let mut changed = false;

    for production in grammar.productions() {
        let mut trailer = follow.get(&production.lhs).cloned().unwrap_or_default();

        for symbol in production.rhs.iter().rev() {
            if symbol == eps {
                continue;
            }
            let sym_first = first.get(symbol).cloned().unwrap_or_default();
            if grammar.is_nonterminal(symbol) {
                let target = follow.entry(symbol.clone()).or_default();
                let before = target.len();
                target.extend(trailer.iter().cloned());
                changed |= target.len() != before;

                if sym_first.contains(eps) {
                    trailer.extend(sym_first.into_iter().filter(|s| s != eps));
                } else {
                    trailer = sym_first;
                }
            } else {
                trailer = sym_first;
            }
        }
    }

    changed
}

pub fn build_follow(grammar: &Grammar, first: &SetFamily) -> SetFamily {
    let mut follow = initial_follow(grammar);
    while follow_pass(grammar, first, &mut follow) {}
    follow
}

/// First+(X) = First(X) ∪ Follow(X)（当 ε ∈ First(X)）
pub fn build_first_plus(grammar: &Grammar, first: &SetFamily, follow: &SetFamily) -> SetFamily {
    let eps = grammar.epsilon();
    first
        .iter()
        .map(|(symbol, set)| {
            let mut plus = set.clone();
            if set.contains(eps) {
                if let Some(fol) = follow.get(symbol) {
                    plus.extend(fol.iter().cloned());
                }
            }
            (symbol.clone(), plus)
        })
        .collect()
}

/// 构造分析表。先写入的产生式优先，不做冲突检查。
pub fn build_table(grammar: &Grammar, first_plus: &SetFamily) -> ParseTable {
    let eps = grammar.epsilon();
    let mut table = ParseTable::new();
    for nt in grammar.nonterminals() {
        table.insert(nt.clone(), BTreeMap::new());
    }

    for production in grammar.productions() {
        let Some(head) = production.rhs.first() else {
            continue;
        };
        let head_set = first_plus.get(head).cloned().unwrap_or_default();
        let row = table.entry(production.lhs.clone()).or_default();

        for terminal in head_set.iter().filter(|t| t.as_str() != eps) {
            row.entry(terminal.clone()).or_insert(production.index);
        }
        if head_set.contains(eps) {
            if let Some(lhs_plus) = first_plus.get(&production.lhs) {
                for terminal in lhs_plus.iter().filter(|t| t.as_str() != eps) {
                    row.entry(terminal.clone()).or_insert(production.index);
                }
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn expr_grammar() -> Grammar {
        Grammar::parse(
            "*E -> T Ep\nEp -> + T Ep\nEp -> ε\nT -> ( E )\nT -> id",
            " -> ",
            "ε",
        )
        .unwrap()
    }

    #[test]
    fn test_first_sets() {
        let g = expr_grammar();
        let first = build_first(&g);
        assert_eq!(first["E"], set(&["(", "id"]));
        assert_eq!(first["Ep"], set(&["+", "ε"]));
        assert_eq!(first["+"], set(&["+"]));
    }

    #[test]
    fn test_follow_sets() {
        let g = expr_grammar();
        let first = build_first(&g);
        let follow = build_follow(&g, &first);
        assert_eq!(follow["E"], set(&[")", "eof"]));
        assert_eq!(follow["Ep"], set(&[")", "eof"]));
        assert_eq!(follow["T"], set(&["+", ")", "eof"]));
    }

    #[test]
    fn test_table_epsilon_fill() {
        let g = expr_grammar();
        let first = build_first(&g);
        let follow = build_follow(&g, &first);
        let plus = build_first_plus(&g, &first, &follow);
        let table = build_table(&g, &plus);
        // Ep -> + T Ep 是编号 1，Ep -> ε 是编号 2
        assert_eq!(table["Ep"]["+"], 1);
        assert_eq!(table["Ep"][")"], 2);
        assert_eq!(table["Ep"]["eof"], 2);
        assert_eq!(table["T"]["id"], 4);
    }

    #[test]
    fn test_first_wins_on_conflict() {
        let g = Grammar::parse("*S -> a b\nS -> a c", " -> ", "ε").unwrap();
        let first = build_first(&g);
        let follow = build_follow(&g, &first);
        let table = build_table(&g, &build_first_plus(&g, &first, &follow));
        assert_eq!(table["S"]["a"], 0);
    }

    #[test]
    fn test_builtin_sets_are_fixed_points() {
        let g = Grammar::builtin().unwrap();
        let mut first = build_first(&g);
        assert!(!first_pass(&g, &mut first));
        let mut follow = build_follow(&g, &first);
        assert!(!follow_pass(&g, &first, &mut follow));
    }

    // 随机生成的小文法上，构造结果再迭代一轮不会变化
    fn arb_grammar() -> impl Strategy<Value = String> {
        let symbol = prop_oneof![
            Just("A"), Just("B"), Just("C"), Just("a"), Just("b"), Just("c"), Just("ε")
        ];
        let rhs = prop::collection::vec(symbol, 1..4);
        let production = (prop_oneof![Just("A"), Just("B"), Just("C")], rhs);
        prop::collection::vec(production, 1..8).prop_map(|prods| {
            let mut text = String::from("*A -> a");
            for (lhs, rhs) in prods {
                text.push('\n');
                text.push_str(lhs);
                text.push_str(" -> ");
                text.push_str(&rhs.join(" "));
            }
            text
        })
    }

    proptest! {
        #[test]
        fn sets_reach_fixed_point(text in arb_grammar()) {
            let g = Grammar::parse(&text, " -> ", "ε").unwrap();
            let mut first = build_first(&g);
            prop_assert!(!first_pass(&g, &mut first));
            let mut follow = build_follow(&g, &first);
            prop_assert!(!follow_pass(&g, &first, &mut follow));
            prop_assert!(follow[g.start()].contains(EOF));
        }
    }
}

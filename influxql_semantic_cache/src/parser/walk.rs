use crate::parser::expression::{
    Comparison, ConditionalBinary, ConditionalExpression, ConditionalOperator,
};
use std::fmt::{Display, Formatter};
use std::ops::ControlFlow;

/// The logical connective joining a comparison to its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalGroup {
    /// The comparison is an operand of an `AND`.
    Conjunction,
    /// The comparison is an operand of an `OR`.
    Disjunction,
    /// The comparison is the whole condition.
    Standalone,
}

impl From<ConditionalOperator> for LogicalGroup {
    fn from(op: ConditionalOperator) -> Self {
        match op {
            ConditionalOperator::And => Self::Conjunction,
            ConditionalOperator::Or => Self::Disjunction,
        }
    }
}

impl Display for LogicalGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Conjunction => "AND",
            Self::Disjunction => "OR",
            Self::Standalone => "",
        })
    }
}

/// A node visited by [`walk_condition`].
#[derive(Clone, Copy, Debug)]
pub enum Condition<'a> {
    Comparison {
        comparison: &'a Comparison,
        group: LogicalGroup,
        /// True if any enclosing binary node is an `OR`.
        disjunctive: bool,
    },
    Binary(&'a ConditionalBinary),
    Grouped(&'a ConditionalExpression),
}

/// Perform a pre-order traversal of a condition tree.
///
/// Each comparison is visited together with the connective of its closest enclosing binary
/// node and whether an `OR` encloses it at any depth; parentheses are transparent.
pub fn walk_condition<'a, B>(
    node: &'a ConditionalExpression,
    visit: &mut impl FnMut(Condition<'a>) -> ControlFlow<B>,
) -> ControlFlow<B> {
    walk(node, LogicalGroup::Standalone, false, visit)
}

fn walk<'a, B>(
    node: &'a ConditionalExpression,
    group: LogicalGroup,
    disjunctive: bool,
    visit: &mut impl FnMut(Condition<'a>) -> ControlFlow<B>,
) -> ControlFlow<B> {
    match node {
        ConditionalExpression::Comparison(comparison) => visit(Condition::Comparison {
            comparison,
            group,
            disjunctive,
        }),
        ConditionalExpression::Binary(binary) => {
            visit(Condition::Binary(binary))?;
            let group = binary.op.into();
            let disjunctive = disjunctive || group == LogicalGroup::Disjunction;
            walk(&binary.lhs, group, disjunctive, visit)?;
            walk(&binary.rhs, group, disjunctive, visit)
        }
        ConditionalExpression::Grouped(inner) => {
            visit(Condition::Grouped(node))?;
            walk(inner, group, disjunctive, visit)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::expression::conditional_expression;

    fn comparisons(s: &str) -> Vec<String> {
        let (_, cond) = conditional_expression(s).unwrap();
        let mut out = Vec::new();
        let _ = walk_condition::<()>(&cond, &mut |n| {
            if let Condition::Comparison {
                comparison,
                group,
                disjunctive,
            } = n
            {
                let or = if disjunctive { "|" } else { "" };
                out.push(format!("{or}{group}:{comparison}"));
            }
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn test_walk_condition() {
        assert_eq!(comparisons("a = 1"), vec![":a = 1"]);
        assert_eq!(comparisons("a = 1 AND b = 2"), vec!["AND:a = 1", "AND:b = 2"]);
        assert_eq!(
            comparisons("a = 1 AND (b = 2 OR c = 3)"),
            vec!["AND:a = 1", "|OR:b = 2", "|OR:c = 3"]
        );
        assert_eq!(comparisons("((a = 1))"), vec![":a = 1"]);

        // an OR above the closest parent still encloses the comparison
        assert_eq!(
            comparisons("(time >= 0 AND time <= 10) OR v = 1"),
            vec!["|AND:time >= 0", "|AND:time <= 10", "|OR:v = 1"]
        );
    }

    #[test]
    fn test_walk_condition_break() {
        let (_, cond) = conditional_expression("a = 1 AND b = 2 AND c = 3").unwrap();
        let mut seen = 0;
        let res = walk_condition(&cond, &mut |n| {
            if let Condition::Comparison { comparison, .. } = n {
                seen += 1;
                if comparison.lhs.as_str() == "b" {
                    return ControlFlow::Break(comparison.lhs.to_string());
                }
            }
            ControlFlow::Continue(())
        });
        assert_eq!(res, ControlFlow::Break("b".to_string()));
        assert_eq!(seen, 2);
    }
}

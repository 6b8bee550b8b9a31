//! Duration conversion between `TimeUnit`s.
//!
//! Constant integer expressions are folded with checked arithmetic that
//! follows Java semantics: `int` arithmetic unless a `long` literal takes part,
//! truncating division and remainder. Non-constant expressions are scaled by
//! a multiplication when converting to a finer unit; converting a
//! non-constant expression to a coarser unit would need a division that can
//! silently truncate, so it fails instead.

use std::str::FromStr;
use std::sync::Arc;

use crate::ast::{SyntaxNode, TreeBuilder};
use crate::errors::ConversionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn nanos(self) -> i64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
            TimeUnit::Hours => 3_600_000_000_000,
            TimeUnit::Days => 86_400_000_000_000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "NANOSECONDS",
            TimeUnit::Microseconds => "MICROSECONDS",
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = ConversionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "NANOSECONDS" => Ok(TimeUnit::Nanoseconds),
            "MICROSECONDS" => Ok(TimeUnit::Microseconds),
            "MILLISECONDS" => Ok(TimeUnit::Milliseconds),
            "SECONDS" => Ok(TimeUnit::Seconds),
            "MINUTES" => Ok(TimeUnit::Minutes),
            "HOURS" => Ok(TimeUnit::Hours),
            "DAYS" => Ok(TimeUnit::Days),
            other => Err(ConversionError::UnknownUnit(other.to_string())),
        }
    }
}

/// Result of converting a duration expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationValue {
    /// Folded into a single `int` constant.
    Literal(i64),
    /// A non-constant expression, scaled when the units differ.
    Expression(Arc<SyntaxNode>),
}

#[derive(Debug, Clone, Copy)]
struct Constant {
    value: i64,
    long: bool,
}

/// Evaluate a constant integer expression.
///
/// Returns `Ok(None)` when the expression is not a compile-time constant
/// this folder understands, and an error when evaluating it would overflow
/// or divide by zero.
pub fn const_eval(node: &SyntaxNode) -> Result<Option<i64>, ConversionError> {
    Ok(eval(node)?.map(|c| c.value))
}

fn eval(node: &SyntaxNode) -> Result<Option<Constant>, ConversionError> {
    match node.kind() {
        "decimal_integer_literal" | "hex_integer_literal" | "octal_integer_literal" | "binary_integer_literal" => {
            parse_literal(node.text(), false).map(Some)
        }
        "parenthesized_expression" => match node.named_children().next() {
            Some(inner) => eval(inner),
            None => Ok(None),
        },
        "unary_expression" => {
            let Some(operand) = node.child_by_field("operand") else {
                return Ok(None);
            };
            // 2147483648 and 9223372036854775808L only exist as the operand of a minus
            if node.has_token("-") && operand.kind() == "decimal_integer_literal" {
                return parse_literal(operand.text(), true).map(Some);
            }
            let Some(c) = eval(operand)? else {
                return Ok(None);
            };
            let value = if node.has_token("-") {
                c.value.checked_neg()
            } else if node.has_token("+") {
                Some(c.value)
            } else if node.has_token("~") {
                Some(!c.value)
            } else {
                return Ok(None);
            };
            checked(value, c.long, node).map(Some)
        }
        "binary_expression" => {
            let (Some(left), Some(right)) = (node.child_by_field("left"), node.child_by_field("right")) else {
                return Ok(None);
            };
            let (Some(l), Some(r)) = (eval(left)?, eval(right)?) else {
                return Ok(None);
            };
            let long = l.long || r.long;
            let operator = node.child_by_field("operator").map(|o| o.text()).unwrap_or_default();
            let value = match operator {
                "+" => l.value.checked_add(r.value),
                "-" => l.value.checked_sub(r.value),
                "*" => l.value.checked_mul(r.value),
                "/" | "%" if r.value == 0 => return Err(ConversionError::DivisionByZero),
                "/" => l.value.checked_div(r.value),
                "%" => l.value.checked_rem(r.value),
                "&" => Some(l.value & r.value),
                "|" => Some(l.value | r.value),
                "^" => Some(l.value ^ r.value),
                _ => return Ok(None),
            };
            checked(value, long, node).map(Some)
        }
        _ => Ok(None),
    }
}

fn checked(value: Option<i64>, long: bool, node: &SyntaxNode) -> Result<Constant, ConversionError> {
    let overflow = || ConversionError::Overflow {
        value: crate::symbols::compact_text(node),
    };
    let value = value.ok_or_else(overflow)?;
    if !long && i32::try_from(value).is_err() {
        return Err(overflow());
    }
    Ok(Constant { value, long })
}

fn parse_literal(text: &str, negated: bool) -> Result<Constant, ConversionError> {
    let overflow = || ConversionError::Overflow { value: text.to_string() };
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, long) = match cleaned.strip_suffix(|c: char| c == 'l' || c == 'L') {
        Some(rest) => (rest.to_string(), true),
        None => (cleaned, false),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(hex) = lower.strip_prefix("0x") {
        (16, hex.to_string())
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (2, bin.to_string())
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, lower[1..].to_string())
    } else {
        (10, lower)
    };
    let raw = u64::from_str_radix(&body, radix).map_err(|_| overflow())?;
    if radix == 10 {
        let signed = if negated { -i128::from(raw) } else { i128::from(raw) };
        let value = if long {
            i64::try_from(signed).ok()
        } else {
            i32::try_from(signed).ok().map(i64::from)
        };
        return value.map(|value| Constant { value, long }).ok_or_else(overflow);
    }
    // non-decimal literals may spell negative values in two's complement
    let value = if long {
        raw as i64
    } else {
        i64::from(u32::try_from(raw).map_err(|_| overflow())? as i32)
    };
    let value = if negated {
        value
            .checked_neg()
            .filter(|v| long || i32::try_from(*v).is_ok())
            .ok_or_else(overflow)?
    } else {
        value
    };
    Ok(Constant { value, long })
}

/// Convert `expression`, measured in `from`, into `to`.
pub fn convert(expression: &Arc<SyntaxNode>, from: TimeUnit, to: TimeUnit) -> Result<DurationValue, ConversionError> {
    let constant = const_eval(expression)?;
    if from == to {
        return Ok(match constant {
            Some(value) => DurationValue::Literal(fit_int(value)?),
            None => DurationValue::Expression(Arc::clone(expression)),
        });
    }

    if from.nanos() > to.nanos() {
        let factor = from.nanos() / to.nanos();
        return match constant {
            Some(value) => {
                let scaled = value.checked_mul(factor).ok_or_else(|| ConversionError::Overflow {
                    value: format!("{value} * {factor}"),
                })?;
                Ok(DurationValue::Literal(fit_int(scaled)?))
            }
            None => {
                let factor_literal = i32::try_from(factor).map_err(|_| ConversionError::Overflow {
                    value: factor.to_string(),
                })?;
                let operand = match expression.kind() {
                    "binary_expression" | "ternary_expression" => {
                        TreeBuilder::parenthesized(Arc::new(expression.with_leading_prefix("")))
                    }
                    _ => Arc::new(expression.with_leading_prefix("")),
                };
                Ok(DurationValue::Expression(TreeBuilder::binary(
                    operand,
                    "*",
                    TreeBuilder::integer(i64::from(factor_literal)),
                )))
            }
        };
    }

    let divisor = to.nanos() / from.nanos();
    match constant {
        Some(value) if value % divisor == 0 => Ok(DurationValue::Literal(fit_int(value / divisor)?)),
        Some(value) => Err(ConversionError::InexactDivision {
            value,
            unit: to.name().to_string(),
        }),
        None => Err(ConversionError::UnsafeDivision { divisor }),
    }
}

fn fit_int(value: i64) -> Result<i64, ConversionError> {
    i32::try_from(value)
        .map(i64::from)
        .map_err(|_| ConversionError::Overflow { value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ToSource;
    use crate::parser::{JavaParser, Parser};

    /// Parse `expr` as the initializer of a field and return it.
    fn expression(expr: &str) -> Arc<SyntaxNode> {
        let mut parser = JavaParser::new().unwrap();
        let tree = parser.parse(&format!("class A {{ long v = {expr}; }}")).unwrap();
        let mut found = None;
        tree.visit(&mut |node| {
            if node.kind() == "variable_declarator" && found.is_none() {
                found = node.child_by_field("value").cloned();
            }
        });
        found.unwrap()
    }

    #[test]
    fn folds_constant_expressions() {
        assert_eq!(const_eval(&expression("1_000")).unwrap(), Some(1000));
        assert_eq!(const_eval(&expression("(2 + 3) * 4 - 6 / 4")).unwrap(), Some(19));
        assert_eq!(const_eval(&expression("-7 / 2")).unwrap(), Some(-3));
        assert_eq!(const_eval(&expression("-7 % 3")).unwrap(), Some(-1));
        assert_eq!(const_eval(&expression("0x10 + 010 + 0b11")).unwrap(), Some(27));
        assert_eq!(const_eval(&expression("0xFFFFFFFF")).unwrap(), Some(-1));
        assert_eq!(const_eval(&expression("timeout * 2")).unwrap(), None);
    }

    #[test]
    fn int_overflow_fails_unless_long() {
        assert!(matches!(
            const_eval(&expression("2147483647 + 1")),
            Err(ConversionError::Overflow { .. })
        ));
        assert_eq!(const_eval(&expression("2147483647L + 1")).unwrap(), Some(2_147_483_648));
        assert!(matches!(const_eval(&expression("1 / 0")), Err(ConversionError::DivisionByZero)));
    }

    #[test]
    fn minimum_values_are_negated_literals() {
        assert_eq!(const_eval(&expression("-2147483648")).unwrap(), Some(-2_147_483_648));
        assert_eq!(const_eval(&expression("-9223372036854775808L")).unwrap(), Some(i64::MIN));
        assert_eq!(const_eval(&expression("-2147483648 + 1")).unwrap(), Some(-2_147_483_647));
        assert!(matches!(
            const_eval(&expression("2147483648")),
            Err(ConversionError::Overflow { .. })
        ));
        assert!(matches!(
            const_eval(&expression("-2147483649")),
            Err(ConversionError::Overflow { .. })
        ));
        // a parenthesized operand is no longer a negated literal
        assert!(matches!(
            const_eval(&expression("-(2147483648)")),
            Err(ConversionError::Overflow { .. })
        ));
    }

    #[test]
    fn coarser_units_multiply() {
        let value = convert(&expression("2 * 3"), TimeUnit::Minutes, TimeUnit::Seconds).unwrap();
        assert_eq!(value, DurationValue::Literal(360));
    }

    #[test]
    fn finer_units_divide_exactly_or_fail() {
        let exact = convert(&expression("90_000"), TimeUnit::Milliseconds, TimeUnit::Seconds).unwrap();
        assert_eq!(exact, DurationValue::Literal(90));
        assert_eq!(
            convert(&expression("1500"), TimeUnit::Milliseconds, TimeUnit::Seconds),
            Err(ConversionError::InexactDivision {
                value: 1500,
                unit: "SECONDS".to_string()
            })
        );
        assert_eq!(
            convert(&expression("limit"), TimeUnit::Milliseconds, TimeUnit::Seconds),
            Err(ConversionError::UnsafeDivision { divisor: 1000 })
        );
    }

    #[test]
    fn non_constant_operands_are_scaled() {
        match convert(&expression("base + extra"), TimeUnit::Minutes, TimeUnit::Seconds).unwrap() {
            DurationValue::Expression(node) => assert_eq!(node.to_source(), "(base + extra) * 60"),
            other => panic!("expected an expression, got {other:?}"),
        }
        match convert(&expression("limit"), TimeUnit::Hours, TimeUnit::Seconds).unwrap() {
            DurationValue::Expression(node) => assert_eq!(node.to_source(), "limit * 3600"),
            other => panic!("expected an expression, got {other:?}"),
        }
    }

    #[test]
    fn results_must_fit_an_int() {
        assert!(matches!(
            convert(&expression("30"), TimeUnit::Days, TimeUnit::Seconds),
            Ok(DurationValue::Literal(2_592_000))
        ));
        assert!(matches!(
            convert(&expression("100000"), TimeUnit::Days, TimeUnit::Seconds),
            Err(ConversionError::Overflow { .. })
        ));
        assert!("FORTNIGHTS".parse::<TimeUnit>().is_err());
    }
}

//! Column value expressions.

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

/// A metric's column specification, validated and tokenized once when the
/// metric is constructed.
///
/// Either a single column index (`"3"`) or a left-to-right chain of
/// indices and `+ - * /` (`"1/2+3"`, meaning `(fields[1] / fields[2]) +
/// fields[3]`). Evaluation is strictly sequential with no operator
/// precedence, like a four-function calculator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpr {
    first: usize,
    rest: Vec<(Op, usize)>,
}

impl ColumnExpr {
    /// Parse a column spec. The error string surfaces through clap before
    /// any scanning starts.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut chars = spec.chars().peekable();
        let first = lex_index(&mut chars)
            .ok_or_else(|| format!("column spec '{spec}' must start with a column index"))?;
        let mut rest = Vec::new();
        while let Some(c) = chars.next() {
            let op = match c {
                '+' => Op::Add,
                '-' => Op::Sub,
                '*' => Op::Mul,
                '/' => Op::Div,
                _ => return Err(format!("unexpected character '{c}' in column spec '{spec}'")),
            };
            let index = lex_index(&mut chars).ok_or_else(|| {
                format!("operator '{c}' in column spec '{spec}' must be followed by a column index")
            })?;
            rest.push((op, index));
        }
        Ok(Self { first, rest })
    }

    /// Evaluate against a line's whitespace-split fields.
    ///
    /// `None` when a referenced field is missing or non-numeric; the
    /// caller skips the line for this metric only. Division by a
    /// zero-valued field yields 0 instead of failing the line.
    pub fn evaluate(&self, fields: &[&str]) -> Option<f64> {
        let mut result = field_value(fields, self.first)?;
        for &(op, index) in &self.rest {
            let operand = field_value(fields, index)?;
            result = match op {
                Op::Add => result + operand,
                Op::Sub => result - operand,
                Op::Mul => result * operand,
                Op::Div if operand == 0.0 => 0.0,
                Op::Div => result / operand,
            };
        }
        Some(result)
    }
}

fn field_value(fields: &[&str], index: usize) -> Option<f64> {
    fields.get(index)?.parse::<f64>().ok()
}

fn lex_index(chars: &mut Peekable<Chars>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(*c);
        chars.next();
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(spec: &str, fields: &[&str]) -> Option<f64> {
        ColumnExpr::parse(spec).unwrap().evaluate(fields)
    }

    #[test]
    fn test_single_column() {
        assert_eq!(eval("1", &["ts", "42.5", "x"]), Some(42.5));
        assert_eq!(eval("0", &["7"]), Some(7.0));
    }

    #[test]
    fn test_left_to_right_no_precedence() {
        // (fields[1] / fields[2]) + fields[3], not 1/(2+3).
        let fields = ["ts", "10", "4", "3"];
        assert_eq!(eval("1/2+3", &fields), Some(5.5));
        // (1 + 2) * 3 under left-to-right, which differs from math precedence.
        let fields = ["ts", "1", "2", "3"];
        assert_eq!(eval("1+2*3", &fields), Some(9.0));
    }

    #[test]
    fn test_subtraction_and_multiplication() {
        let fields = ["ts", "8", "3", "2"];
        assert_eq!(eval("1-2", &fields), Some(5.0));
        assert_eq!(eval("1*3", &fields), Some(16.0));
    }

    #[test]
    fn test_division_by_zero_field_yields_zero() {
        let fields = ["ts", "10", "0"];
        assert_eq!(eval("1/2", &fields), Some(0.0));
        // The chain continues after the zeroed division.
        let fields = ["ts", "10", "0", "4"];
        assert_eq!(eval("1/2+3", &fields), Some(4.0));
    }

    #[test]
    fn test_multi_digit_column_index() {
        let mut fields = vec!["0"; 13];
        fields[12] = "99";
        assert_eq!(eval("12", &fields), Some(99.0));
    }

    #[test]
    fn test_non_numeric_field_fails_line() {
        assert_eq!(eval("1", &["ts", "abc"]), None);
        assert_eq!(eval("1+2", &["ts", "5", "abc"]), None);
    }

    #[test]
    fn test_missing_field_fails_line() {
        assert_eq!(eval("5", &["ts", "1"]), None);
    }

    #[test]
    fn test_malformed_specs_rejected() {
        assert!(ColumnExpr::parse("").is_err());
        assert!(ColumnExpr::parse("+1").is_err());
        assert!(ColumnExpr::parse("1+").is_err());
        assert!(ColumnExpr::parse("1++2").is_err());
        assert!(ColumnExpr::parse("1x2").is_err());
    }
}

//! Per-tensor fractional bit counts written next to the exported model weights.
//!
//! The descriptor is a mapping literal such as
//! `{'input_1': 0, 'conv2d_1': 4, 'Softmax1': 7}`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Name of the model's input tensor in the descriptor
pub const INPUT_TENSOR: &str = "input_1";
/// Name of the model's output tensor in the descriptor
pub const OUTPUT_TENSOR: &str = "Softmax1";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftTable {
    shifts: BTreeMap<String, i32>,
}

impl ShiftTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let table: ShiftTable = text.parse()?;
        tracing::info!(
            "Loaded {} tensor shifts from {}",
            table.len(),
            path.display()
        );
        for (tensor, shift) in table.iter() {
            tracing::debug!("{tensor}: {shift}");
        }
        Ok(table)
    }

    pub fn get(&self, tensor: &str) -> Result<i32> {
        self.shifts
            .get(tensor)
            .copied()
            .ok_or_else(|| Error::NotFound(tensor.to_string()))
    }

    pub fn insert(&mut self, tensor: impl Into<String>, shift: i32) {
        self.shifts.insert(tensor.into(), shift);
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.shifts.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl FromStr for ShiftTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Parser::new(s).parse_table()
    }
}

struct Parser {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    fn parse_table(&mut self) -> Result<ShiftTable> {
        let mut table = ShiftTable::default();

        self.skip_whitespace();
        self.expect('{')?;
        loop {
            self.skip_whitespace();
            if self.eat('}') {
                break;
            }

            let key = self.parse_string()?;
            self.skip_whitespace();
            self.expect(':')?;
            self.skip_whitespace();
            let value = self.parse_int()?;
            // later duplicates win, as in any mapping literal
            table.insert(key, value);

            self.skip_whitespace();
            if self.eat(',') {
                continue;
            }
            self.skip_whitespace();
            self.expect('}')?;
            break;
        }

        self.skip_whitespace();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected trailing character {c:?}")));
        }
        Ok(table)
    }

    fn parse_string(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(c @ ('\'' | '"')) => c,
            Some(c) => return Err(self.error(format!("expected quoted key, found {c:?}"))),
            None => return Err(self.error("expected quoted key, found end of input")),
        };
        self.advance();

        let mut value = String::new();
        loop {
            match self.advance() {
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
            }
        }
    }

    fn parse_int(&mut self) -> Result<i32> {
        let mut digits = String::new();
        if let Some(sign @ ('-' | '+')) = self.peek() {
            digits.push(sign);
            self.advance();
        }
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            digits.push(c);
            self.advance();
        }

        digits
            .parse()
            .map_err(|_| self.error(format!("expected integer shift, found {digits:?}")))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.eat(expected) {
            return Ok(());
        }
        Err(match self.peek() {
            Some(c) => self.error(format!("expected {expected:?}, found {c:?}")),
            None => self.error(format!("expected {expected:?}, found end of input")),
        })
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptor_written_by_exporter() {
        let table: ShiftTable = "{'input_1': 0, 'conv2d_1': 4, 'Softmax1': 7}"
            .parse()
            .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(INPUT_TENSOR).unwrap(), 0);
        assert_eq!(table.get("conv2d_1").unwrap(), 4);
        assert_eq!(table.get(OUTPUT_TENSOR).unwrap(), 7);
    }

    #[test]
    fn accepts_double_quotes_negatives_and_trailing_comma() {
        let table: ShiftTable = "{\n  \"input_1\" : -1,\n  'dense_1':+3,\n}\n".parse().unwrap();
        assert_eq!(table.get("input_1").unwrap(), -1);
        assert_eq!(table.get("dense_1").unwrap(), 3);
    }

    #[test]
    fn empty_mapping() {
        let table: ShiftTable = " {} ".parse().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_keys_keep_last_value() {
        let table: ShiftTable = "{'a': 1, 'a': 2}".parse().unwrap();
        assert_eq!(table.get("a").unwrap(), 2);
    }

    #[test]
    fn missing_key_is_not_found() {
        let table: ShiftTable = "{'Softmax1': 7}".parse().unwrap();
        assert!(matches!(table.get(INPUT_TENSOR), Err(Error::NotFound(k)) if k == "input_1"));
    }

    #[test]
    fn rejects_malformed_literals() {
        for bad in [
            "",
            "['input_1', 0]",
            "{'input_1' 0}",
            "{'input_1': }",
            "{'input_1: 0}",
            "{input_1: 0}",
            "{'input_1': 0.5}",
            "{'input_1': 0} extra",
            "{'input_1': 0",
        ] {
            assert!(
                matches!(bad.parse::<ShiftTable>(), Err(Error::Parse { .. })),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn parse_error_points_at_offending_line() {
        let err = "{\n'a': 1,\n'b' 2}".parse::<ShiftTable>().unwrap_err();
        match err {
            Error::Parse { line, column, .. } => assert_eq!((line, column), (3, 5)),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

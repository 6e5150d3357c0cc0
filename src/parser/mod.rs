//! Textual query-batch grammar: `<r0> <r1> …|<pred>&<pred>&…|<proj> <proj> …`.
//!
//! Hand-rolled rather than built on a parser-combinator or grammar crate: the
//! format is one compact line with three `|`-delimited sections, not a general
//! recursive grammar, so a handful of small scanning helpers reads better than
//! a dependency pulled in for it — the same "do it directly" call the teacher
//! itself makes for small, format-specific jobs. Mirrors
//! `original_source/modules/query/query.c`'s `parseQuery`, minus the
//! `fscanf`/`ungetc` byte-at-a-time scanning (queries arrive one line at a
//! time here, not as a raw byte stream).

use std::io::BufRead;

use crate::error::{DbError, Result};

/// `A.c op v` filter, or `A.c = B.d` join — which one a predicate is gets
/// decided while scanning it, by whether a second `alias.index` pair follows
/// the `=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Gt,
    Eq,
}

/// A column reference as it appears in a query. `table` is the underlying
/// relation id (as loaded in phase 1); `alias` is its 0-based position in this
/// query's FROM list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Column {
    pub table: u32,
    pub alias: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterPredicate {
    pub column: Column,
    pub value: u32,
    pub operator: Operator,
}

#[derive(Debug, Clone, Copy)]
pub struct JoinPredicate {
    pub left: Column,
    pub right: Column,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub num_relations: u32,
    pub joins: Vec<JoinPredicate>,
    pub filters: Vec<FilterPredicate>,
    pub projections: Vec<Column>,
}

/// Reads relation file names (batch-stream phase 1), one per line, until the
/// literal `Done` sentinel.
pub fn read_relation_names(reader: &mut impl BufRead) -> Result<Vec<String>> {
    let mut names = Vec::new();
    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            return Err(DbError::QueryParse(
                "relation name stream ended before a `Done` sentinel".to_string(),
            ));
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line == "Done" {
            return Ok(names);
        }
        names.push(line.to_string());
    }
}

/// Parses one query line into a [`Query`].
pub fn parse_query(line: &str) -> Result<Query> {
    let mut sections = line.splitn(3, '|');
    let relids = sections
        .next()
        .ok_or_else(|| malformed("missing relation list section"))?;
    let preds = sections
        .next()
        .ok_or_else(|| malformed("missing predicate section"))?;
    let projs = sections
        .next()
        .ok_or_else(|| malformed("missing projection section"))?;

    let aliases: Vec<u32> = relids
        .split_whitespace()
        .map(|tok| tok.parse::<u32>().map_err(|_| malformed("bad relation id")))
        .collect::<Result<_>>()?;
    if aliases.is_empty() {
        return Err(malformed("empty relation list"));
    }

    let mut joins = Vec::new();
    let mut filters = Vec::new();
    for pred in preds.split('&') {
        match parse_predicate(pred, &aliases)? {
            ParsedPredicate::Join(j) => joins.push(j),
            ParsedPredicate::Filter(f) => filters.push(f),
        }
    }

    let mut projections = Vec::new();
    for proj in projs.split_whitespace() {
        let (alias, index) = parse_alias_dot_index(proj)?;
        projections.push(Column {
            table: *aliases
                .get(alias as usize)
                .ok_or_else(|| malformed("projection alias out of range"))?,
            alias,
            index,
        });
    }

    Ok(Query {
        num_relations: aliases.len() as u32,
        joins,
        filters,
        projections,
    })
}

enum ParsedPredicate {
    Join(JoinPredicate),
    Filter(FilterPredicate),
}

fn parse_predicate(pred: &str, aliases: &[u32]) -> Result<ParsedPredicate> {
    let pred = pred.trim();
    let (left_alias, rest) = take_uint(pred)?;
    let rest = expect_char(rest, '.')?;
    let (left_index, rest) = take_uint(rest)?;
    let (op_char, rest) = take_one_char(rest)?;

    let left_table = *aliases
        .get(left_alias as usize)
        .ok_or_else(|| malformed("predicate left alias out of range"))?;
    let left = Column {
        table: left_table,
        alias: left_alias,
        index: left_index,
    };

    match op_char {
        '<' | '>' => {
            let (value, rest) = take_uint(rest)?;
            expect_empty(rest)?;
            Ok(ParsedPredicate::Filter(FilterPredicate {
                column: left,
                value,
                operator: if op_char == '<' { Operator::Lt } else { Operator::Gt },
            }))
        }
        '=' => {
            let (num, rest) = take_uint(rest)?;
            if let Ok(rest_after_dot) = expect_char(rest, '.') {
                let (right_index, rest) = take_uint(rest_after_dot)?;
                expect_empty(rest)?;
                let right_alias = num;
                let right_table = *aliases
                    .get(right_alias as usize)
                    .ok_or_else(|| malformed("predicate right alias out of range"))?;
                Ok(ParsedPredicate::Join(JoinPredicate {
                    left,
                    right: Column {
                        table: right_table,
                        alias: right_alias,
                        index: right_index,
                    },
                }))
            } else {
                expect_empty(rest)?;
                Ok(ParsedPredicate::Filter(FilterPredicate {
                    column: left,
                    value: num,
                    operator: Operator::Eq,
                }))
            }
        }
        other => Err(malformed(&format!("unexpected predicate operator '{other}'"))),
    }
}

fn parse_alias_dot_index(token: &str) -> Result<(u32, u32)> {
    let (alias, rest) = take_uint(token)?;
    let rest = expect_char(rest, '.')?;
    let (index, rest) = take_uint(rest)?;
    expect_empty(rest)?;
    Ok((alias, index))
}

fn take_uint(s: &str) -> Result<(u32, &str)> {
    let digits_len = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits_len == 0 {
        return Err(malformed("expected an integer"));
    }
    let (digits, rest) = s.split_at(digits_len);
    let value = digits.parse::<u32>().map_err(|_| malformed("integer out of range"))?;
    Ok((value, rest))
}

fn take_one_char(s: &str) -> Result<(char, &str)> {
    let mut chars = s.chars();
    let c = chars.next().ok_or_else(|| malformed("expected an operator"))?;
    Ok((c, chars.as_str()))
}

fn expect_char(s: &str, expected: char) -> Result<&str> {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == expected => Ok(chars.as_str()),
        _ => Err(malformed(&format!("expected '{expected}'"))),
    }
}

fn expect_empty(s: &str) -> Result<()> {
    if s.is_empty() {
        Ok(())
    } else {
        Err(malformed("trailing characters in predicate"))
    }
}

fn malformed(msg: &str) -> DbError {
    DbError::QueryParse(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relation_names_until_done() {
        let input = b"r0.bin\nr1.bin\nDone\n0|0.0=0.0|0.0\n";
        let mut cursor = std::io::Cursor::new(&input[..]);
        let names = read_relation_names(&mut cursor).unwrap();
        assert_eq!(names, vec!["r0.bin".to_string(), "r1.bin".to_string()]);
    }

    #[test]
    fn parses_filter_and_join_and_projection() {
        let query = parse_query("0 2 4|0.1=1.2&1.0=2.1&0.1>3000|0.0 1.1").unwrap();

        assert_eq!(query.num_relations, 3);
        assert_eq!(query.joins.len(), 2);
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.projections.len(), 2);

        assert_eq!(query.joins[0].left, Column { table: 0, alias: 0, index: 1 });
        assert_eq!(query.joins[0].right, Column { table: 2, alias: 1, index: 2 });
        assert_eq!(query.joins[1].left, Column { table: 2, alias: 1, index: 0 });
        assert_eq!(query.joins[1].right, Column { table: 4, alias: 2, index: 1 });

        assert_eq!(query.filters[0].column, Column { table: 0, alias: 0, index: 1 });
        assert_eq!(query.filters[0].value, 3000);
        assert_eq!(query.filters[0].operator, Operator::Gt);

        assert_eq!(query.projections[0], Column { table: 0, alias: 0, index: 0 });
        assert_eq!(query.projections[1], Column { table: 2, alias: 1, index: 1 });
    }

    #[test]
    fn equality_filter_vs_join_disambiguation() {
        let filter_query = parse_query("0 1|0.0=5|0.0").unwrap();
        assert_eq!(filter_query.filters.len(), 1);
        assert_eq!(filter_query.joins.len(), 0);
        assert_eq!(filter_query.filters[0].operator, Operator::Eq);

        let join_query = parse_query("0 1|0.0=1.0|0.0").unwrap();
        assert_eq!(join_query.joins.len(), 1);
        assert_eq!(join_query.filters.len(), 0);
    }

    #[test]
    fn rejects_malformed_query() {
        assert!(parse_query("not a query").is_err());
        assert!(parse_query("0 1|0.0#1.0|0.0").is_err());
    }
}

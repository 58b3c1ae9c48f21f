//! A1 notation helpers.
//!
//! The public document model works on zero-based `(row, col)` integers. A1 text only appears
//! inside package parts (cell `r` attributes, `ref`/`sqref` lists, defined-name formulas) and in
//! formula text, so these helpers exist for the codecs and the formula rewriter.

use core::fmt::Write as _;

use thiserror::Error;

use crate::address::{CellRef, Range};
use crate::cell::{EXCEL_MAX_COLS, EXCEL_MAX_ROWS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty reference")]
    Empty,
    #[error("invalid reference {0:?}")]
    Invalid(String),
    #[error("reference {0:?} is outside the sheet grid")]
    OutOfBounds(String),
}

/// One endpoint of an A1 area: a cell, a whole row or a whole column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Cell(CellRef),
    Row(u32),
    Col(u32),
}

/// Append the column label for a 0-indexed column (`0` → `A`, `27` → `AB`).
pub fn push_column_label(col: u32, out: &mut String) {
    let mut n = col as u64 + 1;
    let mut buf = [0u8; 8];
    let mut len = 0;
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        buf[len] = b'A' + rem;
        len += 1;
        n = (n - 1) / 26;
    }
    for b in buf[..len].iter().rev() {
        out.push(*b as char);
    }
}

pub fn column_label(col: u32) -> String {
    let mut out = String::new();
    push_column_label(col, &mut out);
    out
}

/// Parse a column label (`A`, `xfd`) into a 0-indexed column.
pub fn parse_column_label(label: &str) -> Option<u32> {
    if label.is_empty() || label.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for b in label.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1);
    }
    let col = col - 1;
    (col < EXCEL_MAX_COLS).then_some(col)
}

pub fn push_cell_ref(cell: CellRef, absolute: bool, out: &mut String) {
    if absolute {
        out.push('$');
    }
    push_column_label(cell.col, out);
    if absolute {
        out.push('$');
    }
    let _ = write!(out, "{}", u64::from(cell.row) + 1);
}

/// Format a cell as relative A1 text (`B3`).
pub fn format_cell_ref(cell: CellRef) -> String {
    let mut out = String::new();
    push_cell_ref(cell, false, &mut out);
    out
}

/// Format a range as relative A1 text; single cells collapse to `B3`.
pub fn format_range(range: Range) -> String {
    let mut out = String::new();
    push_range(range, false, &mut out);
    out
}

/// Append a range. Whole-row and whole-column ranges use the `1:3` / `A:C` forms.
pub fn push_range(range: Range, absolute: bool, out: &mut String) {
    let dollar = if absolute { "$" } else { "" };
    if range.is_full_cols() && !range.is_full_rows() {
        out.push_str(dollar);
        push_column_label(range.start.col, out);
        out.push(':');
        out.push_str(dollar);
        push_column_label(range.end.col, out);
        return;
    }
    if range.is_full_rows() && !range.is_full_cols() {
        let _ = write!(
            out,
            "{dollar}{}:{dollar}{}",
            u64::from(range.start.row) + 1,
            u64::from(range.end.row) + 1
        );
        return;
    }
    push_cell_ref(range.start, absolute, out);
    if !range.is_single_cell() {
        out.push(':');
        push_cell_ref(range.end, absolute, out);
    }
}

/// Parse a single endpoint (`$B$3`, `B`, `3`).
pub fn parse_endpoint(s: &str) -> Result<Endpoint, A1ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(A1ParseError::Empty);
    }
    let bytes = s.as_bytes();
    let mut i = 0;
    if bytes[i] == b'$' {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let col_part = &s[col_start..i];
    if i < bytes.len() && bytes[i] == b'$' {
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let row_part = &s[row_start..i];
    if i != bytes.len() || (col_part.is_empty() && row_part.is_empty()) {
        return Err(A1ParseError::Invalid(s.to_string()));
    }

    let col = if col_part.is_empty() {
        None
    } else {
        Some(parse_column_label(col_part).ok_or_else(|| A1ParseError::OutOfBounds(s.to_string()))?)
    };
    let row = if row_part.is_empty() {
        None
    } else {
        let row1: u64 = row_part
            .parse()
            .map_err(|_| A1ParseError::Invalid(s.to_string()))?;
        if row1 == 0 || row1 > u64::from(EXCEL_MAX_ROWS) {
            return Err(A1ParseError::OutOfBounds(s.to_string()));
        }
        Some((row1 - 1) as u32)
    };

    match (row, col) {
        (Some(row), Some(col)) => Ok(Endpoint::Cell(CellRef::new(row, col))),
        (Some(row), None) => Ok(Endpoint::Row(row)),
        (None, Some(col)) => Ok(Endpoint::Col(col)),
        (None, None) => Err(A1ParseError::Invalid(s.to_string())),
    }
}

/// Parse a cell reference such as `B3` or `$B$3`.
pub fn parse_cell_ref(s: &str) -> Result<CellRef, A1ParseError> {
    match parse_endpoint(s)? {
        Endpoint::Cell(cell) => Ok(cell),
        _ => Err(A1ParseError::Invalid(s.to_string())),
    }
}

/// Parse an area (`A1:B2`, `C3`, `1:4`, `$A:$C`).
pub fn parse_range(s: &str) -> Result<Range, A1ParseError> {
    let s = s.trim();
    let (a, b) = match s.split_once(':') {
        Some((a, b)) => (a, b),
        None => (s, s),
    };
    match (parse_endpoint(a)?, parse_endpoint(b)?) {
        (Endpoint::Cell(a), Endpoint::Cell(b)) => Ok(Range::new(a, b)),
        (Endpoint::Row(a), Endpoint::Row(b)) if s.contains(':') => {
            Ok(Range::rows(a.min(b), a.max(b)))
        }
        (Endpoint::Col(a), Endpoint::Col(b)) if s.contains(':') => {
            Ok(Range::cols(a.min(b), a.max(b)))
        }
        _ => Err(A1ParseError::Invalid(s.to_string())),
    }
}

/// Parse a whitespace separated list of areas (`sqref`).
pub fn parse_sqref(s: &str) -> Result<Vec<Range>, A1ParseError> {
    s.split_ascii_whitespace().map(parse_range).collect()
}

pub fn format_sqref(ranges: &[Range]) -> String {
    let mut out = String::new();
    for (idx, range) in ranges.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        push_range(*range, false, &mut out);
    }
    out
}

/// Returns true if a sheet name has to be wrapped in single quotes inside a formula.
pub fn sheet_name_needs_quotes(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return true;
    };
    if first.is_ascii_digit() || first == '.' {
        return true;
    }
    if name
        .chars()
        .any(|c| !(c.is_alphanumeric() || c == '_' || c == '.'))
    {
        return true;
    }
    if name.eq_ignore_ascii_case("TRUE") || name.eq_ignore_ascii_case("FALSE") {
        return true;
    }
    // Names that read as references (`A1`, `XFD100`, `R1C1`, `R`, `C`).
    if parse_cell_ref(name).is_ok() {
        return true;
    }
    looks_like_r1c1(name)
}

fn looks_like_r1c1(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let mut rest = upper.as_str();
    if let Some(r) = rest.strip_prefix('R') {
        rest = r.trim_start_matches(|c: char| c.is_ascii_digit());
        if rest.is_empty() {
            return true;
        }
    }
    if let Some(c) = rest.strip_prefix('C') {
        return c.chars().all(|c| c.is_ascii_digit());
    }
    false
}

/// Append a sheet name, quoting it when required.
pub fn push_sheet_name(name: &str, out: &mut String) {
    if sheet_name_needs_quotes(name) {
        out.push('\'');
        for ch in name.chars() {
            if ch == '\'' {
                out.push('\'');
            }
            out.push(ch);
        }
        out.push('\'');
    } else {
        out.push_str(name);
    }
}

/// Format `Sheet!$A$1:$B$2` style area lists used by defined names.
pub fn format_area_list<'a>(areas: impl IntoIterator<Item = (&'a str, Range)>) -> String {
    let mut out = String::new();
    for (idx, (sheet, range)) in areas.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        push_sheet_name(sheet, &mut out);
        out.push('!');
        push_range(range, true, &mut out);
    }
    out
}

/// Parse a defined-name formula made only of sheet-qualified areas.
///
/// Returns `None` when the formula is anything else (constants, functions, external or
/// `#REF!` references), in which case the formula is kept as opaque text.
pub fn parse_area_list(formula: &str) -> Option<Vec<(String, Range)>> {
    let formula = formula.trim();
    let formula = formula.strip_prefix('=').unwrap_or(formula);
    let formula = formula
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .unwrap_or(formula);
    if formula.is_empty() {
        return None;
    }

    let mut areas = Vec::new();
    for part in split_top_level(formula, ',') {
        let (sheet, rest) = split_sheet_prefix(part.trim())?;
        if sheet.starts_with('[') || sheet.contains(':') {
            return None;
        }
        let range = parse_range(rest).ok()?;
        areas.push((sheet, range));
    }
    Some(areas)
}

fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let mut chars = input.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if ch == '\'' {
            if in_quotes && matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
        } else if ch == sep && !in_quotes {
            parts.push(&input[start..i]);
            start = i + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Split `Sheet!rest` / `'My Sheet'!rest` into the unquoted sheet name and the remainder.
pub fn split_sheet_prefix(input: &str) -> Option<(String, &str)> {
    if let Some(quoted) = input.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    name.push('\'');
                    continue;
                }
                let rest = quoted[i + 1..].strip_prefix('!')?;
                return Some((name, rest));
            }
            name.push(ch);
        }
        return None;
    }
    let (sheet, rest) = input.split_once('!')?;
    if sheet.is_empty()
        || !sheet
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }
    Some((sheet.to_string(), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_labels_round_trip() {
        for (col, label) in [(0, "A"), (25, "Z"), (26, "AA"), (701, "ZZ"), (16_383, "XFD")] {
            assert_eq!(column_label(col), label);
            assert_eq!(parse_column_label(label), Some(col));
        }
        assert_eq!(parse_column_label("XFE"), None);
    }

    #[test]
    fn parses_cells_rows_and_columns() {
        assert_eq!(parse_cell_ref("$C$10").unwrap(), CellRef::new(9, 2));
        assert_eq!(parse_range("B2:A1").unwrap(), Range::from_coords(0, 0, 1, 1));
        assert_eq!(parse_range("$2:$3").unwrap(), Range::rows(1, 2));
        assert_eq!(parse_range("C:A").unwrap(), Range::cols(0, 2));
        assert!(parse_range("A0").is_err());
        assert!(parse_range("2").is_err());
    }

    #[test]
    fn formats_whole_rows_and_columns_compactly() {
        assert_eq!(format_range(Range::rows(0, 0)), "1:1");
        assert_eq!(format_range(Range::cols(1, 3)), "B:D");
        assert_eq!(format_range(Range::single(CellRef::new(2, 1))), "B3");
        assert_eq!(
            format_sqref(&[Range::from_coords(0, 0, 1, 1), Range::single(CellRef::new(4, 4))]),
            "A1:B2 E5"
        );
    }

    #[test]
    fn quotes_sheet_names_only_when_needed() {
        assert!(!sheet_name_needs_quotes("Sheet1"));
        assert!(sheet_name_needs_quotes("My Sheet"));
        assert!(sheet_name_needs_quotes("A1"));
        assert!(sheet_name_needs_quotes("R1C1"));
        assert!(sheet_name_needs_quotes("2024"));
        assert!(sheet_name_needs_quotes("TRUE"));
    }

    #[test]
    fn area_lists_round_trip() {
        let areas = parse_area_list("'Q1 Data'!$A$1:$B$4,Summary!$3:$3").unwrap();
        assert_eq!(
            areas,
            vec![
                ("Q1 Data".to_string(), Range::from_coords(0, 0, 3, 1)),
                ("Summary".to_string(), Range::rows(2, 2)),
            ]
        );
        let text = format_area_list(areas.iter().map(|(s, r)| (s.as_str(), *r)));
        assert_eq!(text, "'Q1 Data'!$A$1:$B$4,Summary!$3:$3");
    }

    #[test]
    fn area_lists_reject_formulas() {
        assert_eq!(parse_area_list("Sheet1!#REF!"), None);
        assert_eq!(parse_area_list("0.05"), None);
        assert_eq!(parse_area_list("[1]Sheet1!$A$1"), None);
        assert_eq!(parse_area_list("SUM(Sheet1!A1:A3)"), None);
    }
}

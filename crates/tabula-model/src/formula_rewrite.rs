//! Reference rewriting over formula text.
//!
//! Formulas are opaque strings to the model, but structural edits, sheet renames, sheet removal
//! and shared-formula expansion all need to rewrite the A1 references inside them. The scanner
//! below finds references without a full parser: string literals, function names, structured
//! references (`Table1[Col]`), external workbook references (`[1]Sheet1!A1`) and 3D references
//! (`Sheet1:Sheet3!A1`) are copied through untouched.

use core::fmt::Write as _;

use crate::a1;
use crate::cell::{EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
use crate::sheet_name::sheet_name_eq;
use crate::structure::{SpanShift, StructuralEdit};

const REF_ERROR: &str = "#REF!";

/// One row or column component of a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coord {
    pub index: u32,
    /// `$`-anchored.
    pub absolute: bool,
}

/// The grid part of a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefArea {
    Cell {
        row: Coord,
        col: Coord,
    },
    Area {
        start_row: Coord,
        start_col: Coord,
        end_row: Coord,
        end_col: Coord,
    },
    Rows {
        start: Coord,
        end: Coord,
    },
    Cols {
        start: Coord,
        end: Coord,
    },
}

/// A reference found in formula text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference<'a> {
    /// Unquoted sheet name when the reference is sheet-qualified.
    pub sheet: Option<String>,
    /// Qualifier exactly as written, including the trailing `!` (empty when unqualified).
    pub qualifier: &'a str,
    /// Grid reference; `None` when the qualifier precedes a name or an error literal.
    pub area: Option<RefArea>,
    /// Text following the qualifier when `area` is `None`.
    pub tail: &'a str,
}

/// Result of rewriting one formula for a structural edit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub formula: String,
    pub changed: bool,
    /// References that became `#REF!`.
    pub invalidated: usize,
    /// Ranges that lost one of their edges.
    pub truncated: usize,
}

/// Rewrite references to `edit_sheet` for a row/column insertion or deletion.
///
/// `host_sheet` is the sheet the formula lives on; unqualified references resolve against it.
/// Names (which have no host sheet) pass `None`.
pub fn rewrite_for_edit(
    formula: &str,
    host_sheet: Option<&str>,
    edit_sheet: &str,
    edit: &StructuralEdit,
) -> RewriteOutcome {
    let mut invalidated = 0;
    let mut truncated = 0;
    let rewritten = scan(formula, |reference| {
        let area = reference.area?;
        let applies = match reference.sheet.as_deref() {
            Some(sheet) => sheet_name_eq(sheet, edit_sheet),
            None => host_sheet.is_some_and(|host| sheet_name_eq(host, edit_sheet)),
        };
        if !applies {
            return None;
        }
        match shift_area(area, edit) {
            AreaShift::Same => None,
            AreaShift::Moved(area) => Some(format_reference(reference.qualifier, area)),
            AreaShift::Truncated(area) => {
                truncated += 1;
                Some(format_reference(reference.qualifier, area))
            }
            AreaShift::Removed => {
                invalidated += 1;
                Some(format!("{}{REF_ERROR}", reference.qualifier))
            }
        }
    });
    match rewritten {
        Some(formula) => RewriteOutcome {
            formula,
            changed: true,
            invalidated,
            truncated,
        },
        None => RewriteOutcome {
            formula: formula.to_string(),
            changed: false,
            invalidated: 0,
            truncated: 0,
        },
    }
}

/// Move every relative reference by `(drow, dcol)`, as when a formula is filled or shared.
///
/// References pushed off the grid become `#REF!`. Returns the input unchanged when nothing moves.
pub fn translate(formula: &str, drow: i64, dcol: i64) -> String {
    if drow == 0 && dcol == 0 {
        return formula.to_string();
    }
    scan(formula, |reference| {
        let area = reference.area?;
        let moved = match translate_area(area, drow, dcol) {
            Some(moved) if moved == area => return None,
            Some(moved) => format_reference(reference.qualifier, moved),
            None => format!("{}{REF_ERROR}", reference.qualifier),
        };
        Some(moved)
    })
    .unwrap_or_else(|| formula.to_string())
}

/// Replace qualifiers naming `old` with `new`. Returns `None` when nothing referenced `old`.
pub fn rename_sheet(formula: &str, old: &str, new: &str) -> Option<String> {
    let mut qualifier = String::new();
    a1::push_sheet_name(new, &mut qualifier);
    qualifier.push('!');
    scan(formula, |reference| {
        let sheet = reference.sheet.as_deref()?;
        if !sheet_name_eq(sheet, old) {
            return None;
        }
        Some(match reference.area {
            Some(area) => format_reference(&qualifier, area),
            None => format!("{qualifier}{}", reference.tail),
        })
    })
}

/// Turn every reference qualified with `sheet` into `#REF!`. Returns `None` when unaffected.
pub fn invalidate_sheet(formula: &str, sheet: &str) -> Option<String> {
    scan(formula, |reference| {
        let name = reference.sheet.as_deref()?;
        if !sheet_name_eq(name, sheet) {
            return None;
        }
        if reference.area.is_none() && reference.tail.is_empty() {
            // `Sheet!#REF!` keeps the error literal that follows.
            return Some(String::new());
        }
        Some(REF_ERROR.to_string())
    })
}

/// Every reference in `formula`, in order of appearance.
pub fn references(formula: &str) -> Vec<Reference<'_>> {
    let mut found = Vec::new();
    walk(formula, &mut |reference, _| {
        found.push(reference);
        None
    });
    found
}

enum AreaShift {
    Same,
    Moved(RefArea),
    Truncated(RefArea),
    Removed,
}

fn shift_area(area: RefArea, edit: &StructuralEdit) -> AreaShift {
    let on_rows = edit.is_rows();
    match area {
        RefArea::Cell { row, col } => {
            let coord = if on_rows { row } else { col };
            match edit.shift_index(coord.index) {
                None => AreaShift::Removed,
                Some(index) if index == coord.index => AreaShift::Same,
                Some(index) => {
                    let moved = Coord { index, ..coord };
                    AreaShift::Moved(if on_rows {
                        RefArea::Cell { row: moved, col }
                    } else {
                        RefArea::Cell { row, col: moved }
                    })
                }
            }
        }
        RefArea::Area {
            start_row,
            start_col,
            end_row,
            end_col,
        } => {
            let (s, e) = if on_rows {
                ordered(start_row, end_row)
            } else {
                ordered(start_col, end_col)
            };
            let rebuild = |s: Coord, e: Coord| {
                if on_rows {
                    let (sc, ec) = ordered(start_col, end_col);
                    RefArea::Area {
                        start_row: s,
                        start_col: sc,
                        end_row: e,
                        end_col: ec,
                    }
                } else {
                    let (sr, er) = ordered(start_row, end_row);
                    RefArea::Area {
                        start_row: sr,
                        start_col: s,
                        end_row: er,
                        end_col: e,
                    }
                }
            };
            shift_coords(s, e, edit, rebuild)
        }
        RefArea::Rows { start, end } if on_rows => {
            let (s, e) = ordered(start, end);
            shift_coords(s, e, edit, |start, end| RefArea::Rows { start, end })
        }
        RefArea::Cols { start, end } if !on_rows => {
            let (s, e) = ordered(start, end);
            shift_coords(s, e, edit, |start, end| RefArea::Cols { start, end })
        }
        RefArea::Rows { .. } | RefArea::Cols { .. } => AreaShift::Same,
    }
}

fn shift_coords(
    s: Coord,
    e: Coord,
    edit: &StructuralEdit,
    rebuild: impl Fn(Coord, Coord) -> RefArea,
) -> AreaShift {
    let with = |start: u32, end: u32| {
        rebuild(
            Coord {
                index: start,
                ..s
            },
            Coord { index: end, ..e },
        )
    };
    match edit.shift_span(s.index, e.index) {
        SpanShift::Kept(start, end) if start == s.index && end == e.index => AreaShift::Same,
        SpanShift::Kept(start, end) => AreaShift::Moved(with(start, end)),
        SpanShift::Truncated(start, end) => AreaShift::Truncated(with(start, end)),
        SpanShift::Removed => AreaShift::Removed,
    }
}

fn ordered(a: Coord, b: Coord) -> (Coord, Coord) {
    if a.index <= b.index {
        (a, b)
    } else {
        (b, a)
    }
}

fn translate_area(area: RefArea, drow: i64, dcol: i64) -> Option<RefArea> {
    let row = |c: Coord| move_coord(c, drow, EXCEL_MAX_ROWS);
    let col = |c: Coord| move_coord(c, dcol, EXCEL_MAX_COLS);
    Some(match area {
        RefArea::Cell { row: r, col: c } => RefArea::Cell {
            row: row(r)?,
            col: col(c)?,
        },
        RefArea::Area {
            start_row,
            start_col,
            end_row,
            end_col,
        } => RefArea::Area {
            start_row: row(start_row)?,
            start_col: col(start_col)?,
            end_row: row(end_row)?,
            end_col: col(end_col)?,
        },
        RefArea::Rows { start, end } => RefArea::Rows {
            start: row(start)?,
            end: row(end)?,
        },
        RefArea::Cols { start, end } => RefArea::Cols {
            start: col(start)?,
            end: col(end)?,
        },
    })
}

fn move_coord(coord: Coord, delta: i64, limit: u32) -> Option<Coord> {
    if coord.absolute {
        return Some(coord);
    }
    let index = i64::from(coord.index) + delta;
    if index < 0 || index >= i64::from(limit) {
        return None;
    }
    Some(Coord {
        index: index as u32,
        absolute: false,
    })
}

fn format_reference(qualifier: &str, area: RefArea) -> String {
    let mut out = String::from(qualifier);
    match area {
        RefArea::Cell { row, col } => {
            push_col(&mut out, col);
            push_row(&mut out, row);
        }
        RefArea::Area {
            start_row,
            start_col,
            end_row,
            end_col,
        } => {
            push_col(&mut out, start_col);
            push_row(&mut out, start_row);
            out.push(':');
            push_col(&mut out, end_col);
            push_row(&mut out, end_row);
        }
        RefArea::Rows { start, end } => {
            push_row(&mut out, start);
            out.push(':');
            push_row(&mut out, end);
        }
        RefArea::Cols { start, end } => {
            push_col(&mut out, start);
            out.push(':');
            push_col(&mut out, end);
        }
    }
    out
}

fn push_col(out: &mut String, col: Coord) {
    if col.absolute {
        out.push('$');
    }
    a1::push_column_label(col.index, out);
}

fn push_row(out: &mut String, row: Coord) {
    if row.absolute {
        out.push('$');
    }
    let _ = write!(out, "{}", u64::from(row.index) + 1);
}

/// Run `visit` over every reference; returns the rewritten text if any replacement happened.
fn scan<'a>(
    formula: &'a str,
    mut visit: impl FnMut(&Reference<'a>) -> Option<String>,
) -> Option<String> {
    let mut changed = false;
    let out = walk(formula, &mut |reference, original| {
        let replacement = visit(&reference)?;
        if replacement != original {
            changed = true;
        }
        Some(replacement)
    });
    changed.then_some(out)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '\\')
}

fn word_end(s: &str, start: usize) -> usize {
    s[start..]
        .char_indices()
        .find(|(_, c)| !is_word_char(*c))
        .map(|(i, _)| start + i)
        .unwrap_or(s.len())
}

fn char_at(s: &str, i: usize) -> Option<char> {
    s.get(i..).and_then(|rest| rest.chars().next())
}

/// End index (exclusive) of a `"..."` literal starting at `start`.
fn string_end(s: &str, start: usize) -> usize {
    let mut i = start + 1;
    while i < s.len() {
        if s.as_bytes()[i] == b'"' {
            if s.as_bytes().get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    s.len()
}

/// End index (exclusive) of a `[...]` segment starting at `start`, honoring nesting.
fn bracket_end(s: &str, start: usize) -> usize {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate().skip(start) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
    }
    s.len()
}

/// Parse `'quoted name'!` at `start`; returns the unescaped name and the index after `!`.
fn quoted_qualifier(s: &str, start: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut iter = s[start + 1..].char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        if ch == '\'' {
            if matches!(iter.peek(), Some((_, '\''))) {
                iter.next();
                name.push('\'');
                continue;
            }
            let after_quote = start + 1 + i + 1;
            return (char_at(s, after_quote) == Some('!')).then_some((name, after_quote + 1));
        }
        name.push(ch);
    }
    None
}

fn parse_coord_part(word: &str) -> Option<(Option<Coord>, Option<Coord>)> {
    let bytes = word.as_bytes();
    let mut i = 0;
    let col_abs = bytes.first() == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let col_text = &word[col_start..i];
    let mut row_abs = false;
    if i < bytes.len() && bytes[i] == b'$' {
        row_abs = true;
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let row_text = &word[row_start..i];
    if i != bytes.len() {
        return None;
    }

    let col = if col_text.is_empty() {
        if col_abs && !row_text.is_empty() {
            // `$5` is an absolute row.
            row_abs = true;
        } else if col_abs {
            return None;
        }
        None
    } else {
        Some(Coord {
            index: a1::parse_column_label(col_text)?,
            absolute: col_abs,
        })
    };
    let row = if row_text.is_empty() {
        if row_abs {
            return None;
        }
        None
    } else {
        let row1: u64 = row_text.parse().ok()?;
        if row1 == 0 || row1 > u64::from(EXCEL_MAX_ROWS) {
            return None;
        }
        Some(Coord {
            index: (row1 - 1) as u32,
            absolute: row_abs,
        })
    };
    if row.is_none() && col.is_none() {
        return None;
    }
    Some((row, col))
}

/// Parse a reference starting at `start`; returns the area and the end index.
fn parse_area_at(s: &str, start: usize) -> Option<(RefArea, usize)> {
    let first_end = word_end(s, start);
    if first_end == start {
        return None;
    }
    let first = parse_coord_part(&s[start..first_end]);

    if char_at(s, first_end) == Some(':') {
        let second_start = first_end + 1;
        let second_end = word_end(s, second_start);
        if second_end > second_start && char_at(s, second_end) != Some('(') {
            let second = parse_coord_part(&s[second_start..second_end]);
            let area = match (first, second) {
                (Some((Some(r1), Some(c1))), Some((Some(r2), Some(c2)))) => Some(RefArea::Area {
                    start_row: r1,
                    start_col: c1,
                    end_row: r2,
                    end_col: c2,
                }),
                (Some((Some(r1), None)), Some((Some(r2), None))) => {
                    Some(RefArea::Rows { start: r1, end: r2 })
                }
                (Some((None, Some(c1))), Some((None, Some(c2)))) => {
                    Some(RefArea::Cols { start: c1, end: c2 })
                }
                _ => None,
            };
            if let Some(area) = area {
                return Some((area, second_end));
            }
        }
    }

    match first? {
        (Some(row), Some(col)) if char_at(s, first_end) != Some('(') => {
            Some((RefArea::Cell { row, col }, first_end))
        }
        _ => None,
    }
}

/// Core scanner. `visit` receives each reference and its original text and may return a
/// replacement for that text.
fn walk<'a>(
    formula: &'a str,
    visit: &mut dyn FnMut(Reference<'a>, &'a str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut i = 0;
    while let Some(ch) = char_at(formula, i) {
        match ch {
            '"' => {
                let end = string_end(formula, i);
                out.push_str(&formula[i..end]);
                i = end;
            }
            '\'' => match quoted_qualifier(formula, i) {
                Some((sheet, after)) => {
                    i = qualified(formula, i, after, Some(sheet), &mut out, visit);
                }
                None => {
                    out.push(ch);
                    i += ch.len_utf8();
                }
            },
            '[' => {
                // External workbook reference: copy `[n]Sheet!Ref` verbatim.
                let mut end = bracket_end(formula, i);
                if char_at(formula, end) == Some('\'') {
                    end = quoted_qualifier(formula, end)
                        .map(|(_, after)| after)
                        .unwrap_or(end);
                } else {
                    end = word_end(formula, end);
                    if char_at(formula, end) == Some('!') {
                        end += 1;
                    }
                }
                if let Some((_, area_end)) = parse_area_at(formula, end) {
                    end = area_end;
                }
                out.push_str(&formula[i..end]);
                i = end;
            }
            c if is_word_char(c) => {
                let end = word_end(formula, i);
                match char_at(formula, end) {
                    Some('!') => {
                        let sheet = formula[i..end].to_string();
                        i = qualified(formula, i, end + 1, Some(sheet), &mut out, visit);
                    }
                    Some(':') if is_three_d(formula, end) => {
                        let bang = word_end(formula, end + 1);
                        let mut stop = bang + 1;
                        if let Some((_, area_end)) = parse_area_at(formula, stop) {
                            stop = area_end;
                        }
                        out.push_str(&formula[i..stop]);
                        i = stop;
                    }
                    Some('(') => {
                        out.push_str(&formula[i..end]);
                        i = end;
                    }
                    Some('[') => {
                        let stop = bracket_end(formula, end);
                        out.push_str(&formula[i..stop]);
                        i = stop;
                    }
                    _ => match parse_area_at(formula, i) {
                        Some((area, area_end)) => {
                            let original = &formula[i..area_end];
                            let reference = Reference {
                                sheet: None,
                                qualifier: "",
                                area: Some(area),
                                tail: "",
                            };
                            match visit(reference, original) {
                                Some(replacement) => out.push_str(&replacement),
                                None => out.push_str(original),
                            }
                            i = area_end;
                        }
                        None => {
                            out.push_str(&formula[i..end]);
                            i = end;
                        }
                    },
                }
            }
            _ => {
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

/// `Sheet1:Sheet3!` starting right after `Sheet1`.
fn is_three_d(s: &str, colon: usize) -> bool {
    let end = word_end(s, colon + 1);
    end > colon + 1 && char_at(s, end) == Some('!')
}

fn qualified<'a>(
    formula: &'a str,
    start: usize,
    after_bang: usize,
    sheet: Option<String>,
    out: &mut String,
    visit: &mut dyn FnMut(Reference<'a>, &'a str) -> Option<String>,
) -> usize {
    let qualifier = &formula[start..after_bang];
    let (area, end) = match parse_area_at(formula, after_bang) {
        Some((area, end)) => (Some(area), end),
        None => (None, word_end(formula, after_bang)),
    };
    let original = &formula[start..end];
    let reference = Reference {
        sheet,
        qualifier,
        area,
        tail: if area.is_some() {
            ""
        } else {
            &formula[after_bang..end]
        },
    };
    match visit(reference, original) {
        Some(replacement) => out.push_str(&replacement),
        None => out.push_str(original),
    }
    end
}

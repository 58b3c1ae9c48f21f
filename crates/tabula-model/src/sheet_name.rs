use thiserror::Error;

/// Maximum sheet name length in UTF-16 code units.
pub const EXCEL_MAX_SHEET_NAME_LEN: usize = 31;

const FORBIDDEN: [char; 7] = [':', '\\', '/', '?', '*', '[', ']'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SheetNameError {
    #[error("sheet name cannot be empty")]
    Empty,
    #[error("sheet name cannot exceed 31 characters")]
    TooLong,
    #[error("sheet name contains invalid character `{0}`")]
    InvalidCharacter(char),
    #[error("sheet name cannot begin or end with an apostrophe")]
    LeadingOrTrailingApostrophe,
}

pub fn validate_sheet_name(name: &str) -> Result<(), SheetNameError> {
    if name.trim().is_empty() {
        return Err(SheetNameError::Empty);
    }
    if name.encode_utf16().count() > EXCEL_MAX_SHEET_NAME_LEN {
        return Err(SheetNameError::TooLong);
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(SheetNameError::InvalidCharacter(ch));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(SheetNameError::LeadingOrTrailingApostrophe);
    }
    Ok(())
}

/// Case-insensitive sheet name comparison (Unicode aware).
pub fn sheet_name_eq(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// `"{base} ({n})"`, truncating `base` so the result stays a valid length.
pub(crate) fn numbered_sheet_name(base: &str, n: u32) -> String {
    let suffix = format!(" ({n})");
    let budget = EXCEL_MAX_SHEET_NAME_LEN - suffix.len();
    let mut truncated = String::new();
    let mut units = 0;
    for ch in base.chars() {
        units += ch.len_utf16();
        if units > budget {
            break;
        }
        truncated.push(ch);
    }
    let truncated = truncated.trim_end_matches('\'');
    format!("{truncated}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_names() {
        assert_eq!(validate_sheet_name(""), Err(SheetNameError::Empty));
        assert_eq!(
            validate_sheet_name("a/b"),
            Err(SheetNameError::InvalidCharacter('/'))
        );
        assert_eq!(
            validate_sheet_name("'quoted"),
            Err(SheetNameError::LeadingOrTrailingApostrophe)
        );
        assert_eq!(
            validate_sheet_name(&"x".repeat(32)),
            Err(SheetNameError::TooLong)
        );
        assert!(validate_sheet_name("Budget 2024").is_ok());
    }

    #[test]
    fn comparison_ignores_case() {
        assert!(sheet_name_eq("Sheet1", "SHEET1"));
        assert!(sheet_name_eq("Übersicht", "übersicht"));
        assert!(!sheet_name_eq("Sheet1", "Sheet2"));
    }

    #[test]
    fn numbered_names_fit_the_length_limit() {
        assert_eq!(numbered_sheet_name("Data", 2), "Data (2)");
        let long = "y".repeat(31);
        let name = numbered_sheet_name(&long, 12);
        assert_eq!(name.len(), 31);
        assert!(name.ends_with(" (12)"));
    }
}

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// First id available for custom number formats in a styles part.
pub const FIRST_CUSTOM_NUM_FMT_ID: u32 = 164;

/// Built-in format id for `m/d/yy h:mm`.
pub const BUILTIN_DATETIME: u16 = 22;
/// Built-in format id for `mm-dd-yy`.
pub const BUILTIN_DATE: u16 = 14;

/// Cell number format: either one of the implicit built-in ids or a custom format code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NumberFormat {
    Builtin(u16),
    Custom(String),
}

impl Default for NumberFormat {
    fn default() -> Self {
        NumberFormat::Builtin(0)
    }
}

impl NumberFormat {
    pub const GENERAL: NumberFormat = NumberFormat::Builtin(0);

    /// Format code text. Unknown built-in ids (locale dependent ones) resolve to `General`.
    pub fn code(&self) -> Cow<'_, str> {
        match self {
            NumberFormat::Builtin(id) => Cow::Borrowed(builtin_code(*id).unwrap_or("General")),
            NumberFormat::Custom(code) => Cow::Borrowed(code.as_str()),
        }
    }

    /// True when values with this format are displayed as dates or times.
    pub fn is_date(&self) -> bool {
        match self {
            NumberFormat::Builtin(id) => matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58),
            NumberFormat::Custom(code) => code_is_date(code),
        }
    }
}

/// Format code for a built-in number format id.
pub fn builtin_code(id: u16) -> Option<&'static str> {
    Some(match id {
        0 => "General",
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "mm-dd-yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    })
}

/// Built-in id whose code is exactly `code`, if any.
pub fn builtin_id_for_code(code: &str) -> Option<u16> {
    (0u16..=49).find(|id| builtin_code(*id) == Some(code))
}

/// Scan a custom format code for date/time tokens outside literals and `[...]` sections.
fn code_is_date(code: &str) -> bool {
    // Only the first section decides how positive numbers render.
    let mut in_quotes = false;
    let mut chars = code.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '\\' | '_' | '*' => {
                chars.next();
            }
            ';' => return false,
            '[' => {
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                // Elapsed time tokens like `[h]` or `[mm]`.
                let lower = inner.to_ascii_lowercase();
                if !lower.is_empty() && lower.chars().all(|c| matches!(c, 'h' | 'm' | 's')) {
                    return true;
                }
            }
            'd' | 'D' | 'm' | 'M' | 'y' | 'Y' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

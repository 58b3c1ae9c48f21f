use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::address::{CellRef, Range};
use crate::cell::Cell;
use crate::changes::SheetChange;
use crate::compact::Compaction;
use crate::date_system::DateSystem;
use crate::error::ModelError;
use crate::formula_rewrite;
use crate::merge::MergedRegions;
use crate::names::{validate_defined_name, DefinedName, NameScope, NameTarget};
use crate::number_format::{NumberFormat, BUILTIN_DATE, BUILTIN_DATETIME};
use crate::rich_text::RichText;
use crate::shared_strings::SharedStringTable;
use crate::sheet_name::{numbered_sheet_name, sheet_name_eq, validate_sheet_name};
use crate::structure::{EditReport, LossyEditKind};
use crate::style::{Alignment, Border, Fill, Font, NamedStyle, Protection, Style, StyleTable};
use crate::value::CellValue;
use crate::worksheet::Worksheet;
use crate::SheetId;

/// In-memory workbook.
///
/// Sheets are kept in tab order. Every style id and shared-string id stored in a cell resolves in
/// the workbook's tables; operations that would break that fail before changing anything.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
    next_sheet_id: SheetId,
    #[serde(default)]
    styles: StyleTable,
    #[serde(default)]
    shared_strings: SharedStringTable,
    #[serde(default)]
    named_styles: Vec<NamedStyle>,
    #[serde(default)]
    defined_names: Vec<DefinedName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_sheet: Option<SheetId>,
    #[serde(default)]
    date_system: DateSystem,
    /// Recorded sheet changes; `None` until tracking is switched on.
    #[serde(skip)]
    changes: Option<Vec<SheetChange>>,
}

// Recorded changes are bookkeeping and do not make two workbooks differ.
impl PartialEq for Workbook {
    fn eq(&self, other: &Self) -> bool {
        self.sheets == other.sheets
            && self.next_sheet_id == other.next_sheet_id
            && self.styles == other.styles
            && self.shared_strings == other.shared_strings
            && self.named_styles == other.named_styles
            && self.defined_names == other.defined_names
            && self.active_sheet == other.active_sheet
            && self.date_system == other.date_system
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// An empty workbook with no sheets and a default style table.
    pub fn new() -> Self {
        Self {
            sheets: Vec::new(),
            next_sheet_id: 1,
            styles: StyleTable::new(),
            shared_strings: SharedStringTable::new(),
            named_styles: Vec::new(),
            defined_names: Vec::new(),
            active_sheet: None,
            date_system: DateSystem::default(),
            changes: None,
        }
    }

    /// Start recording [`SheetChange`]s: structural edits, renames, copies and removals.
    pub fn track_sheet_changes(&mut self) {
        self.changes.get_or_insert_with(Vec::new);
    }

    /// Changes recorded since the last [`Workbook::take_sheet_changes`], oldest first.
    pub fn pending_sheet_changes(&self) -> &[SheetChange] {
        self.changes.as_deref().unwrap_or_default()
    }

    /// Drain the recorded changes. Tracking stays on.
    pub fn take_sheet_changes(&mut self) -> Vec<SheetChange> {
        self.changes.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub(crate) fn record_change(&mut self, change: SheetChange) {
        if let Some(changes) = &mut self.changes {
            changes.push(change);
        }
    }

    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }

    pub fn set_date_system(&mut self, date_system: DateSystem) {
        self.date_system = date_system;
    }

    pub fn styles(&self) -> &StyleTable {
        &self.styles
    }

    pub fn shared_strings(&self) -> &SharedStringTable {
        &self.shared_strings
    }

    /// Replace both tables at once, as a loader does after reading the package.
    ///
    /// Fails (leaving the workbook unchanged) when a stored cell, row or column refers to an id
    /// outside the new tables.
    pub fn set_tables(
        &mut self,
        styles: StyleTable,
        shared_strings: SharedStringTable,
    ) -> Result<(), ModelError> {
        if let Some(id) = self.used_style_ids().into_iter().find(|id| !styles.contains(*id)) {
            return Err(ModelError::InvalidStyleIndex(id));
        }
        if let Some(id) = self
            .used_string_ids()
            .into_iter()
            .find(|id| !shared_strings.contains(*id))
        {
            return Err(ModelError::InvalidStringIndex(id));
        }
        self.styles = styles;
        self.shared_strings = shared_strings;
        Ok(())
    }

    pub fn shared_strings_mut(&mut self) -> &mut SharedStringTable {
        &mut self.shared_strings
    }

    // ----- sheets -----

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    pub(crate) fn sheets_mut(&mut self) -> &mut [Worksheet] {
        &mut self.sheets
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.id() == id)
    }

    pub fn sheet_mut(&mut self, id: SheetId) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.id() == id)
    }

    /// Case-insensitive lookup.
    pub fn sheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| sheet_name_eq(s.name(), name))
    }

    pub fn sheet_index(&self, id: SheetId) -> Option<usize> {
        self.sheets.iter().position(|s| s.id() == id)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name()).collect()
    }

    pub fn contains_sheet(&self, name: &str) -> bool {
        self.sheet_by_name(name).is_some()
    }

    fn sheet_ref(&self, id: SheetId) -> Result<&Worksheet, ModelError> {
        self.sheet(id).ok_or(ModelError::SheetNotFound(id))
    }

    fn sheet_mut_ref(&mut self, id: SheetId) -> Result<&mut Worksheet, ModelError> {
        self.sheet_mut(id).ok_or(ModelError::SheetNotFound(id))
    }

    fn check_new_sheet_name(&self, name: &str, renaming: Option<SheetId>) -> Result<(), ModelError> {
        validate_sheet_name(name).map_err(|reason| ModelError::InvalidSheetName {
            name: name.to_string(),
            reason,
        })?;
        let clash = self
            .sheets
            .iter()
            .any(|s| Some(s.id()) != renaming && sheet_name_eq(s.name(), name));
        if clash {
            return Err(ModelError::DuplicateSheetName(name.to_string()));
        }
        Ok(())
    }

    fn allocate_sheet_id(&mut self) -> SheetId {
        let id = self.next_sheet_id;
        self.next_sheet_id += 1;
        id
    }

    /// Append a sheet at the end of the tab order.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> Result<SheetId, ModelError> {
        let index = self.sheets.len();
        self.insert_sheet(index, name)
    }

    /// Insert a sheet so it ends up at tab position `index`.
    pub fn insert_sheet(
        &mut self,
        index: usize,
        name: impl Into<String>,
    ) -> Result<SheetId, ModelError> {
        let name = name.into();
        if index > self.sheets.len() {
            return Err(ModelError::OutOfBounds(format!("sheet index {index}")));
        }
        self.check_new_sheet_name(&name, None)?;
        let id = self.allocate_sheet_id();
        self.sheets.insert(index, Worksheet::new(id, name));
        if self.active_sheet.is_none() {
            self.active_sheet = Some(id);
        }
        Ok(id)
    }

    /// Append a sheet and hand it back for direct population.
    pub fn push_sheet(&mut self, name: impl Into<String>) -> Result<&mut Worksheet, ModelError> {
        let id = self.add_sheet(name)?;
        self.sheet_mut_ref(id)
    }

    /// Rename a sheet and rewrite every formula and defined name that refers to it by name.
    pub fn rename_sheet(&mut self, id: SheetId, name: impl Into<String>) -> Result<(), ModelError> {
        let name = name.into();
        let old = self.sheet_ref(id)?.name().to_string();
        self.check_new_sheet_name(&name, Some(id))?;
        if old == name {
            return Ok(());
        }
        for ws in &mut self.sheets {
            for (_, cell) in ws.cells_mut().iter_mut() {
                if let CellValue::Formula(formula) = &mut cell.value {
                    if let Some(expr) = formula_rewrite::rename_sheet(&formula.expr, &old, &name) {
                        formula.expr = expr;
                    }
                }
            }
        }
        for defined in &mut self.defined_names {
            if let NameTarget::Formula(formula) = &mut defined.target {
                if let Some(expr) = formula_rewrite::rename_sheet(formula, &old, &name) {
                    *formula = expr;
                }
            }
        }
        log::debug!("renamed sheet {old:?} to {name:?}");
        self.sheet_mut_ref(id)?.set_name(name.clone());
        self.record_change(SheetChange::Renamed {
            sheet: id,
            old,
            new: name,
        });
        Ok(())
    }

    /// Move a sheet to tab position `index`.
    pub fn move_sheet(&mut self, id: SheetId, index: usize) -> Result<(), ModelError> {
        let from = self.sheet_index(id).ok_or(ModelError::SheetNotFound(id))?;
        if index >= self.sheets.len() {
            return Err(ModelError::OutOfBounds(format!("sheet index {index}")));
        }
        let sheet = self.sheets.remove(from);
        self.sheets.insert(index, sheet);
        Ok(())
    }

    /// Duplicate a sheet right after the source, named `"<name> (n)"`.
    ///
    /// Cells, merges, row/column properties, view and print settings and the sheet's own defined
    /// names are copied. Style and string ids are shared with the source.
    pub fn copy_sheet(&mut self, id: SheetId) -> Result<SheetId, ModelError> {
        let index = self.sheet_index(id).ok_or(ModelError::SheetNotFound(id))?;
        let source_name = self.sheets[index].name().to_string();
        let name = (2..)
            .map(|n| numbered_sheet_name(&source_name, n))
            .find(|candidate| !self.contains_sheet(candidate))
            .ok_or_else(|| ModelError::DuplicateSheetName(source_name.clone()))?;

        let new_id = self.allocate_sheet_id();
        let mut copy = self.sheets[index].clone();
        copy.set_id(new_id);
        copy.set_name(name.clone());

        // Unqualified references already resolve to the copy; qualified self-references follow it.
        for (_, cell) in copy.cells_mut().iter_mut() {
            if let CellValue::Formula(formula) = &mut cell.value {
                if let Some(expr) = formula_rewrite::rename_sheet(&formula.expr, &source_name, &name)
                {
                    formula.expr = expr;
                }
            }
        }
        self.sheets.insert(index + 1, copy);

        let scoped: Vec<DefinedName> = self
            .defined_names
            .iter()
            .filter(|n| n.scope == NameScope::Sheet(id))
            .cloned()
            .collect();
        for mut defined in scoped {
            defined.scope = NameScope::Sheet(new_id);
            match &mut defined.target {
                NameTarget::Ranges(targets) => {
                    for target in targets.iter_mut().filter(|t| t.sheet == id) {
                        target.sheet = new_id;
                    }
                }
                NameTarget::Formula(formula) => {
                    if let Some(expr) = formula_rewrite::rename_sheet(formula, &source_name, &name) {
                        *formula = expr;
                    }
                }
            }
            self.defined_names.push(defined);
        }
        log::debug!("copied sheet {source_name:?} to {name:?}");
        self.record_change(SheetChange::Copied {
            from: id,
            to: new_id,
            from_name: source_name,
            to_name: name,
        });
        Ok(new_id)
    }

    /// Remove a sheet, invalidating references to it.
    pub fn remove_sheet(&mut self, id: SheetId) -> Result<EditReport, ModelError> {
        let index = self.sheet_index(id).ok_or(ModelError::SheetNotFound(id))?;
        if self.sheets.len() == 1 {
            return Err(ModelError::CannotRemoveLastSheet);
        }
        let removed = self.sheets.remove(index);
        let name = removed.name().to_string();
        let mut report = EditReport::default();

        self.defined_names.retain(|n| n.scope != NameScope::Sheet(id));
        let mut emptied = Vec::new();
        for (idx, defined) in self.defined_names.iter_mut().enumerate() {
            match &mut defined.target {
                NameTarget::Ranges(targets) => {
                    let before = std::mem::take(targets);
                    for target in before {
                        if target.sheet == id {
                            report.push(
                                id,
                                LossyEditKind::NameTargetRemoved {
                                    name: defined.name.clone(),
                                    range: target.range,
                                },
                            );
                        } else {
                            targets.push(target);
                        }
                    }
                    if targets.is_empty() {
                        emptied.push(idx);
                    }
                }
                NameTarget::Formula(formula) => {
                    if let Some(expr) = formula_rewrite::invalidate_sheet(formula, &name) {
                        *formula = expr;
                        report.formulas_rewritten += 1;
                        report.push(
                            id,
                            LossyEditKind::NameReferenceInvalidated {
                                name: defined.name.clone(),
                            },
                        );
                    }
                }
            }
        }
        for idx in emptied.into_iter().rev() {
            let defined = self.defined_names.remove(idx);
            report.push(id, LossyEditKind::NameRemoved { name: defined.name });
        }

        for ws in &mut self.sheets {
            let host = ws.id();
            for (at, cell) in ws.cells_mut().iter_mut() {
                if let CellValue::Formula(formula) = &mut cell.value {
                    if let Some(expr) = formula_rewrite::invalidate_sheet(&formula.expr, &name) {
                        formula.expr = expr;
                        report.formulas_rewritten += 1;
                        report.push(
                            host,
                            LossyEditKind::FormulaReferenceInvalidated { cell: *at, count: 1 },
                        );
                    }
                }
            }
        }

        if self.active_sheet == Some(id) {
            let next = index.min(self.sheets.len() - 1);
            self.active_sheet = Some(self.sheets[next].id());
        }
        log::debug!("removed sheet {name:?}");
        let previous = index.checked_sub(1).map(|i| self.sheets[i].id());
        self.record_change(SheetChange::Removed {
            sheet: id,
            name,
            previous,
        });
        Ok(report)
    }

    /// The sheet shown when the workbook opens.
    pub fn active_sheet(&self) -> Option<SheetId> {
        self.active_sheet
            .filter(|id| self.sheet(*id).is_some())
            .or_else(|| self.sheets.first().map(|s| s.id()))
    }

    pub fn set_active_sheet(&mut self, id: SheetId) -> Result<(), ModelError> {
        self.sheet_ref(id)?;
        self.active_sheet = Some(id);
        Ok(())
    }

    // ----- cells -----

    fn validate_value(&self, value: &CellValue) -> Result<(), ModelError> {
        match value {
            CellValue::SharedString(id) => self.shared_strings.resolve(*id).map(|_| ()),
            CellValue::Formula(formula) => match formula.array_range {
                Some(range) if !range.end.in_bounds() => {
                    Err(ModelError::OutOfBounds(format!("array range {range}")))
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn writable(&self, sheet: SheetId, cell: CellRef) -> Result<&Worksheet, ModelError> {
        if !cell.in_bounds() {
            return Err(ModelError::OutOfBounds(format!("cell {cell}")));
        }
        let ws = self.sheet_ref(sheet)?;
        ws.check_writable(cell)?;
        Ok(ws)
    }

    /// Store `value` at `cell`, keeping the cell's current style.
    pub fn set(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        value: impl Into<CellValue>,
    ) -> Result<(), ModelError> {
        let value = value.into();
        let style_id = self.writable(sheet, cell)?.style_id(cell);
        self.validate_value(&value)?;
        self.sheet_mut_ref(sheet)?
            .put_cell(cell, Cell::with_style(value, style_id));
        Ok(())
    }

    /// Store `value` with an explicit style id.
    pub fn set_styled(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        value: impl Into<CellValue>,
        style_id: u32,
    ) -> Result<(), ModelError> {
        let value = value.into();
        self.writable(sheet, cell)?;
        self.validate_value(&value)?;
        self.styles.resolve(style_id)?;
        self.sheet_mut_ref(sheet)?
            .put_cell(cell, Cell::with_style(value, style_id));
        Ok(())
    }

    /// Store text through the shared string table.
    pub fn set_string(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        text: impl Into<RichText>,
    ) -> Result<(), ModelError> {
        let style_id = self.writable(sheet, cell)?.style_id(cell);
        let id = self.shared_strings.intern(text.into());
        self.sheet_mut_ref(sheet)?
            .put_cell(cell, Cell::with_style(CellValue::SharedString(id), style_id));
        Ok(())
    }

    /// Store a date/time as a serial number, giving the cell a date format if it lacks one.
    pub fn set_datetime(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        value: NaiveDateTime,
    ) -> Result<(), ModelError> {
        let style_id = self.writable(sheet, cell)?.style_id(cell);
        let serial = self.date_system.to_serial(value).ok_or_else(|| {
            ModelError::OutOfBounds(format!("{value} is outside the workbook date system"))
        })?;
        let mut style = self.styles.resolve(style_id)?.clone();
        let style_id = if style.number_format.is_date() {
            style_id
        } else {
            let id = if value.num_seconds_from_midnight() == 0 {
                BUILTIN_DATE
            } else {
                BUILTIN_DATETIME
            };
            style.number_format = NumberFormat::Builtin(id);
            self.styles.intern(style)
        };
        self.sheet_mut_ref(sheet)?
            .put_cell(cell, Cell::with_style(CellValue::Number(serial), style_id));
        Ok(())
    }

    /// Value at `cell`; unset cells read as [`CellValue::Empty`].
    pub fn get(&self, sheet: SheetId, cell: CellRef) -> Result<&CellValue, ModelError> {
        Ok(self.sheet_ref(sheet)?.value(cell))
    }

    /// Text of a string cell (shared or inline), or the cached text of a formula.
    pub fn text(&self, sheet: SheetId, cell: CellRef) -> Result<Option<Cow<'_, str>>, ModelError> {
        Ok(match self.get(sheet, cell)? {
            CellValue::SharedString(id) => Some(self.shared_strings.resolve(*id)?.text()),
            CellValue::InlineString(text) => Some(text.text()),
            CellValue::Formula(formula) => match &formula.cached {
                Some(crate::value::CachedValue::Text(text)) => Some(Cow::Borrowed(text.as_str())),
                _ => None,
            },
            _ => None,
        })
    }

    /// A numeric cell with a date number format, converted through the workbook date system.
    pub fn datetime(
        &self,
        sheet: SheetId,
        cell: CellRef,
    ) -> Result<Option<NaiveDateTime>, ModelError> {
        let ws = self.sheet_ref(sheet)?;
        let Some(serial) = ws.value(cell).as_number() else {
            return Ok(None);
        };
        let style = self.styles.resolve(ws.style_id(cell))?;
        if !style.number_format.is_date() {
            return Ok(None);
        }
        Ok(self.date_system.from_serial(serial))
    }

    /// Clear the value at `cell`, keeping its style.
    pub fn clear(&mut self, sheet: SheetId, cell: CellRef) -> Result<(), ModelError> {
        let ws = self.sheet_mut_ref(sheet)?;
        if let Some(mut existing) = ws.take_cell(cell) {
            existing.value = CellValue::Empty;
            ws.put_cell(cell, existing);
        }
        Ok(())
    }

    // ----- styles -----

    /// Intern a style, checking that its named style exists.
    pub fn intern_style(&mut self, style: Style) -> Result<u32, ModelError> {
        if let Some(name) = &style.named_style {
            if self.named_style(name).is_none() && name != "Normal" {
                return Err(ModelError::NamedStyleNotFound(name.clone()));
            }
        }
        Ok(self.styles.intern(style))
    }

    pub fn cell_style(&self, sheet: SheetId, cell: CellRef) -> Result<&Style, ModelError> {
        let id = self.sheet_ref(sheet)?.style_id(cell);
        self.styles.resolve(id)
    }

    /// Style-only writes are allowed on every cell, merged or not.
    pub fn set_style_id(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        style_id: u32,
    ) -> Result<(), ModelError> {
        if !cell.in_bounds() {
            return Err(ModelError::OutOfBounds(format!("cell {cell}")));
        }
        self.styles.resolve(style_id)?;
        let ws = self.sheet_mut_ref(sheet)?;
        let value = ws.take_cell(cell).map(|c| c.value).unwrap_or_default();
        ws.put_cell(cell, Cell::with_style(value, style_id));
        Ok(())
    }

    pub fn set_style(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        style: Style,
    ) -> Result<u32, ModelError> {
        self.sheet_ref(sheet)?;
        let id = self.intern_style(style)?;
        self.set_style_id(sheet, cell, id)?;
        Ok(id)
    }

    /// Derive a new style from the cell's current one.
    pub fn update_style(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        f: impl FnOnce(&mut Style),
    ) -> Result<u32, ModelError> {
        let mut style = self.cell_style(sheet, cell)?.clone();
        f(&mut style);
        self.set_style(sheet, cell, style)
    }

    pub fn set_font(&mut self, sheet: SheetId, cell: CellRef, font: Font) -> Result<u32, ModelError> {
        self.update_style(sheet, cell, |s| s.font = font)
    }

    pub fn set_fill(&mut self, sheet: SheetId, cell: CellRef, fill: Fill) -> Result<u32, ModelError> {
        self.update_style(sheet, cell, |s| s.fill = fill)
    }

    pub fn set_border(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        border: Border,
    ) -> Result<u32, ModelError> {
        self.update_style(sheet, cell, |s| s.border = border)
    }

    pub fn set_alignment(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        alignment: Alignment,
    ) -> Result<u32, ModelError> {
        self.update_style(sheet, cell, |s| s.alignment = alignment)
    }

    pub fn set_number_format(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        format: NumberFormat,
    ) -> Result<u32, ModelError> {
        self.update_style(sheet, cell, |s| s.number_format = format)
    }

    pub fn set_protection(
        &mut self,
        sheet: SheetId,
        cell: CellRef,
        protection: Protection,
    ) -> Result<u32, ModelError> {
        self.update_style(sheet, cell, |s| s.protection = protection)
    }

    /// Default style for every cell of a column; `None` resets it.
    pub fn set_column_style(
        &mut self,
        sheet: SheetId,
        col: u32,
        style_id: Option<u32>,
    ) -> Result<(), ModelError> {
        if let Some(id) = style_id {
            self.styles.resolve(id)?;
        }
        if col >= crate::cell::EXCEL_MAX_COLS {
            return Err(ModelError::OutOfBounds(format!("column {col}")));
        }
        self.sheet_mut_ref(sheet)?.set_column_style(col, style_id);
        Ok(())
    }

    pub fn set_row_style(
        &mut self,
        sheet: SheetId,
        row: u32,
        style_id: Option<u32>,
    ) -> Result<(), ModelError> {
        if let Some(id) = style_id {
            self.styles.resolve(id)?;
        }
        if row >= crate::cell::EXCEL_MAX_ROWS {
            return Err(ModelError::OutOfBounds(format!("row {row}")));
        }
        self.sheet_mut_ref(sheet)?.set_row_style(row, style_id);
        Ok(())
    }

    pub fn add_named_style(&mut self, named: NamedStyle) -> Result<(), ModelError> {
        if self.named_style(&named.name).is_some() {
            return Err(ModelError::DuplicateNamedStyle(named.name));
        }
        self.named_styles.push(named);
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn named_style(&self, name: &str) -> Option<&NamedStyle> {
        self.named_styles
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
    }

    pub fn named_styles(&self) -> &[NamedStyle] {
        &self.named_styles
    }

    // ----- merges -----

    /// Merge `range`, clearing the values of every non-anchor cell.
    pub fn merge(&mut self, sheet: SheetId, range: Range) -> Result<(), ModelError> {
        self.sheet_mut_ref(sheet)?.merge(range)?;
        Ok(())
    }

    /// Remove the merge exactly matching `range`.
    pub fn unmerge(&mut self, sheet: SheetId, range: Range) -> Result<bool, ModelError> {
        Ok(self.sheet_mut_ref(sheet)?.unmerge(&range))
    }

    pub fn merged_regions(&self, sheet: SheetId) -> Result<&MergedRegions, ModelError> {
        Ok(self.sheet_ref(sheet)?.merged_regions())
    }

    pub fn merge_containing(
        &self,
        sheet: SheetId,
        cell: CellRef,
    ) -> Result<Option<Range>, ModelError> {
        Ok(self.sheet_ref(sheet)?.merge_containing(cell))
    }

    // ----- defined names -----

    pub fn add_defined_name(&mut self, name: DefinedName) -> Result<(), ModelError> {
        validate_defined_name(&name.name).map_err(|reason| ModelError::InvalidDefinedName {
            name: name.name.clone(),
            reason,
        })?;
        if let NameScope::Sheet(id) = name.scope {
            self.sheet_ref(id)?;
        }
        if self.defined_name(&name.name, name.scope).is_some() {
            return Err(ModelError::DuplicateDefinedName(name.name));
        }
        match &name.target {
            NameTarget::Ranges(targets) => {
                if targets.is_empty() {
                    return Err(ModelError::InvalidDefinedName {
                        name: name.name.clone(),
                        reason: "no target ranges".to_string(),
                    });
                }
                if let Some(missing) = targets.iter().find(|t| self.sheet(t.sheet).is_none()) {
                    return Err(ModelError::DanglingNameTarget {
                        name: name.name.clone(),
                        sheet: missing.sheet,
                    });
                }
                if let Some(bad) = targets.iter().find(|t| !t.range.end.in_bounds()) {
                    return Err(ModelError::OutOfBounds(format!("name target {}", bad.range)));
                }
            }
            NameTarget::Formula(formula) if formula.trim().is_empty() => {
                return Err(ModelError::InvalidDefinedName {
                    name: name.name.clone(),
                    reason: "empty formula".to_string(),
                });
            }
            NameTarget::Formula(_) => {}
        }
        self.defined_names.push(name);
        Ok(())
    }

    pub fn defined_name(&self, name: &str, scope: NameScope) -> Option<&DefinedName> {
        self.defined_names.iter().find(|n| n.matches(name, scope))
    }

    pub fn defined_names(&self) -> &[DefinedName] {
        &self.defined_names
    }

    pub(crate) fn defined_names_mut(&mut self) -> &mut Vec<DefinedName> {
        &mut self.defined_names
    }

    pub fn remove_defined_name(
        &mut self,
        name: &str,
        scope: NameScope,
    ) -> Result<DefinedName, ModelError> {
        let pos = self
            .defined_names
            .iter()
            .position(|n| n.matches(name, scope))
            .ok_or_else(|| ModelError::DefinedNameNotFound(name.to_string()))?;
        Ok(self.defined_names.remove(pos))
    }

    // ----- tables -----

    /// Every style id referenced by a cell, row or column (always includes `0`).
    pub fn used_style_ids(&self) -> BTreeSet<u32> {
        let mut live = BTreeSet::from([0]);
        for ws in &self.sheets {
            live.extend(ws.cells().map(|(_, c)| c.style_id));
            live.extend(ws.columns().filter_map(|(_, c)| c.style_id));
            live.extend(ws.rows().filter_map(|(_, r)| r.style_id));
        }
        live
    }

    /// Every shared-string id referenced by a cell.
    pub fn used_string_ids(&self) -> BTreeSet<u32> {
        self.sheets
            .iter()
            .flat_map(|ws| ws.cells())
            .filter_map(|(_, c)| match c.value {
                CellValue::SharedString(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Drop unreferenced styles and strings and renumber every reference.
    pub fn compact(&mut self) -> Compaction {
        let styles = self.styles.compact(&self.used_style_ids());
        let strings = self.shared_strings.compact(&self.used_string_ids());
        for ws in &mut self.sheets {
            for (_, cell) in ws.cells_mut().iter_mut() {
                cell.style_id = styles.get(cell.style_id).unwrap_or(0);
                if let CellValue::SharedString(id) = &mut cell.value {
                    // Live ids always survive compaction.
                    *id = strings.get(*id).unwrap_or(*id);
                }
            }
            for (_, props) in ws.columns_mut().iter_mut() {
                props.style_id = props.style_id.and_then(|id| styles.get(id));
            }
            for (_, props) in ws.rows_mut().iter_mut() {
                props.style_id = props.style_id.and_then(|id| styles.get(id));
            }
        }
        log::debug!(
            "compacted tables: {} style(s), {} string(s) retained",
            styles.retained(),
            strings.retained()
        );
        Compaction { styles, strings }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::address::SheetRange;

    fn book() -> (Workbook, SheetId) {
        let mut wb = Workbook::new();
        let id = wb.add_sheet("Sheet1").unwrap();
        (wb, id)
    }

    #[test]
    fn sheet_names_are_unique_case_insensitively() {
        let (mut wb, _) = book();
        assert_eq!(
            wb.add_sheet("sheet1"),
            Err(ModelError::DuplicateSheetName("sheet1".to_string()))
        );
        assert!(matches!(
            wb.add_sheet("a/b"),
            Err(ModelError::InvalidSheetName { .. })
        ));
    }

    #[test]
    fn sheets_can_be_inserted_moved_and_listed() {
        let (mut wb, first) = book();
        let third = wb.add_sheet("Third").unwrap();
        let second = wb.insert_sheet(1, "Second").unwrap();
        assert_eq!(wb.sheet_names(), vec!["Sheet1", "Second", "Third"]);
        wb.move_sheet(third, 0).unwrap();
        assert_eq!(wb.sheet_names(), vec!["Third", "Sheet1", "Second"]);
        assert_eq!(wb.sheet_index(first), Some(1));
        assert_eq!(wb.sheet_index(second), Some(2));
        assert!(wb.contains_sheet("THIRD"));
    }

    #[test]
    fn set_keeps_the_existing_style() {
        let (mut wb, s) = book();
        let at = CellRef::new(0, 0);
        let style = wb.set_number_format(s, at, NumberFormat::Builtin(10)).unwrap();
        wb.set(s, at, 0.5).unwrap();
        assert_eq!(wb.sheet(s).unwrap().style_id(at), style);
        assert_eq!(wb.get(s, at).unwrap(), &CellValue::Number(0.5));
    }

    #[test]
    fn dangling_string_and_style_ids_are_rejected() {
        let (mut wb, s) = book();
        let at = CellRef::new(0, 0);
        assert_eq!(
            wb.set(s, at, CellValue::SharedString(3)),
            Err(ModelError::InvalidStringIndex(3))
        );
        assert_eq!(
            wb.set_styled(s, at, 1.0, 9),
            Err(ModelError::InvalidStyleIndex(9))
        );
        assert_eq!(wb.sheet(s).unwrap().cell_count(), 0);
    }

    #[test]
    fn set_string_interns_once() {
        let (mut wb, s) = book();
        wb.set_string(s, CellRef::new(0, 0), "Q1").unwrap();
        wb.set_string(s, CellRef::new(1, 0), "Q1").unwrap();
        assert_eq!(wb.shared_strings().len(), 1);
        assert_eq!(
            wb.text(s, CellRef::new(1, 0)).unwrap().as_deref(),
            Some("Q1")
        );
    }

    #[test]
    fn datetimes_get_a_date_format() {
        let (mut wb, s) = book();
        let at = CellRef::new(0, 0);
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        wb.set_datetime(s, at, dt).unwrap();
        assert_eq!(
            wb.cell_style(s, at).unwrap().number_format,
            NumberFormat::Builtin(BUILTIN_DATETIME)
        );
        assert_eq!(wb.datetime(s, at).unwrap(), Some(dt));

        wb.set(s, CellRef::new(0, 1), 45352.0).unwrap();
        assert_eq!(wb.datetime(s, CellRef::new(0, 1)).unwrap(), None);
    }

    #[test]
    fn update_style_derives_from_the_current_style() {
        let (mut wb, s) = book();
        let at = CellRef::new(2, 2);
        wb.update_style(s, at, |st| st.font.bold = true).unwrap();
        let id = wb.update_style(s, at, |st| st.font.italic = true).unwrap();
        let style = wb.styles().resolve(id).unwrap();
        assert!(style.font.bold && style.font.italic);
        assert_eq!(
            wb.set_style(
                s,
                at,
                Style {
                    named_style: Some("Heading 9".to_string()),
                    ..Style::default()
                }
            ),
            Err(ModelError::NamedStyleNotFound("Heading 9".to_string()))
        );
    }

    #[test]
    fn style_writes_are_allowed_inside_merges() {
        let (mut wb, s) = book();
        wb.merge(s, Range::from_coords(0, 0, 1, 1)).unwrap();
        assert!(wb
            .update_style(s, CellRef::new(1, 1), |st| st.font.bold = true)
            .is_ok());
        assert!(matches!(
            wb.set(s, CellRef::new(1, 1), 1.0),
            Err(ModelError::MergedCellWriteConflict { .. })
        ));
    }

    #[test]
    fn defined_names_are_validated() {
        let (mut wb, s) = book();
        let target = SheetRange::new(s, Range::from_coords(0, 0, 9, 0));
        wb.add_defined_name(DefinedName::ranges("Sales", vec![target]))
            .unwrap();
        assert_eq!(
            wb.add_defined_name(DefinedName::ranges("SALES", vec![target])),
            Err(ModelError::DuplicateDefinedName("SALES".to_string()))
        );
        assert!(wb
            .add_defined_name(DefinedName::ranges("Sales", vec![target]).with_scope(NameScope::Sheet(s)))
            .is_ok());
        assert_eq!(
            wb.add_defined_name(DefinedName::ranges(
                "Other",
                vec![SheetRange::new(42, Range::single(CellRef::new(0, 0)))]
            )),
            Err(ModelError::DanglingNameTarget {
                name: "Other".to_string(),
                sheet: 42
            })
        );
        let removed = wb.remove_defined_name("sales", NameScope::Workbook).unwrap();
        assert_eq!(removed.name, "Sales");
        assert_eq!(wb.defined_names().len(), 1);
    }

    #[test]
    fn rename_rewrites_qualified_references() {
        let (mut wb, s) = book();
        let other = wb.add_sheet("Summary").unwrap();
        wb.set(other, CellRef::new(0, 0), crate::value::Formula::new("=Sheet1!A1*2"))
            .unwrap();
        wb.add_defined_name(DefinedName::formula("Twice", "Sheet1!$A$1*2"))
            .unwrap();
        wb.rename_sheet(s, "Q1 Data").unwrap();
        assert_eq!(
            wb.get(other, CellRef::new(0, 0)).unwrap().as_formula().unwrap().expr,
            "'Q1 Data'!A1*2"
        );
        assert_eq!(
            wb.defined_names()[0].target,
            NameTarget::Formula("'Q1 Data'!$A$1*2".to_string())
        );
    }

    #[test]
    fn copy_sheet_numbers_the_name_and_copies_scoped_names() {
        let (mut wb, s) = book();
        wb.set(s, CellRef::new(0, 0), 1.0).unwrap();
        wb.merge(s, Range::from_coords(2, 0, 2, 3)).unwrap();
        wb.add_defined_name(
            DefinedName::ranges("Local", vec![SheetRange::new(s, Range::from_coords(0, 0, 3, 0))])
                .with_scope(NameScope::Sheet(s)),
        )
        .unwrap();
        let copy = wb.copy_sheet(s).unwrap();
        let again = wb.copy_sheet(s).unwrap();
        assert_eq!(wb.sheet_names(), vec!["Sheet1", "Sheet1 (3)", "Sheet1 (2)"]);
        let copied = wb.sheet(copy).unwrap();
        assert_eq!(copied.value(CellRef::new(0, 0)), &CellValue::Number(1.0));
        assert_eq!(copied.merged_regions().len(), 1);
        let local = wb.defined_name("Local", NameScope::Sheet(copy)).unwrap();
        assert_eq!(
            local.target,
            NameTarget::Ranges(vec![SheetRange::new(copy, Range::from_coords(0, 0, 3, 0))])
        );
        assert!(wb.defined_name("Local", NameScope::Sheet(again)).is_some());
    }

    #[test]
    fn remove_sheet_invalidates_references() {
        let (mut wb, s) = book();
        let data = wb.add_sheet("Data").unwrap();
        wb.set(s, CellRef::new(0, 0), crate::value::Formula::new("Data!A1+1"))
            .unwrap();
        wb.add_defined_name(DefinedName::ranges(
            "OnData",
            vec![SheetRange::new(data, Range::single(CellRef::new(0, 0)))],
        ))
        .unwrap();
        wb.set_active_sheet(data).unwrap();

        let report = wb.remove_sheet(data).unwrap();
        assert_eq!(
            wb.get(s, CellRef::new(0, 0)).unwrap().as_formula().unwrap().expr,
            "#REF!+1"
        );
        assert!(wb.defined_names().is_empty());
        assert!(!report.is_lossless());
        assert_eq!(wb.active_sheet(), Some(s));
        assert_eq!(wb.remove_sheet(s), Err(ModelError::CannotRemoveLastSheet));
    }

    #[test]
    fn compact_drops_unused_entries_and_remaps() {
        let (mut wb, s) = book();
        let at = CellRef::new(0, 0);
        wb.set_string(s, at, "old").unwrap();
        wb.update_style(s, at, |st| st.font.bold = true).unwrap();
        wb.set_string(s, at, "new").unwrap();
        let italic = wb.update_style(s, at, |st| st.font.italic = true).unwrap();
        assert_eq!(italic, 2);

        let compaction = wb.compact();
        assert_eq!(wb.shared_strings().len(), 1);
        assert_eq!(wb.styles().len(), 2);
        assert_eq!(compaction.styles.get(2), Some(1));
        assert_eq!(compaction.styles.get(1), None);
        assert_eq!(wb.get(s, at).unwrap(), &CellValue::SharedString(0));
        assert_eq!(wb.sheet(s).unwrap().style_id(at), 1);
        assert_eq!(wb.text(s, at).unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn snapshots_round_trip_through_serde() {
        let (mut wb, s) = book();
        wb.set_string(s, CellRef::new(0, 0), "Q1").unwrap();
        wb.set_font(
            s,
            CellRef::new(0, 0),
            Font {
                bold: true,
                ..Font::body()
            },
        )
        .unwrap();
        let json = serde_json::to_string(&wb).unwrap();
        let back: Workbook = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wb);
    }
}

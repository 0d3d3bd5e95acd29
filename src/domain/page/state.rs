//! Mutable model of one open form.
//!
//! A `PageState` is created when a form-open response is parsed, mutated in
//! place by the reducer for every subsequent change message, and discarded
//! when the page closes or its connection is torn down.
//!
//! # Ownership
//!
//! Exactly one reducer driver owns a `PageState`. It is never shared across
//! sessions and is not designed for concurrent mutation; callers that need a
//! consistent snapshot must not retain read references across a reduction.
//!
//! # Invariants
//!
//! - Every bookmark in `row_order` appears exactly once as a key in `rows`,
//!   and vice versa.
//! - `total_row_count`, when present, is >= the loaded row count.
//! - A column's index is unique within its repeater and is the only stable
//!   way to bind an inbound cell update before the control path is known.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::protocol::tags::handler;

/// Overall status of an open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Ready,
    Loading,
    Saving,
    Error,
}

/// One editable field on the page.
#[derive(Debug, Clone)]
pub struct FieldState {
    pub caption: String,
    pub control_path: Option<String>,
    pub value: Option<Value>,
    pub validation_error: Option<String>,
}

/// One invokable action on the page.
#[derive(Debug, Clone)]
pub struct ActionState {
    pub caption: String,
    pub control_path: Option<String>,
    pub enabled: bool,
}

/// One factbox (child part) attached to the page.
#[derive(Debug, Clone)]
pub struct FactboxState {
    pub caption: String,
    pub form_id: Option<String>,
    /// Child loads are best-effort; a factbox can stay unloaded.
    pub loaded: bool,
}

/// One grid column.
///
/// The control path starts undefined and is filled in later by a separate
/// enrichment message; columns are usable, in reduced form, before that
/// arrives.
#[derive(Debug, Clone)]
pub struct ColumnState {
    pub caption: String,
    pub design_name: String,
    pub control_path: Option<String>,
    pub filter_path: Option<String>,
    /// Correlates server-sent cell arrays; the server addresses cells by
    /// index, not by name.
    pub index: usize,
}

/// One grid row, keyed by its server-assigned bookmark.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowState {
    pub bookmark: String,
    /// Cell values keyed by column design name.
    pub values: HashMap<String, Value>,
    pub is_new: bool,
    pub is_modified: bool,
    pub validation_errors: HashMap<String, String>,
}

/// Result of a tri-state row lookup.
///
/// A bookmark can be loaded, not yet transmitted for a virtualized grid, or
/// genuinely absent. Callers must branch on all three.
#[derive(Debug, PartialEq)]
pub enum RowLookup<'a> {
    Loaded(&'a RowState),
    /// Absent, but the grid is virtualized and holds more rows server-side.
    NotLoaded,
    /// Absent and the grid is fully loaded.
    Missing,
}

/// One grid/subpage on the page.
#[derive(Debug, Clone)]
pub struct RepeaterState {
    pub name: String,
    pub control_path: String,
    pub form_id: String,
    pub columns: HashMap<String, ColumnState>,
    /// Display order of column design names, independent of map iteration.
    pub column_order: Vec<String>,
    rows: HashMap<String, RowState>,
    /// Display order of bookmarks; always a permutation of `rows`' key set.
    row_order: Vec<String>,
    /// Loaded viewport bounds, when the server reported them.
    pub viewport: Option<(usize, usize)>,
    pub cursor_bookmark: Option<String>,
    /// Server's full row count; may exceed the loaded row count when the
    /// grid is virtualized.
    pub total_row_count: Option<usize>,
    pub dirty: bool,
    pending_operations: u32,
    pub last_error: Option<String>,
}

impl RepeaterState {
    /// Creates an empty repeater with the given identity.
    pub fn new(
        name: impl Into<String>,
        control_path: impl Into<String>,
        form_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            control_path: control_path.into(),
            form_id: form_id.into(),
            columns: HashMap::new(),
            column_order: Vec::new(),
            rows: HashMap::new(),
            row_order: Vec::new(),
            viewport: None,
            cursor_bookmark: None,
            total_row_count: None,
            dirty: false,
            pending_operations: 0,
            last_error: None,
        }
    }

    /// Registers a column, keeping the design-name order list in sync.
    pub fn add_column(&mut self, column: ColumnState) {
        let name = column.design_name.clone();
        if self.columns.insert(name.clone(), column).is_none() {
            self.column_order.push(name);
        }
    }

    /// Resolves a column by its server index.
    pub fn column_by_index(&self, index: usize) -> Option<&ColumnState> {
        self.columns.values().find(|c| c.index == index)
    }

    /// Mutable variant of [`Self::column_by_index`].
    pub(crate) fn column_by_index_mut(&mut self, index: usize) -> Option<&mut ColumnState> {
        self.columns.values_mut().find(|c| c.index == index)
    }

    /// Loaded rows, keyed by bookmark.
    pub fn rows(&self) -> &HashMap<String, RowState> {
        &self.rows
    }

    /// Display order of bookmarks.
    pub fn row_order(&self) -> &[String] {
        &self.row_order
    }

    /// Full row count: the server's total when known, otherwise the number
    /// of loaded rows. Never read `rows().len()` directly for grid size.
    pub fn row_count(&self) -> usize {
        self.total_row_count.unwrap_or(self.rows.len())
    }

    /// Tri-state row lookup, see [`RowLookup`].
    pub fn get_row(&self, bookmark: &str) -> RowLookup<'_> {
        if let Some(row) = self.rows.get(bookmark) {
            return RowLookup::Loaded(row);
        }
        match self.total_row_count {
            Some(total) if total > self.rows.len() => RowLookup::NotLoaded,
            _ => RowLookup::Missing,
        }
    }

    /// Number of operations currently in flight against this grid.
    pub fn pending_operations(&self) -> u32 {
        self.pending_operations
    }

    /// Marks one more in-flight operation. Operations can overlap, hence a
    /// counter rather than a busy flag.
    pub fn begin_operation(&mut self) {
        self.pending_operations += 1;
        self.dirty = true;
    }

    /// Completes one in-flight operation, floored at zero; the dirty flag
    /// clears once nothing is pending.
    pub(crate) fn complete_operation(&mut self) {
        self.pending_operations = self.pending_operations.saturating_sub(1);
        if self.pending_operations == 0 {
            self.dirty = false;
        }
    }

    /// Drops all in-flight expectations (an unexpected dialog invalidates
    /// them wholesale).
    pub(crate) fn clear_pending(&mut self) {
        self.pending_operations = 0;
        self.dirty = false;
    }

    /// Inserts an empty row at `index` in display order. No-op when the
    /// bookmark is already present.
    pub(crate) fn insert_row(&mut self, bookmark: &str, index: usize) -> &mut RowState {
        if !self.rows.contains_key(bookmark) {
            let at = index.min(self.row_order.len());
            self.row_order.insert(at, bookmark.to_string());
            self.rows.insert(
                bookmark.to_string(),
                RowState {
                    bookmark: bookmark.to_string(),
                    ..RowState::default()
                },
            );
        }
        self.rows.get_mut(bookmark).expect("row just ensured")
    }

    pub(crate) fn row_mut(&mut self, bookmark: &str) -> Option<&mut RowState> {
        self.rows.get_mut(bookmark)
    }

    /// Removes a bookmark from both the map and the order list.
    pub(crate) fn remove_row(&mut self, bookmark: &str) -> Option<RowState> {
        let removed = self.rows.remove(bookmark);
        if removed.is_some() {
            self.row_order.retain(|b| b != bookmark);
        }
        removed
    }

    /// Clears all rows and order entries.
    pub(crate) fn flush_rows(&mut self) {
        self.rows.clear();
        self.row_order.clear();
    }

    /// Moves a row from `old` to `new` in both structures, preserving the
    /// ordinal position. Temporary bookmarks become permanent this way after
    /// a new row is saved.
    pub(crate) fn remap_bookmark(&mut self, old: &str, new: &str) {
        if old == new || !self.rows.contains_key(old) {
            return;
        }
        // Remapping onto a bookmark that is already loaded collapses the
        // two rows; the already-loaded one wins.
        if self.rows.contains_key(new) {
            self.remove_row(old);
            return;
        }
        if let Some(mut row) = self.rows.remove(old) {
            row.bookmark = new.to_string();
            self.rows.insert(new.to_string(), row);
        }
        for slot in self.row_order.iter_mut() {
            if slot == old {
                *slot = new.to_string();
            }
        }
    }
}

/// Root aggregate for one open form.
#[derive(Debug, Clone)]
pub struct PageState {
    pub page_id: String,
    pub page_kind: String,
    pub caption: String,
    pub form_id: String,
    pub fields: HashMap<String, FieldState>,
    pub actions: HashMap<String, ActionState>,
    pub repeaters: HashMap<String, RepeaterState>,
    pub factboxes: HashMap<String, FactboxState>,
    pub status: PageStatus,
    pub global_errors: Vec<String>,
}

impl PageState {
    /// Builds a page model from a form-open handler record.
    ///
    /// Returns `None` when the record is not a `FormToShow` or carries no
    /// form id.
    pub fn from_form_open(record: &Value) -> Option<Self> {
        if record.get(handler::TYPE).and_then(Value::as_str) != Some(handler::FORM_TO_SHOW) {
            return None;
        }
        let param = record
            .get(handler::PARAMETERS)
            .and_then(Value::as_array)
            .and_then(|p| p.first())?;
        let form_id = param.get("formId").and_then(Value::as_str)?.to_string();

        let mut page = Self {
            page_id: str_or_empty(param, "pageId"),
            page_kind: str_or_empty(param, "pageKind"),
            caption: str_or_empty(param, "caption"),
            form_id,
            fields: HashMap::new(),
            actions: HashMap::new(),
            repeaters: HashMap::new(),
            factboxes: HashMap::new(),
            status: PageStatus::Loading,
            global_errors: Vec::new(),
        };

        if let Some(controls) = param.get("controls").and_then(Value::as_array) {
            for control in controls {
                page.add_control(control);
            }
        }
        page.status = PageStatus::Ready;
        Some(page)
    }

    fn add_control(&mut self, control: &Value) {
        let Some(name) = control.get("name").and_then(Value::as_str) else {
            return;
        };
        match control.get("kind").and_then(Value::as_str) {
            Some("field") => {
                self.fields.insert(
                    name.to_string(),
                    FieldState {
                        caption: str_or_empty(control, "caption"),
                        control_path: opt_str(control, "controlPath"),
                        value: control.get("value").cloned(),
                        validation_error: None,
                    },
                );
            }
            Some("action") => {
                self.actions.insert(
                    name.to_string(),
                    ActionState {
                        caption: str_or_empty(control, "caption"),
                        control_path: opt_str(control, "controlPath"),
                        enabled: control
                            .get("enabled")
                            .and_then(Value::as_bool)
                            .unwrap_or(true),
                    },
                );
            }
            Some("repeater") => {
                let mut repeater = RepeaterState::new(
                    name,
                    str_or_empty(control, "controlPath"),
                    opt_str(control, "formId").unwrap_or_else(|| self.form_id.clone()),
                );
                if let Some(columns) = control.get("columns").and_then(Value::as_array) {
                    for column in columns {
                        let Some(design_name) = column.get("designName").and_then(Value::as_str)
                        else {
                            continue;
                        };
                        repeater.add_column(ColumnState {
                            caption: str_or_empty(column, "caption"),
                            design_name: design_name.to_string(),
                            control_path: opt_str(column, "controlPath"),
                            filter_path: opt_str(column, "filterPath"),
                            index: column
                                .get("index")
                                .and_then(Value::as_u64)
                                .unwrap_or_default() as usize,
                        });
                    }
                }
                self.repeaters.insert(name.to_string(), repeater);
            }
            Some("factbox") => {
                self.factboxes.insert(
                    name.to_string(),
                    FactboxState {
                        caption: str_or_empty(control, "caption"),
                        form_id: opt_str(control, "formId"),
                        loaded: false,
                    },
                );
            }
            _ => {}
        }
    }

    /// Finds the repeater owning the given control path.
    pub(crate) fn repeater_by_control_path_mut(
        &mut self,
        control_path: &str,
    ) -> Option<&mut RepeaterState> {
        self.repeaters
            .values_mut()
            .find(|r| r.control_path == control_path)
    }

    /// Finds a repeater by its child form id.
    pub(crate) fn repeater_by_form_id_mut(&mut self, form_id: &str) -> Option<&mut RepeaterState> {
        self.repeaters.values_mut().find(|r| r.form_id == form_id)
    }
}

fn str_or_empty(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn opt_str(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

//! Folds server-sent change records into a [`PageState`].
//!
//! The reducer mutates the page passed to it, never copies. It dispatches on
//! the change tag of each record; unknown tags are logged and ignored so a
//! new server build cannot mis-bind into existing state.

use serde_json::Value;

use crate::domain::page::state::{PageState, PageStatus, RepeaterState};
use crate::domain::protocol::tags::{change, handler, row};

/// Where a validation failure applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationScope {
    /// Whole page.
    Page,
    /// One grid.
    Repeater { name: String },
    /// One field of one row in one grid.
    Field {
        repeater: String,
        bookmark: String,
        field: String,
    },
}

/// Applies an ordered list of raw handler records to the page, in order.
///
/// This is the entry point the driver calls with the `RawHandlers` payload
/// of one inbound message.
pub fn apply_records(page: &mut PageState, records: &[Value]) {
    for record in records {
        if record.get(handler::TYPE).and_then(Value::as_str) == Some(handler::FORM_UPDATE) {
            apply_form_update(page, record);
        }
    }
}

fn apply_form_update(page: &mut PageState, record: &Value) {
    let Some(changes) = record.get("changes").and_then(Value::as_array) else {
        return;
    };
    for ch in changes {
        apply_change(page, ch);
    }
}

fn apply_change(page: &mut PageState, ch: &Value) {
    match ch.get(change::TAG).and_then(Value::as_str) {
        Some(change::DATA_REFRESH) => apply_data_refresh(page, ch),
        Some(change::REPEATER_COLUMN_CONTROL) => apply_column_enrichment(page, ch),
        Some(change::CURSOR_MOVE) => apply_cursor_move(page, ch),
        Some(change::VIEWPORT_CHANGE) => apply_viewport_change(page, ch),
        Some(tag @ change::PROPERTY_CHANGES) | Some(tag @ change::CALLBACK_RESPONSE) => {
            // Reserved extension points.
            tracing::debug!(tag, "unhandled change tag");
        }
        Some(other) => {
            tracing::debug!(tag = other, "unknown change tag, ignoring");
        }
        None => {
            tracing::debug!("change without tag, ignoring");
        }
    }
}

/// Row-level deltas for one grid, addressed by control path.
fn apply_data_refresh(page: &mut PageState, ch: &Value) {
    let Some(control_path) = ch.get("controlPath").and_then(Value::as_str) else {
        tracing::debug!("data refresh without controlPath, ignoring");
        return;
    };
    let Some(repeater) = page.repeater_by_control_path_mut(control_path) else {
        tracing::debug!(control_path, "data refresh for unknown repeater, ignoring");
        return;
    };

    if let Some(rows) = ch.get("changes").and_then(Value::as_array) {
        for row_change in rows {
            apply_row_change(repeater, row_change);
        }
    }

    // One grid refresh completes one in-flight operation.
    repeater.complete_operation();
}

fn apply_row_change(repeater: &mut RepeaterState, row_change: &Value) {
    match row_change.get(row::TAG).and_then(Value::as_str) {
        // The server reuses the "updated" tag for initial population, so
        // inserts and updates share one upsert path.
        Some(row::INSERTED) | Some(row::UPDATED) => upsert_row(repeater, row_change),
        Some(row::DELETED) => {
            if let Some(bookmark) = row_change.get("bookmark").and_then(Value::as_str) {
                repeater.remove_row(bookmark);
            }
        }
        Some(row::FLUSHED) => repeater.flush_rows(),
        other => {
            tracing::debug!(tag = ?other, "unknown row change tag, ignoring");
        }
    }
}

/// Single upsert path for inserts and updates.
///
/// Steps: remap the old bookmark when the row already lives under it, ensure
/// the row exists (splicing new bookmarks at the server-given index), then
/// merge cell values by resolving inbound column indices. Later partial
/// updates must not erase previously known cells, so the row is merged into,
/// never replaced.
fn upsert_row(repeater: &mut RepeaterState, row_change: &Value) {
    let Some(bookmark) = row_change.get("bookmark").and_then(Value::as_str) else {
        tracing::debug!("row change without bookmark, ignoring");
        return;
    };

    if let Some(old) = row_change.get("oldBookmark").and_then(Value::as_str) {
        repeater.remap_bookmark(old, bookmark);
    }

    let index = row_change
        .get("index")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;
    let is_new = !repeater.rows().contains_key(bookmark);
    if is_new {
        repeater.insert_row(bookmark, index);
    }

    let Some(cells) = row_change.get("cells").and_then(Value::as_object) else {
        return;
    };

    // Resolve inbound column indices to design names first; the borrow on
    // columns must end before the row is mutated.
    let resolved: Vec<(String, Value)> = cells
        .iter()
        .filter_map(|(key, value)| {
            let idx: usize = key.parse().ok()?;
            match repeater.column_by_index(idx) {
                Some(column) => Some((column.design_name.clone(), value.clone())),
                None => {
                    tracing::debug!(index = idx, "cell for unknown column index, skipping");
                    None
                }
            }
        })
        .collect();

    if let Some(row_state) = repeater.row_mut(bookmark) {
        if is_new {
            row_state.is_new = true;
        } else {
            row_state.is_modified = true;
            if row_change.get("oldBookmark").is_some() {
                // Temporary bookmark became permanent: the row was saved.
                row_state.is_new = false;
            }
        }
        for (name, value) in resolved {
            row_state.values.insert(name, value);
        }
    }
}

/// Progressive column enrichment: a grid is usable immediately after open
/// with columns lacking control paths and gains them as these arrive.
/// Re-applying the same enrichment is idempotent.
fn apply_column_enrichment(page: &mut PageState, ch: &Value) {
    let Some(form_id) = ch.get("formId").and_then(Value::as_str) else {
        return;
    };
    let Some(index) = ch.get("index").and_then(Value::as_u64) else {
        return;
    };
    let Some(repeater) = page.repeater_by_form_id_mut(form_id) else {
        tracing::debug!(form_id, "column enrichment for unknown repeater, ignoring");
        return;
    };
    let Some(column) = repeater.column_by_index_mut(index as usize) else {
        tracing::debug!(form_id, index, "column enrichment for unknown index, ignoring");
        return;
    };

    if column.control_path.is_none() {
        column.control_path = ch
            .get("controlPath")
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    if column.filter_path.is_none() {
        column.filter_path = ch
            .get("filterPath")
            .and_then(Value::as_str)
            .map(str::to_string);
    }
}

fn apply_cursor_move(page: &mut PageState, ch: &Value) {
    let Some(name) = ch.get("name").and_then(Value::as_str) else {
        return;
    };
    let Some(repeater) = page.repeaters.get_mut(name) else {
        tracing::debug!(name, "cursor move for unknown repeater, ignoring");
        return;
    };
    repeater.cursor_bookmark = ch
        .get("bookmark")
        .and_then(Value::as_str)
        .map(str::to_string);
}

fn apply_viewport_change(page: &mut PageState, ch: &Value) {
    let Some(name) = ch.get("name").and_then(Value::as_str) else {
        return;
    };
    let Some(repeater) = page.repeaters.get_mut(name) else {
        tracing::debug!(name, "viewport change for unknown repeater, ignoring");
        return;
    };

    let from = ch.get("from").and_then(Value::as_u64);
    let to = ch.get("to").and_then(Value::as_u64);
    if let (Some(from), Some(to)) = (from, to) {
        repeater.viewport = Some((from as usize, to as usize));
    }
    if let Some(total) = ch.get("totalRowCount").and_then(Value::as_u64) {
        repeater.total_row_count = Some(total as usize);
    }
}

/// Records an out-of-band validation failure at the given scope.
pub fn apply_validation_error(page: &mut PageState, scope: ValidationScope, message: &str) {
    match scope {
        ValidationScope::Page => {
            page.global_errors.push(message.to_string());
        }
        ValidationScope::Repeater { name } => {
            if let Some(repeater) = page.repeaters.get_mut(&name) {
                repeater.last_error = Some(message.to_string());
                repeater.clear_pending();
            } else {
                tracing::debug!(name, "validation error for unknown repeater");
                page.global_errors.push(message.to_string());
            }
        }
        ValidationScope::Field {
            repeater,
            bookmark,
            field,
        } => {
            if let Some(rep) = page.repeaters.get_mut(&repeater) {
                if let Some(row_state) = rep.row_mut(&bookmark) {
                    row_state
                        .validation_errors
                        .insert(field, message.to_string());
                    return;
                }
            }
            tracing::debug!(repeater, bookmark, "validation error for unknown row");
            page.global_errors.push(message.to_string());
        }
    }
}

/// Records an unexpected server dialog: the page goes into error state and
/// every in-flight expectation is dropped.
pub fn apply_dialog_message(page: &mut PageState, text: &str) {
    page.global_errors.push(text.to_string());
    page.status = PageStatus::Error;
    for repeater in page.repeaters.values_mut() {
        repeater.clear_pending();
    }
}

//! Page model and reducer for one open form.

pub mod reducer;
pub mod state;

pub use reducer::{apply_dialog_message, apply_records, apply_validation_error, ValidationScope};
pub use state::{
    ActionState, ColumnState, FactboxState, FieldState, PageState, PageStatus, RepeaterState,
    RowLookup, RowState,
};

//! Typed events produced by the protocol adapter.
//!
//! One `HandlerEvent` is produced per logical fact; a single inbound wire
//! message may yield many events. Every classified case carries the original
//! untyped record so callers can fall back to inspecting fields the
//! classification does not surface.

use serde_json::Value;

/// Subtype of a server-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient message shown to the user.
    Message,
    /// Blocking error dialog.
    Dialog,
}

/// Subtype of an interactive dialog prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Confirm,
    YesNo,
}

/// Closed set of events the adapter can emit.
#[derive(Debug, Clone)]
pub enum HandlerEvent {
    /// Envelope-level acknowledgement: the server's sequence counter and,
    /// when reported, the set of currently open form ids.
    Message {
        sequence: i64,
        open_forms: Option<Vec<String>>,
    },

    /// The full decompressed record list for one inbound message, before
    /// classification. Emitted ahead of any per-record event. `sequence` is
    /// the envelope's own counter, `-1` when the envelope carried none, so
    /// waiters can tell a fresh response from a replayed burst.
    RawHandlers { sequence: i64, records: Vec<Value> },

    /// The server instructs the client to show a form.
    FormToShow {
        form_id: String,
        caption: String,
        raw: Value,
    },

    /// The server instructs the client to show a dialog.
    DialogToShow {
        dialog_id: String,
        caption: String,
        modal: bool,
        task_dialog: bool,
        /// Form and control the dialog originated from, when reported.
        origin: Option<(String, String)>,
        raw: Value,
    },

    /// Session identity scraped from the record tree. Only emitted once all
    /// three mandatory fields have been seen.
    SessionInfo {
        session_id: String,
        session_key: String,
        company_name: String,
        rolecenter_form_id: Option<String>,
    },

    /// Row-level deltas for a single grid.
    DataRefreshChange {
        control_path: String,
        changes: Vec<Value>,
        raw: Value,
    },

    /// Response to a client-initiated callback.
    CallbackResponse { raw: Value },

    /// Server-reported error, shown as a message or a dialog.
    Error {
        kind: ErrorKind,
        text: String,
        raw: Value,
    },

    /// Field validation feedback.
    ValidationMessage { text: String, raw: Value },

    /// Interactive confirmation prompt.
    Dialog {
        kind: DialogKind,
        text: String,
        raw: Value,
    },
}

impl HandlerEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            HandlerEvent::Message { .. } => "Message",
            HandlerEvent::RawHandlers { .. } => "RawHandlers",
            HandlerEvent::FormToShow { .. } => "FormToShow",
            HandlerEvent::DialogToShow { .. } => "DialogToShow",
            HandlerEvent::SessionInfo { .. } => "SessionInfo",
            HandlerEvent::DataRefreshChange { .. } => "DataRefreshChange",
            HandlerEvent::CallbackResponse { .. } => "CallbackResponse",
            HandlerEvent::Error { .. } => "Error",
            HandlerEvent::ValidationMessage { .. } => "ValidationMessage",
            HandlerEvent::Dialog { .. } => "Dialog",
        }
    }
}

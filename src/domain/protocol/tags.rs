//! Wire discriminator strings.
//!
//! The server addresses everything by string tags; they are collected here so
//! the adapter and the reducer dispatch on the same names.

/// Compressed-payload field names, in extraction priority order.
pub mod payload {
    /// Asynchronous envelope, primary field name (`params.compressedPayload`).
    pub const ASYNC_PRIMARY: &str = "compressedPayload";
    /// Asynchronous envelope, alternate field name used by one server
    /// operation (`params.compressedResult`).
    pub const ASYNC_ALTERNATE: &str = "compressedResult";
    /// Wrapper object keys.
    pub const PARAMS: &str = "params";
    pub const RESULT: &str = "result";
}

/// Envelope-level fields.
pub mod envelope {
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
    pub const OPEN_FORMS: &str = "openForms";
}

/// `handlerType` discriminators.
pub mod handler {
    pub const TYPE: &str = "handlerType";
    pub const PARAMETERS: &str = "parameters";

    pub const FORM_TO_SHOW: &str = "FormToShow";
    pub const DIALOG_TO_SHOW: &str = "DialogToShow";
    pub const FORM_UPDATE: &str = "FormUpdate";
    pub const CALLBACK_RESPONSE: &str = "CallbackResponse";
    pub const SHOW_ERROR_MESSAGE: &str = "ShowErrorMessage";
    pub const SHOW_ERROR_DIALOG: &str = "ShowErrorDialog";
    pub const VALIDATION_RESULT: &str = "ValidationResult";
    pub const CONFIRM_DIALOG: &str = "ConfirmDialog";
    pub const YES_NO_DIALOG: &str = "YesNoDialog";
}

/// Session fields located by deep scan (values can be nested arbitrarily
/// deep and may span records).
pub mod session {
    pub const SESSION_ID: &str = "sessionId";
    pub const SESSION_KEY: &str = "sessionKey";
    pub const COMPANY_NAME: &str = "companyName";
    pub const ROLECENTER_FORM_ID: &str = "rolecenterFormId";
}

/// Change record tags (`t` field inside a `FormUpdate` record's `changes`).
pub mod change {
    pub const TAG: &str = "t";

    pub const DATA_REFRESH: &str = "DataRefresh";
    pub const REPEATER_COLUMN_CONTROL: &str = "Rcc";
    pub const CURSOR_MOVE: &str = "CursorMove";
    pub const VIEWPORT_CHANGE: &str = "ViewportChange";
    pub const PROPERTY_CHANGES: &str = "PropertyChanges";
    pub const CALLBACK_RESPONSE: &str = "CallbackResponse";
}

/// Row-level change tags inside a `DataRefresh` change.
pub mod row {
    pub const TAG: &str = "t";

    pub const INSERTED: &str = "DataRowInserted";
    pub const UPDATED: &str = "DataRowUpdated";
    pub const DELETED: &str = "DataRowDeleted";
    pub const FLUSHED: &str = "DataRowsFlushed";
}

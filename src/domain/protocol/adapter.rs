//! Protocol adapter: wire messages in, typed events out.
//!
//! Stateless except for the monotonic server sequence counter. Decode
//! failures are logged and swallowed here so that independent messages keep
//! flowing; everything else is a pure classification pass.

use serde_json::Value;

use crate::domain::foundation::json_scan::find_first_string;
use crate::domain::protocol::envelope;
use crate::domain::protocol::events::{DialogKind, ErrorKind, HandlerEvent};
use crate::domain::protocol::tags::{change, envelope as env, handler, session};

/// Classifies inbound wire messages into [`HandlerEvent`]s.
#[derive(Debug)]
pub struct ProtocolAdapter {
    last_server_sequence: i64,
}

impl ProtocolAdapter {
    /// Creates an adapter with no observed sequence (−1).
    pub fn new() -> Self {
        Self {
            last_server_sequence: -1,
        }
    }

    /// Highest server sequence number observed so far, −1 before the first.
    pub fn last_server_sequence(&self) -> i64 {
        self.last_server_sequence
    }

    /// Processes one decoded wire message and returns the events it yields.
    ///
    /// The sequence counter advances from the envelope before decompression
    /// is attempted, so a corrupt payload still advances it.
    pub fn process(&mut self, message: &Value) -> Vec<HandlerEvent> {
        let mut events = Vec::new();

        let envelope_sequence = message.get(env::SEQUENCE_NUMBER).and_then(Value::as_i64);
        if let Some(sequence) = envelope_sequence {
            self.last_server_sequence = self.last_server_sequence.max(sequence);

            let open_forms = message.get(env::OPEN_FORMS).and_then(Value::as_array).map(|forms| {
                forms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });

            events.push(HandlerEvent::Message {
                sequence,
                open_forms,
            });
        }

        let records = match envelope::extract_handlers(message) {
            Ok(Some(records)) => records,
            Ok(None) => return events,
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable payload");
                return events;
            }
        };

        events.push(HandlerEvent::RawHandlers {
            sequence: envelope_sequence.unwrap_or(-1),
            records: records.clone(),
        });

        if let Some(info) = scan_session_info(&records) {
            events.push(info);
        }

        for record in &records {
            classify_record(record, &mut events);
        }

        events
    }
}

impl Default for ProtocolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scans every record's parameter tree for the three session identity
/// fields. Values may be nested arbitrarily deep and can appear in more than
/// one record; the first non-empty value wins per field.
fn scan_session_info(records: &[Value]) -> Option<HandlerEvent> {
    let find = |field: &str| {
        records
            .iter()
            .find_map(|r| find_first_string(r, field))
            .map(str::to_string)
    };

    let session_id = find(session::SESSION_ID)?;
    let session_key = find(session::SESSION_KEY)?;
    let company_name = find(session::COMPANY_NAME)?;

    Some(HandlerEvent::SessionInfo {
        session_id,
        session_key,
        company_name,
        rolecenter_form_id: find(session::ROLECENTER_FORM_ID),
    })
}

/// Dispatches one record by its declared handler type. A record may produce
/// more than one event; unknown types fail closed.
fn classify_record(record: &Value, events: &mut Vec<HandlerEvent>) {
    let Some(handler_type) = record.get(handler::TYPE).and_then(Value::as_str) else {
        tracing::debug!("record without handlerType, ignoring");
        return;
    };

    let first_param = record
        .get(handler::PARAMETERS)
        .and_then(Value::as_array)
        .and_then(|p| p.first());

    match handler_type {
        handler::FORM_TO_SHOW => {
            if let Some(param) = first_param {
                if let Some(form_id) = string_field(param, "formId") {
                    events.push(HandlerEvent::FormToShow {
                        form_id,
                        caption: string_field(param, "caption").unwrap_or_default(),
                        raw: record.clone(),
                    });
                }
                // A form record can double as a dialog announcement.
                push_dialog_to_show(param, record, events);
            }
        }
        handler::DIALOG_TO_SHOW => {
            if let Some(param) = first_param {
                push_dialog_to_show(param, record, events);
            }
        }
        handler::FORM_UPDATE => {
            for grid_change in data_refresh_changes(record) {
                events.push(grid_change);
            }
        }
        handler::CALLBACK_RESPONSE => {
            events.push(HandlerEvent::CallbackResponse {
                raw: record.clone(),
            });
        }
        handler::SHOW_ERROR_MESSAGE | handler::SHOW_ERROR_DIALOG => {
            let kind = if handler_type == handler::SHOW_ERROR_MESSAGE {
                ErrorKind::Message
            } else {
                ErrorKind::Dialog
            };
            events.push(HandlerEvent::Error {
                kind,
                text: param_text(first_param),
                raw: record.clone(),
            });
        }
        handler::VALIDATION_RESULT => {
            events.push(HandlerEvent::ValidationMessage {
                text: param_text(first_param),
                raw: record.clone(),
            });
        }
        handler::CONFIRM_DIALOG | handler::YES_NO_DIALOG => {
            let kind = if handler_type == handler::CONFIRM_DIALOG {
                DialogKind::Confirm
            } else {
                DialogKind::YesNo
            };
            events.push(HandlerEvent::Dialog {
                kind,
                text: param_text(first_param),
                raw: record.clone(),
            });
        }
        other => {
            tracing::debug!(handler_type = other, "unknown handler type, ignoring");
        }
    }
}

/// Filters a `FormUpdate` record's change list down to the data-refresh
/// sub-type, one event per grid.
fn data_refresh_changes(record: &Value) -> Vec<HandlerEvent> {
    let Some(changes) = record.get("changes").and_then(Value::as_array) else {
        return Vec::new();
    };

    changes
        .iter()
        .filter(|c| c.get(change::TAG).and_then(Value::as_str) == Some(change::DATA_REFRESH))
        .filter_map(|c| {
            let control_path = string_field(c, "controlPath")?;
            let rows = c
                .get("changes")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Some(HandlerEvent::DataRefreshChange {
                control_path,
                changes: rows,
                raw: record.clone(),
            })
        })
        .collect()
}

fn push_dialog_to_show(param: &Value, record: &Value, events: &mut Vec<HandlerEvent>) {
    let Some(dialog_id) = string_field(param, "dialogId") else {
        return;
    };

    let origin = string_field(param, "originFormId")
        .zip(string_field(param, "originControl"));

    events.push(HandlerEvent::DialogToShow {
        dialog_id,
        caption: string_field(param, "caption").unwrap_or_default(),
        modal: param.get("modal").and_then(Value::as_bool).unwrap_or(false),
        task_dialog: param
            .get("taskDialog")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        origin,
        raw: record.clone(),
    });
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn param_text(param: Option<&Value>) -> String {
    match param {
        Some(Value::String(s)) => s.clone(),
        Some(obj) => string_field(obj, "message").unwrap_or_default(),
        None => String::new(),
    }
}

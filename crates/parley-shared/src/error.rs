use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Unknown wire format: {0}")]
    UnknownWireFormat(String),

    #[error("Message text too long: {units} code units (max {max})")]
    TextTooLong { units: usize, max: usize },

    #[error("Message has neither text nor attachments")]
    EmptyMessage,

    #[error("Message has no sender")]
    MissingSender,

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

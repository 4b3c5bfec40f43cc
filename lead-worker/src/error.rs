use lead_common::archive::ArchiveError;
use thiserror::Error;

/// Errors raised while sending a lead to the downstream marketing API.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("missing {0} for the downstream API")]
    ConfigurationMissing(&'static str),
    #[error("error parsing downstream base url: {0}")]
    InvalidBaseUrl(url::ParseError),
    #[error("failed to serialize outbound payload: {0}")]
    Serialize(serde_json::Error),
    #[error("request to the downstream API failed: {0}")]
    Request(reqwest::Error),
    #[error("downstream API rejected the lead with status {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: serde_json::Value,
    },
}

/// Errors that abort the processing of a single queue message.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("message body is not valid JSON: {0}")]
    MalformedMessage(serde_json::Error),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

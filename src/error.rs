use std::num::TryFromIntError;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

use crate::resource::BackendRequest;

#[derive(Error, Debug)]
pub enum ApiError {
    /* mapped errors */
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JoinError(#[from] JoinError),

    #[error(transparent)]
    TryFromIntError(#[from] TryFromIntError),

    #[error(transparent)]
    FromHexError(#[from] hex::FromHexError),

    #[error(transparent)]
    AddrParseError(#[from] std::net::AddrParseError),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error(transparent)]
    SendError(#[from] tokio::sync::broadcast::error::SendError<Arc<BackendRequest>>),

    #[error(transparent)]
    RecvError(#[from] tokio::sync::broadcast::error::RecvError),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),

    #[error(transparent)]
    OpensslErrorStack(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    OpensslSslError(#[from] openssl::ssl::Error),

    #[error(transparent)]
    NixError(#[from] nix::errno::Errno),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    TungsteniteError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error(transparent)]
    HueError(#[from] hue::error::HueError),

    /* streaming errors */
    #[error("Entertainment stream timed out waiting for data")]
    EntStreamTimeout,

    #[error("Entertainment stream desynchronized")]
    EntStreamDesync,

    #[error("Entertainment stream closed by peer during handshake")]
    EntStreamPskRejected,

    #[error("Too many invalid frames in a row ({0})")]
    EntStreamBadFrames(u32),

    #[error("Cannot bind entertainment port {0}")]
    EntPortBusy(u16),

    #[error("Entertainment session cancelled")]
    Cancelled,

    /* device errors, recovered per frame */
    #[error("Device i/o timed out")]
    DeviceTimeout,

    /* upstream bridge errors */
    #[error("Upstream bridge rejected request: {0}")]
    UpstreamRejected(String),

    /* registry errors */
    #[error("Entertainment group {0} not found")]
    GroupNotFound(u32),

    #[error("Light {0} not found")]
    LightNotFound(u32),

    #[error("No api user with a streaming client key")]
    NoStreamingUser,

    #[error("Light {0} has invalid {1} protocol config")]
    InvalidProtocolConfig(u32, &'static str),

    /* service errors */
    #[error("Service failed: {0}")]
    ServiceError(String),
}

impl ApiError {
    pub fn service_error(msg: impl AsRef<str>) -> Self {
        Self::ServiceError(msg.as_ref().to_string())
    }

    /// Coarse classification reported to the control surface as the
    /// session result.
    #[must_use]
    pub const fn session_kind(&self) -> SessionErrorKind {
        match self {
            Self::Cancelled => SessionErrorKind::Cancelled,
            Self::EntStreamPskRejected => SessionErrorKind::AuthRejected,
            Self::EntPortBusy(_) => SessionErrorKind::ResourceExhausted,
            Self::EntStreamBadFrames(_) | Self::EntStreamDesync | Self::HueError(_) => {
                SessionErrorKind::ProtocolFormat
            }
            Self::UpstreamRejected(_) | Self::ReqwestError(_) => SessionErrorKind::UpstreamRejected,
            _ => SessionErrorKind::TransportFatal,
        }
    }
}

/// The error taxonomy visible to users of the control surface.
///
/// Transient transport errors never surface here; they are logged and
/// retried on the next frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    TransportFatal,
    ProtocolFormat,
    UpstreamRejected,
    AuthRejected,
    ResourceExhausted,
    Cancelled,
}

pub type ApiResult<T> = Result<T, ApiError>;

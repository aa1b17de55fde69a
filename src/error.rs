//! Error handling for h3core
//!
//! This module defines the nghttp3-compatible library error codes, their
//! severity classes, and the native error type returned by every fallible
//! operation. Each error also knows the HTTP/3 (or QPACK) application error
//! code that should accompany a stream reset or connection close.

use std::fmt;

use crate::constants::h3_error::*;

// ============================================================================
// Error Codes (nghttp3 compatible)
// ============================================================================

/// nghttp3 compatible error codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error
    NoError = 0,
    /// Invalid argument passed
    InvalidArgument = -101,
    /// Buffer too small
    NoBuf = -102,
    /// Invalid state
    InvalidState = -103,
    /// Operation would block
    WouldBlock = -104,
    /// Stream already in use
    StreamInUse = -105,
    /// Push ID blocked
    PushIdBlocked = -106,
    /// Malformed HTTP header
    MalformedHttpHeader = -107,
    /// Required header removed
    RemoveHttpHeader = -108,
    /// Malformed HTTP messaging
    MalformedHttpMessaging = -109,
    /// Fatal QPACK error
    QpackFatal = -110,
    /// QPACK header too large
    QpackHeaderTooLarge = -111,
    /// Stream should be ignored
    IgnoreStream = -112,
    /// H3: Unexpected frame
    H3FrameUnexpected = -113,
    /// H3: Frame error
    H3FrameError = -114,
    /// H3: Missing settings
    H3MissingSettings = -115,
    /// H3: Internal error
    H3InternalError = -116,
    /// H3: Closed critical stream
    H3ClosedCriticalStream = -117,
    /// H3: General protocol error
    H3GeneralProtocolError = -118,
    /// H3: ID error
    H3IdError = -119,
    /// H3: Settings error
    H3SettingsError = -120,
    /// H3: Stream creation error
    H3StreamCreationError = -121,
    /// Fatal error
    Fatal = -501,
    /// Out of memory
    NoMem = -502,
    /// Callback failure
    CallbackFailure = -503,
}

/// How far the damage of an error reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Only the rejected call is affected
    Submission,
    /// The stream is closed; the connection continues
    Stream,
    /// The connection is unusable and must be torn down
    Connection,
}

impl ErrorCode {
    /// Severity class of this error
    pub fn severity(self) -> Severity {
        match self {
            ErrorCode::NoError
            | ErrorCode::InvalidArgument
            | ErrorCode::NoBuf
            | ErrorCode::InvalidState
            | ErrorCode::WouldBlock
            | ErrorCode::StreamInUse
            | ErrorCode::PushIdBlocked
            | ErrorCode::QpackHeaderTooLarge
            | ErrorCode::RemoveHttpHeader => Severity::Submission,
            ErrorCode::MalformedHttpHeader
            | ErrorCode::MalformedHttpMessaging
            | ErrorCode::IgnoreStream
            | ErrorCode::H3FrameUnexpected
            | ErrorCode::H3FrameError => Severity::Stream,
            ErrorCode::QpackFatal
            | ErrorCode::H3MissingSettings
            | ErrorCode::H3InternalError
            | ErrorCode::H3ClosedCriticalStream
            | ErrorCode::H3GeneralProtocolError
            | ErrorCode::H3IdError
            | ErrorCode::H3SettingsError
            | ErrorCode::H3StreamCreationError
            | ErrorCode::Fatal
            | ErrorCode::NoMem
            | ErrorCode::CallbackFailure => Severity::Connection,
        }
    }

    /// Check if this error is fatal to the connection
    pub fn is_fatal(self) -> bool {
        self.severity() == Severity::Connection
    }

    /// Convert to i32
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Look up a code by its numeric value
    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            0 => ErrorCode::NoError,
            -101 => ErrorCode::InvalidArgument,
            -102 => ErrorCode::NoBuf,
            -103 => ErrorCode::InvalidState,
            -104 => ErrorCode::WouldBlock,
            -105 => ErrorCode::StreamInUse,
            -106 => ErrorCode::PushIdBlocked,
            -107 => ErrorCode::MalformedHttpHeader,
            -108 => ErrorCode::RemoveHttpHeader,
            -109 => ErrorCode::MalformedHttpMessaging,
            -110 => ErrorCode::QpackFatal,
            -111 => ErrorCode::QpackHeaderTooLarge,
            -112 => ErrorCode::IgnoreStream,
            -113 => ErrorCode::H3FrameUnexpected,
            -114 => ErrorCode::H3FrameError,
            -115 => ErrorCode::H3MissingSettings,
            -116 => ErrorCode::H3InternalError,
            -117 => ErrorCode::H3ClosedCriticalStream,
            -118 => ErrorCode::H3GeneralProtocolError,
            -119 => ErrorCode::H3IdError,
            -120 => ErrorCode::H3SettingsError,
            -121 => ErrorCode::H3StreamCreationError,
            -501 => ErrorCode::Fatal,
            -502 => ErrorCode::NoMem,
            -503 => ErrorCode::CallbackFailure,
            _ => return None,
        };
        Some(code)
    }

    /// Symbolic name, as returned by [`strerror`]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::InvalidArgument => "ERR_INVALID_ARGUMENT",
            ErrorCode::NoBuf => "ERR_NOBUF",
            ErrorCode::InvalidState => "ERR_INVALID_STATE",
            ErrorCode::WouldBlock => "ERR_WOULDBLOCK",
            ErrorCode::StreamInUse => "ERR_STREAM_IN_USE",
            ErrorCode::PushIdBlocked => "ERR_PUSH_ID_BLOCKED",
            ErrorCode::MalformedHttpHeader => "ERR_MALFORMED_HTTP_HEADER",
            ErrorCode::RemoveHttpHeader => "ERR_REMOVE_HTTP_HEADER",
            ErrorCode::MalformedHttpMessaging => "ERR_MALFORMED_HTTP_MESSAGING",
            ErrorCode::QpackFatal => "ERR_QPACK_FATAL",
            ErrorCode::QpackHeaderTooLarge => "ERR_QPACK_HEADER_TOO_LARGE",
            ErrorCode::IgnoreStream => "ERR_IGNORE_STREAM",
            ErrorCode::H3FrameUnexpected => "ERR_H3_FRAME_UNEXPECTED",
            ErrorCode::H3FrameError => "ERR_H3_FRAME_ERROR",
            ErrorCode::H3MissingSettings => "ERR_H3_MISSING_SETTINGS",
            ErrorCode::H3InternalError => "ERR_H3_INTERNAL_ERROR",
            ErrorCode::H3ClosedCriticalStream => "ERR_H3_CLOSED_CRITICAL_STREAM",
            ErrorCode::H3GeneralProtocolError => "ERR_H3_GENERAL_PROTOCOL_ERROR",
            ErrorCode::H3IdError => "ERR_H3_ID_ERROR",
            ErrorCode::H3SettingsError => "ERR_H3_SETTINGS_ERROR",
            ErrorCode::H3StreamCreationError => "ERR_H3_STREAM_CREATION_ERROR",
            ErrorCode::Fatal => "ERR_FATAL",
            ErrorCode::NoMem => "ERR_NOMEM",
            ErrorCode::CallbackFailure => "ERR_CALLBACK_FAILURE",
        }
    }

    /// HTTP/3 application error code to signal alongside this error
    pub fn app_error_code(self) -> u64 {
        match self {
            ErrorCode::NoError => H3_NO_ERROR,
            ErrorCode::MalformedHttpHeader | ErrorCode::MalformedHttpMessaging => H3_MESSAGE_ERROR,
            ErrorCode::QpackFatal => QPACK_DECOMPRESSION_FAILED,
            ErrorCode::QpackHeaderTooLarge => H3_EXCESSIVE_LOAD,
            ErrorCode::IgnoreStream => H3_REQUEST_REJECTED,
            ErrorCode::H3FrameUnexpected => H3_FRAME_UNEXPECTED,
            ErrorCode::H3FrameError => H3_FRAME_ERROR,
            ErrorCode::H3MissingSettings => H3_MISSING_SETTINGS,
            ErrorCode::H3ClosedCriticalStream => H3_CLOSED_CRITICAL_STREAM,
            ErrorCode::H3GeneralProtocolError => H3_GENERAL_PROTOCOL_ERROR,
            ErrorCode::H3IdError => H3_ID_ERROR,
            ErrorCode::H3SettingsError => H3_SETTINGS_ERROR,
            ErrorCode::H3StreamCreationError => H3_STREAM_CREATION_ERROR,
            _ => H3_INTERNAL_ERROR,
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::from_i32(code).unwrap_or(ErrorCode::Fatal)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a numeric error code to its symbolic name
pub fn strerror(code: i32) -> &'static str {
    ErrorCode::from_i32(code).map_or("UNKNOWN_ERROR", ErrorCode::as_str)
}

/// Check whether a numeric error code is fatal to the connection
pub fn err_is_fatal(code: i32) -> bool {
    ErrorCode::from_i32(code).is_some_and(ErrorCode::is_fatal) || code < ErrorCode::Fatal as i32
}

// ============================================================================
// Native Error Type
// ============================================================================

/// Native Rust error type for h3core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// nghttp3-compatible library error
    #[error("{0}")]
    Library(ErrorCode),
    /// HTTP/3 protocol error
    #[error("HTTP/3 error: {0:?}")]
    H3(H3Error),
    /// QPACK error
    #[error("QPACK error: {0:?}")]
    Qpack(QpackError),
}

impl Error {
    /// Library error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Library(code) => *code,
            Error::H3(e) => e.lib_code(),
            Error::Qpack(e) => e.lib_code(),
        }
    }

    /// Application error code to put on the wire
    pub fn app_error_code(&self) -> u64 {
        match self {
            Error::Library(code) => code.app_error_code(),
            Error::H3(e) => e.code(),
            Error::Qpack(e) => e.code(),
        }
    }

    /// Check if this error is fatal to the connection
    pub fn is_fatal(&self) -> bool {
        self.code().is_fatal()
    }
}

impl From<ErrorCode> for Error {
    fn from(e: ErrorCode) -> Self {
        Error::Library(e)
    }
}

impl From<H3Error> for Error {
    fn from(e: H3Error) -> Self {
        Error::H3(e)
    }
}

impl From<QpackError> for Error {
    fn from(e: QpackError) -> Self {
        Error::Qpack(e)
    }
}

// ============================================================================
// HTTP/3 Specific Errors
// ============================================================================

/// HTTP/3 protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H3Error {
    /// General protocol error
    GeneralProtocolError,
    /// Internal error
    InternalError,
    /// Stream creation error
    StreamCreationError,
    /// Closed critical stream
    ClosedCriticalStream,
    /// Unexpected frame
    FrameUnexpected,
    /// Frame error
    FrameError,
    /// Excessive load
    ExcessiveLoad,
    /// ID error
    IdError,
    /// Settings error
    SettingsError,
    /// Missing settings
    MissingSettings,
    /// Request rejected
    RequestRejected,
    /// Message error
    MessageError,
}

impl H3Error {
    /// Get the HTTP/3 error code value
    pub fn code(self) -> u64 {
        match self {
            H3Error::GeneralProtocolError => H3_GENERAL_PROTOCOL_ERROR,
            H3Error::InternalError => H3_INTERNAL_ERROR,
            H3Error::StreamCreationError => H3_STREAM_CREATION_ERROR,
            H3Error::ClosedCriticalStream => H3_CLOSED_CRITICAL_STREAM,
            H3Error::FrameUnexpected => H3_FRAME_UNEXPECTED,
            H3Error::FrameError => H3_FRAME_ERROR,
            H3Error::ExcessiveLoad => H3_EXCESSIVE_LOAD,
            H3Error::IdError => H3_ID_ERROR,
            H3Error::SettingsError => H3_SETTINGS_ERROR,
            H3Error::MissingSettings => H3_MISSING_SETTINGS,
            H3Error::RequestRejected => H3_REQUEST_REJECTED,
            H3Error::MessageError => H3_MESSAGE_ERROR,
        }
    }

    /// Library error code this protocol error surfaces as
    pub fn lib_code(self) -> ErrorCode {
        match self {
            H3Error::GeneralProtocolError => ErrorCode::H3GeneralProtocolError,
            H3Error::InternalError => ErrorCode::H3InternalError,
            H3Error::StreamCreationError => ErrorCode::H3StreamCreationError,
            H3Error::ClosedCriticalStream => ErrorCode::H3ClosedCriticalStream,
            H3Error::FrameUnexpected => ErrorCode::H3FrameUnexpected,
            H3Error::FrameError => ErrorCode::H3FrameError,
            H3Error::ExcessiveLoad => ErrorCode::QpackHeaderTooLarge,
            H3Error::IdError => ErrorCode::H3IdError,
            H3Error::SettingsError => ErrorCode::H3SettingsError,
            H3Error::MissingSettings => ErrorCode::H3MissingSettings,
            H3Error::RequestRejected => ErrorCode::IgnoreStream,
            H3Error::MessageError => ErrorCode::MalformedHttpMessaging,
        }
    }
}

// ============================================================================
// QPACK Errors
// ============================================================================

/// QPACK errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpackError {
    /// A field section could not be decoded
    DecompressionFailed,
    /// Malformed or invalid encoder stream instruction
    EncoderStreamError,
    /// Malformed or invalid decoder stream instruction
    DecoderStreamError,
    /// Field section exceeds the negotiated size limit
    HeaderTooLarge,
    /// More streams blocked than the advertised limit allows
    BlockedStreamLimit,
}

impl QpackError {
    /// Get the application error code
    pub fn code(self) -> u64 {
        match self {
            QpackError::DecompressionFailed | QpackError::BlockedStreamLimit => {
                QPACK_DECOMPRESSION_FAILED
            }
            QpackError::EncoderStreamError => QPACK_ENCODER_STREAM_ERROR,
            QpackError::DecoderStreamError => QPACK_DECODER_STREAM_ERROR,
            QpackError::HeaderTooLarge => H3_EXCESSIVE_LOAD,
        }
    }

    /// Library error code this QPACK error surfaces as
    pub fn lib_code(self) -> ErrorCode {
        match self {
            QpackError::HeaderTooLarge => ErrorCode::QpackHeaderTooLarge,
            _ => ErrorCode::QpackFatal,
        }
    }
}

// ============================================================================
// Callback Failure
// ============================================================================

/// Returned by an application callback or body source to abort the
/// enclosing operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("callback failure")]
pub struct CallbackFailure;

impl From<CallbackFailure> for Error {
    fn from(_: CallbackFailure) -> Self {
        Error::Library(ErrorCode::CallbackFailure)
    }
}

/// Result type for h3core operations
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================

//! Error types for the booking assistant.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Failures talking to the scheduling provider.
///
/// Surfaced verbatim to callers. Nothing at this layer retries.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// HTTP status of the failed call, when the provider answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Booking orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider accepted the request but handed back no usable id.
    #[error("Failed to create booking: no reservation id returned")]
    NoReservationId,

    /// The provider holds the reservation but the local mirror write failed.
    #[error("Reservation {remote_id} exists at the provider but was not recorded locally: {source}")]
    Unmirrored {
        remote_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Invalid booking datetime {value}: {reason}")]
    InvalidDatetime { value: String, reason: String },
}

/// Result type alias for the booking assistant.
pub type Result<T> = std::result::Result<T, Error>;

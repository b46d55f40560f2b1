use ulid::Ulid;

use crate::model::Ts;
use crate::repo::RepoError;

#[derive(Debug)]
pub enum EngineError {
    EntityNotFound(Ulid),
    FloorNotFound(Ulid),
    BookingNotFound(Ulid),
    OrderNotFound(Ulid),
    AlreadyExists(Ulid),
    /// The user already holds the given booking in the requested range.
    AlreadyHaveBooking(Ulid),
    /// First bucket that failed the free check.
    NoFreePlaces { at: Ts },
    NoAccessToBooking(Ulid),
    InvalidBookingTime,
    NoRights,
    LimitExceeded(&'static str),
    DeadlineExceeded,
    Internal {
        op: &'static str,
        source: RepoError,
    },
}

/// Client-facing class of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Forbidden,
    BadInput,
    Retryable,
    Internal,
}

impl ErrorCategory {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "P0002",
            ErrorCategory::Conflict => "23P01",
            ErrorCategory::Forbidden => "42501",
            ErrorCategory::BadInput => "22023",
            ErrorCategory::Retryable => "57014",
            ErrorCategory::Internal => "XX000",
        }
    }
}

impl EngineError {
    /// Wrap a repository failure with the operation it interrupted.
    pub fn internal(op: &'static str) -> impl FnOnce(RepoError) -> EngineError {
        move |source| EngineError::Internal { op, source }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            // Bookings the caller may not see are reported as missing.
            EngineError::EntityNotFound(_)
            | EngineError::FloorNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::OrderNotFound(_)
            | EngineError::NoAccessToBooking(_) => ErrorCategory::NotFound,
            EngineError::AlreadyExists(_) | EngineError::AlreadyHaveBooking(_) => ErrorCategory::Conflict,
            EngineError::NoFreePlaces { .. } | EngineError::NoRights => ErrorCategory::Forbidden,
            EngineError::InvalidBookingTime | EngineError::LimitExceeded(_) => ErrorCategory::BadInput,
            EngineError::DeadlineExceeded => ErrorCategory::Retryable,
            EngineError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::EntityNotFound(_) => "entity_not_found",
            EngineError::FloorNotFound(_) => "floor_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::OrderNotFound(_) => "order_not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::AlreadyHaveBooking(_) => "already_have_booking",
            EngineError::NoFreePlaces { .. } => "no_free_places",
            EngineError::NoAccessToBooking(_) => "no_access",
            EngineError::InvalidBookingTime => "invalid_time",
            EngineError::NoRights => "no_rights",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::DeadlineExceeded => "deadline_exceeded",
            EngineError::Internal { .. } => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::EntityNotFound(id) => write!(f, "entity not found: {id}"),
            EngineError::FloorNotFound(id) => write!(f, "floor not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::OrderNotFound(id) => write!(f, "order not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::AlreadyHaveBooking(id) => {
                write!(f, "user already has booking {id} in this time range")
            }
            EngineError::NoFreePlaces { at } => write!(f, "no free places at {at}"),
            // Same text as a missing booking so existence does not leak.
            EngineError::NoAccessToBooking(id) => write!(f, "booking not found: {id}"),
            EngineError::InvalidBookingTime => write!(f, "invalid booking time: from must be before to"),
            EngineError::NoRights => write!(f, "not enough rights"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::DeadlineExceeded => write!(f, "deadline exceeded"),
            EngineError::Internal { op, source } => write!(f, "{op} failed: {source}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Internal { source, .. } => Some(source),
            _ => None,
        }
    }
}

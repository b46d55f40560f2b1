use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_secs() -> Ts {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as Ts)
        .unwrap_or(0)
}

pub(crate) fn validate_booking_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidBookingTime);
    }
    if span.duration_secs() > MAX_BOOKING_SECS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if window.start > window.end {
        return Err(EngineError::InvalidBookingTime);
    }
    if window.duration_secs() > MAX_QUERY_WINDOW_SECS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Owner or elevated role, else the booking is hidden.
pub(crate) fn authorize(token: &Token, booking: &Booking) -> Result<(), EngineError> {
    if token.may_access(booking.user_id) {
        Ok(())
    } else {
        Err(EngineError::NoAccessToBooking(booking.id))
    }
}

pub(crate) fn all_free(items: &[WorkloadItem]) -> Result<(), EngineError> {
    match items.iter().find(|i| !i.is_free) {
        Some(item) => Err(EngineError::NoFreePlaces { at: item.time }),
        None => Ok(()),
    }
}

/// Like [`all_free`], but buckets starting inside `own` (bounds included)
/// are exempt: the booking being moved does not compete with itself there.
pub(crate) fn all_free_outside(items: &[WorkloadItem], own: &Span) -> Result<(), EngineError> {
    match items
        .iter()
        .find(|i| !own.contains_instant(i.time) && !i.is_free)
    {
        Some(item) => Err(EngineError::NoFreePlaces { at: item.time }),
        None => Ok(()),
    }
}

use crate::limits::*;
use crate::model::*;

use super::BookingError;

/// Build a booking span from untrusted bounds.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, BookingError> {
    let span = Span::try_new(start, end).ok_or(BookingError::InvalidRange { start, end })?;
    check_bounds(&span)?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Build a query window (listing, availability) from untrusted bounds.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, BookingError> {
    let window = Span::try_new(start, end).ok_or(BookingError::InvalidRange { start, end })?;
    check_bounds(&window)?;
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(BookingError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

fn check_bounds(span: &Span) -> Result<(), BookingError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_seats(seats: u32, capacity: u32) -> Result<(), BookingError> {
    if seats == 0 || seats > capacity {
        return Err(BookingError::SeatsOutOfRange { seats, capacity });
    }
    Ok(())
}

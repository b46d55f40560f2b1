use crate::model::Ts;

/// Widest window a workload query may span (31 days).
pub const MAX_QUERY_WINDOW_SECS: Ts = 31 * 24 * 3600;

/// Longest single booking (7 days).
pub const MAX_BOOKING_SECS: Ts = 7 * 24 * 3600;

pub const MAX_THING_LEN: usize = 1024;

pub const MAX_ORDERS_PER_BOOKING: usize = 64;

//! Status codes returned to tasks through their register frame.
//!
//! Successful calls return zero or a positive value; failures return one of the negative
//! codes below.

/// The call succeeded.
pub const OK: i64 = 0;

/// An argument named something that does not exist or is not allowed.
pub const BADARG: i64 = -1;

/// A fixed-size table or queue is full.
pub const NORESOURCE: i64 = -2;

/// Memory or address space ran out.
pub const NOSPACE: i64 = -3;

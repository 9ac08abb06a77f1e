//! Hard caps. Anything past these is rejected with `EngineError::LimitExceeded`.

pub const MAX_STAYS: usize = 1_000_000;
pub const MAX_RESERVATIONS_PER_STAY: usize = 10_000;
pub const MAX_NIGHTS_PER_RESERVATION: i64 = 365;
pub const MAX_SEARCH_CANDIDATES: usize = 10_000;
pub const MAX_GUEST_CAPACITY: u32 = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ADDRESS_LEN: usize = 1024;
pub const MAX_IDENTITY_LEN: usize = 256;

//! Hard limits per tenant. Exceeding one is a caller error, never a crash.

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_TABLES_PER_TENANT: usize = 1_000;
pub const MAX_RESERVATIONS_PER_TENANT: usize = 200_000;

/// Upper bound on ids in one combine/separate/reservation request.
pub const MAX_TABLES_PER_GROUP: usize = 64;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;

pub const MAX_PARTY_SIZE: u32 = 1_000;
pub const MAX_DURATION_HOURS: f64 = 24.0;

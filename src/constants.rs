/// Furthest horizontal distance at which a roof-holding structure keeps an
/// overhead surface up.
pub const ROOF_MAX_SUPPORT_DISTANCE: f32 = 6.9;

pub const TICKS_PER_HOUR: u64 = 2500;

/// Waiting placements are retried every tenth of an hour.
pub const PLACE_RETRY_INTERVAL: u64 = TICKS_PER_HOUR / 10;

/// Maximum number of remembered supporters in the support cache.
pub const SUPPORT_CACHE_CAPACITY: usize = 64;

/// Number of quarter turns in a full rotation.
pub const ROTATION_COUNT: u8 = 4;

//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Per-connection limiter for history packets
#[derive(Clone)]
pub struct PacketRateLimiter {
    packet_limiter: Arc<Limiter>,
}

impl PacketRateLimiter {
    pub fn new(packets_per_second: u32) -> Self {
        Self {
            packet_limiter: create_limiter(packets_per_second),
        }
    }

    /// Check if a packet is allowed (returns true if allowed)
    pub fn check_packet(&self) -> bool {
        self.packet_limiter.check().is_ok()
    }
}

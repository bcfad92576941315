/// Timing and retry parameters for the host side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// How long the clock is held low to request the bus before the start
    /// bit is driven. The device needs at least 100us to notice.
    pub settle_us: u32,
    /// Upper bound on each wait for a device clock edge while transmitting.
    pub wait_timeout_us: u32,
    /// Resends allowed for a single byte before the queue is abandoned.
    pub max_resends: u8,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            settle_us: 100,
            // The device must start clocking within 15ms of a request.
            wait_timeout_us: 15_000,
            max_resends: 3,
        }
    }
}

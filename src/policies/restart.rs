//! # Restart policy for supervised workers.
//!
//! [`RestartPolicy`] determines whether a worker is respawned after its
//! process closes (exit, broken channel or forced kill).
//!
//! - [`RestartPolicy::Never`] the supervisor goes terminal until `spawn` is called again (default).
//! - [`RestartPolicy::Always`] the supervisor respawns the same module with the same
//!   initial payload and lineage, unless the close was preceded by `kill(true)`.
//!
//! ```text
//! close ──► Always && !suppressed ──► Respawning ──(backoff delay)──► Restart event ──► spawn
//!       └─► otherwise             ──► Terminal
//! ```

/// Policy controlling whether a worker is respawned after it closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never respawn automatically (default).
    #[default]
    Never,
    /// Respawn after every close that was not suppressed by `kill(true)`.
    Always,
}

impl RestartPolicy {
    /// True when an unsuppressed close should schedule a respawn.
    #[inline]
    pub fn restarts(&self) -> bool {
        matches!(self, RestartPolicy::Always)
    }
}

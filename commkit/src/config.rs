//! Capability flags and tuning parameters.
//!
//! Everything here is supplied by the caller. The core never queries the
//! process for native libraries; `from_env` helpers exist for applications
//! that want to drive the flags from environment variables (prefixed
//! `COMMKIT_`).

use std::time::Duration;

/// Process-wide backend availability, discovered once by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A device runtime is present and usable.
    pub device_runtime: bool,

    /// A GPU-aware reduction library is present. Informational: reductions
    /// are always executed by the transport on host or direct buffers.
    pub gpu_reduction: bool,

    /// A transport library is present.
    pub transport: bool,

    /// The transport can be driven directly with device-resident buffers,
    /// so no staging is needed.
    pub transport_device_aware: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::host_only()
    }
}

impl Capabilities {
    /// Transport available, no device runtime.
    pub const fn host_only() -> Self {
        Self {
            device_runtime: false,
            gpu_reduction: false,
            transport: true,
            transport_device_aware: false,
        }
    }

    /// Nothing available: single-process execution only.
    pub const fn serial() -> Self {
        Self {
            device_runtime: false,
            gpu_reduction: false,
            transport: false,
            transport_device_aware: false,
        }
    }

    /// Load flags from environment variables, falling back to [`host_only`](Self::host_only).
    ///
    /// Recognized variables (values `1/0`, `true/false`, `yes/no`, `on/off`):
    /// - `COMMKIT_DEVICE_RUNTIME`
    /// - `COMMKIT_GPU_REDUCTION`
    /// - `COMMKIT_TRANSPORT`
    /// - `COMMKIT_TRANSPORT_DEVICE_AWARE`
    pub fn from_env() -> Self {
        let mut caps = Self::host_only();

        if let Some(v) = env_flag("COMMKIT_DEVICE_RUNTIME") {
            caps.device_runtime = v;
        }
        if let Some(v) = env_flag("COMMKIT_GPU_REDUCTION") {
            caps.gpu_reduction = v;
        }
        if let Some(v) = env_flag("COMMKIT_TRANSPORT") {
            caps.transport = v;
        }
        if let Some(v) = env_flag("COMMKIT_TRANSPORT_DEVICE_AWARE") {
            caps.transport_device_aware = v;
        }

        caps
    }

    /// Whether device buffers may be handed to the transport without staging.
    ///
    /// Requires both the transport flag and a device runtime; a device-aware
    /// transport with no runtime present has nothing to be aware of.
    pub fn direct_device_transport(&self) -> bool {
        self.device_runtime && self.transport_device_aware
    }
}

/// Tuning parameters for the in-process transport.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// How long a blocking receive waits before failing with a transport error.
    pub recv_timeout: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(30),
        }
    }
}

impl LocalConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COMMKIT_RECV_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("COMMKIT_RECV_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.recv_timeout = Duration::from_secs(s);
            }
        }

        cfg
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub mod buffer_codec;
pub mod codec;
pub mod messages;

/// Default maximum IPC frame payload length (§4.1): 4 MiB.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// Heartbeat cadence and disconnect policy (§5): a client with no heartbeat
/// for two intervals is disconnected.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;
pub const HEARTBEAT_MISSED_LIMIT: u32 = 2;

/// Default concurrent-client cap per session (§4.5).
pub const DEFAULT_CONNECTION_LIMIT: usize = 16;

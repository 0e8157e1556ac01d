mod config;
mod load;

pub use config::*;
pub use load::load_config;

/// Backlog for listen sockets.
pub const LISTEN_BACKLOG: u32 = 32;

/// Size of a single non-blocking read from any socket.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// High-water mark for the plain backend's outbound buffer. Past this the
/// tunnel stops accepting substream data.
pub const PLAIN_BUFFER_SIZE: usize = 16384;

/// Per-socket high-water mark for the multi backend's outbound buffers.
pub const MULTI_BUFFER_SIZE: usize = 4096;

/// Depth of the bounded substream-to-tunnel command queue. Bounds how much
/// substream data can pile up once the backend is over its high-water mark.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

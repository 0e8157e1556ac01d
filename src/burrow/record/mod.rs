mod cipher;
mod frame;
mod layer;

pub use self::frame::{PacketType, BLOCK_SIZE, DIGEST_SIZE, HEADER_SIZE, MAX_DATA_LEN, PART_DATA_LEN};
pub use self::layer::RecordLayer;

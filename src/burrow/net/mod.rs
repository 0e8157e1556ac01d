mod listener;
mod substream;

pub use self::listener::Listener;
pub use self::substream::{Substream, SubstreamEvent, TunnelCmd};

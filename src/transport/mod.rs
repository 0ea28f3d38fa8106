//! Cross-process transport: the ladder wire codec and the shared-memory ring.

pub mod codec;
#[cfg(unix)]
pub mod ring;
#[cfg(unix)]
pub mod semaphore;

pub use codec::{decode_agg_book, encode_agg_book, encoded_len, LadderFrame};
#[cfg(unix)]
pub use ring::{ShmRingReader, ShmRingWriter, WriteOutcome};

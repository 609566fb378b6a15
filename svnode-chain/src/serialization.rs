//! Bitcoin wire serialization.
//!
//! This module contains four traits: `SvSerialize` and `SvDeserialize`,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended for
//! the bit-exact Bitcoin SV wire formats, and `WriteSvExt` and `ReadSvExt`,
//! extension traits for `io::Read` and `io::Write` with utility functions for
//! reading and writing data (e.g., the Bitcoin variable-integer format).

mod error;
mod read_sv;
mod sv_deserialize;
mod sv_serialize;
mod write_sv;

pub mod sha256d;


pub use error::SerializationError;
pub use read_sv::{canonical_ip_addr, ReadSvExt};
pub use sv_deserialize::{
    sv_deserialize_bytes_external_count, sv_deserialize_external_count, SvDeserialize,
    SvDeserializeInto, TrustedPreallocate,
};
pub use sv_serialize::{
    sv_serialize_bytes, sv_serialize_external_count, FakeWriter, SvSerialize,
    MAX_PROTOCOL_MESSAGE_LEN,
};
pub use write_sv::WriteSvExt;

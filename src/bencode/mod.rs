//! Bencode codec: a dynamic value type for the `decode` sub-command
//! and a serde data format for the metainfo and tracker records. The
//! strict decoder and the canonical encoder are inverses, which is what
//! keeps info hashes reproducible.

mod de;
mod decoder;
mod error;
mod ser;
mod value;

pub use de::{from_bytes, from_str, Deserializer};
pub use decoder::{decode, decode_prefix, dict_value_span};
pub use error::{Error, Result};
pub use ser::{to_bytes, to_string, Serializer};
pub use value::{BencodeValue, Dict};

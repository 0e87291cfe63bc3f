use std::collections::BTreeMap;
use std::fmt::{self, Display, Write};

use serde::Serialize;
use serde_bytes::ByteBuf;

pub type Dict = BTreeMap<ByteBuf, BencodeValue>;

/// A decoded bencode value. Byte strings stay raw; `Display` renders
/// the JSON projection used by the `decode` sub-command.
#[derive(Debug, Serialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum BencodeValue {
    Integer(i64),
    Bytes(ByteBuf),
    List(Vec<BencodeValue>),
    Dict(Dict),
}

impl Display for BencodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BencodeValue::Integer(i) => write!(f, "{i}"),
            BencodeValue::Bytes(b) => write_json_string(f, b),
            BencodeValue::List(l) => {
                f.write_char('[')?;
                for (i, value) in l.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_char(']')
            }
            BencodeValue::Dict(d) => {
                f.write_char('{')?;
                for (i, (key, value)) in d.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write_json_string(f, key)?;
                    f.write_char(':')?;
                    write!(f, "{value}")?;
                }
                f.write_char('}')
            }
        }
    }
}

fn write_json_string(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_char('"')?;
    match std::str::from_utf8(bytes) {
        Ok(s) => {
            for c in s.chars() {
                write_escaped(f, c)?;
            }
        }
        // Not text: escape every byte that is not printable ASCII.
        Err(_) => {
            for &b in bytes {
                if b.is_ascii_graphic() || b == b' ' {
                    write_escaped(f, b as char)?;
                } else {
                    write!(f, "\\u{b:04x}")?;
                }
            }
        }
    }
    f.write_char('"')
}

fn write_escaped(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    match c {
        '"' => f.write_str("\\\""),
        '\\' => f.write_str("\\\\"),
        '\n' => f.write_str("\\n"),
        '\r' => f.write_str("\\r"),
        '\t' => f.write_str("\\t"),
        c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32),
        c => f.write_char(c),
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_display_dict() {
        let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        assert_eq!(value.to_string(), r#"{"cow":"moo","spam":"eggs"}"#);
    }

    #[test]
    fn test_display_nested() {
        let value = decode(b"d4:spamli-52ei0eee").unwrap();
        assert_eq!(value.to_string(), r#"{"spam":[-52,0]}"#);
    }

    #[test]
    fn test_display_escapes_non_utf8() {
        let value = BencodeValue::Bytes(ByteBuf::from(vec![b'a', 0xff, 0x01]));
        assert_eq!(value.to_string(), "\"a\\u00ff\\u0001\"");
    }

    #[test]
    fn test_display_escapes_quotes() {
        let value = BencodeValue::Bytes(ByteBuf::from(&br#"a"b\c"#[..]));
        assert_eq!(value.to_string(), r#""a\"b\\c""#);
    }
}

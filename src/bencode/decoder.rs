use std::ops::Range;

use serde_bytes::ByteBuf;

use super::error::{Error, Result};
use super::value::{BencodeValue, Dict};

/// Decode a complete document. Trailing bytes are rejected.
pub fn decode(input: &[u8]) -> Result<BencodeValue> {
    let (value, used) = decode_prefix(input)?;
    if used != input.len() {
        return Err(Error::TrailingBytes);
    }
    Ok(value)
}

/// Decode the first value and report how many bytes it covered.
pub fn decode_prefix(input: &[u8]) -> Result<(BencodeValue, usize)> {
    let mut parser = Parser::strict(input);
    let value = parser.parse_value()?;
    Ok((value, parser.pos))
}

/// Byte range of the value stored under `key` in the document's root
/// dictionary. The range is recorded while parsing the original bytes,
/// so it is exact even when the source is not in canonical form.
pub fn dict_value_span(input: &[u8], key: &[u8]) -> Result<Range<usize>> {
    let mut parser = Parser::lenient(input);
    if parser.next()? != b'd' {
        return Err(Error::InvalidPrefix(input[0] as char));
    }
    while parser.peek()? != b'e' {
        let (entry_key, _) = parser.parse_raw_string()?;
        let start = parser.pos;
        parser.parse_value()?;
        if entry_key == key {
            return Ok(start..parser.pos);
        }
    }
    Err(Error::Message(format!(
        "key `{}` not present in dictionary",
        String::from_utf8_lossy(key)
    )))
}

/// Parse `i<digits>e` at the head of `input`, returning the value and
/// the bytes consumed. `i-0e`, leading zeros and empty digit runs are
/// rejected so that every accepted literal has exactly one encoding.
pub(super) fn take_integer(input: &[u8]) -> Result<(i64, usize)> {
    debug_assert_eq!(input.first(), Some(&b'i'));
    let mut pos = 1;
    let negative = input.get(pos) == Some(&b'-');
    if negative {
        pos += 1;
    }
    let digits_start = pos;
    while input.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
    }
    let digits = &input[digits_start..pos];
    match input.get(pos) {
        Some(b'e') => pos += 1,
        Some(_) => return Err(Error::InvalidInteger),
        None => return Err(Error::Eof),
    }
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
        return Err(Error::InvalidInteger);
    }
    if negative && digits == b"0" {
        return Err(Error::InvalidInteger);
    }
    let mut value: i64 = 0;
    for &d in digits {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(d - b'0')))
            .ok_or(Error::InvalidInteger)?;
    }
    Ok((if negative { -value } else { value }, pos))
}

/// Parse `<len>:<bytes>` at the head of `input`.
pub(super) fn take_bytes(input: &[u8]) -> Result<(&[u8], usize)> {
    let mut pos = 0;
    while input.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
    }
    let digits = &input[..pos];
    match input.get(pos) {
        Some(b':') => pos += 1,
        Some(_) => return Err(Error::InvalidLength),
        None => return Err(Error::Eof),
    }
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
        return Err(Error::InvalidLength);
    }
    let mut len: usize = 0;
    for &d in digits {
        len = len
            .checked_mul(10)
            .and_then(|l| l.checked_add(usize::from(d - b'0')))
            .ok_or(Error::InvalidLength)?;
    }
    let end = pos.checked_add(len).ok_or(Error::InvalidLength)?;
    if end > input.len() {
        return Err(Error::Eof);
    }
    Ok((&input[pos..end], end))
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    /// Strict parsers reject unsorted and duplicate dictionary keys,
    /// which makes `encode(decode(x)) == x` hold for every accepted `x`.
    strict: bool,
}

impl<'a> Parser<'a> {
    fn strict(input: &'a [u8]) -> Self {
        Parser {
            input,
            pos: 0,
            strict: true,
        }
    }

    fn lenient(input: &'a [u8]) -> Self {
        Parser {
            input,
            pos: 0,
            strict: false,
        }
    }

    fn peek(&self) -> Result<u8> {
        self.input.get(self.pos).copied().ok_or(Error::Eof)
    }

    fn next(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn parse_value(&mut self) -> Result<BencodeValue> {
        match self.peek()? {
            b'i' => {
                let (value, used) = take_integer(&self.input[self.pos..])?;
                self.pos += used;
                Ok(BencodeValue::Integer(value))
            }
            b'0'..=b'9' => {
                let (bytes, _) = self.parse_raw_string()?;
                Ok(BencodeValue::Bytes(ByteBuf::from(bytes)))
            }
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            other => Err(Error::InvalidPrefix(other as char)),
        }
    }

    fn parse_raw_string(&mut self) -> Result<(&'a [u8], usize)> {
        let (bytes, used) = take_bytes(&self.input[self.pos..])?;
        self.pos += used;
        Ok((bytes, used))
    }

    fn parse_list(&mut self) -> Result<BencodeValue> {
        self.next()?;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.parse_value()?);
        }
        self.pos += 1;
        Ok(BencodeValue::List(items))
    }

    fn parse_dict(&mut self) -> Result<BencodeValue> {
        self.next()?;
        let mut dict = Dict::new();
        let mut last_key: Option<&[u8]> = None;
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(Error::NonStringKey);
            }
            let (key, _) = self.parse_raw_string()?;
            if self.strict {
                match last_key {
                    Some(prev) if key == prev => return Err(Error::DuplicateKey),
                    Some(prev) if key < prev => return Err(Error::UnsortedKeys),
                    _ => {}
                }
                last_key = Some(key);
            }
            let value = self.parse_value()?;
            dict.insert(ByteBuf::from(key), value);
        }
        self.pos += 1;
        Ok(BencodeValue::Dict(dict))
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::to_bytes;

    #[test]
    fn test_integers() {
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
        assert_eq!(decode(b"i52e").unwrap(), BencodeValue::Integer(52));
        assert_eq!(decode(b"i-52e").unwrap(), BencodeValue::Integer(-52));
        assert_eq!(decode(b"i-0e"), Err(Error::InvalidInteger));
        assert_eq!(decode(b"i03e"), Err(Error::InvalidInteger));
        assert_eq!(decode(b"ie"), Err(Error::InvalidInteger));
        assert_eq!(decode(b"i12"), Err(Error::Eof));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            decode(b"5:hello").unwrap(),
            BencodeValue::Bytes(ByteBuf::from(&b"hello"[..]))
        );
        assert_eq!(
            decode(b"0:").unwrap(),
            BencodeValue::Bytes(ByteBuf::from(Vec::new()))
        );
        assert_eq!(decode(b"5:hell"), Err(Error::Eof));
        assert_eq!(decode(b"05:hello"), Err(Error::InvalidLength));
    }

    #[test]
    fn test_dict_strictness() {
        assert!(decode(b"d3:fooi1e3:zari2ee").is_ok());
        assert_eq!(decode(b"d3:zari2e3:fooi1ee"), Err(Error::UnsortedKeys));
        assert_eq!(decode(b"d3:fooi1e3:fooi2ee"), Err(Error::DuplicateKey));
        assert_eq!(decode(b"di1ei2ee"), Err(Error::NonStringKey));
    }

    #[test]
    fn test_trailing_bytes() {
        assert_eq!(decode(b"i5espam"), Err(Error::TrailingBytes));
        let (value, used) = decode_prefix(b"i5espam").unwrap();
        assert_eq!(value, BencodeValue::Integer(5));
        assert_eq!(used, 3);
    }

    #[test]
    fn test_roundtrip_is_identity() {
        for input in [
            &b"i0e"[..],
            b"i-52e",
            b"5:hello",
            b"le",
            b"li5e5:helloe",
            b"d3:cow3:moo4:spam4:eggse",
            b"d4:spamli-52ei0eee",
        ] {
            let value = decode(input).unwrap();
            assert_eq!(to_bytes(&value).unwrap(), input);
        }
    }

    #[test]
    fn test_dict_value_span() {
        let doc = &b"d8:announce3:url4:infod3:fooi1eee"[..];
        let span = dict_value_span(doc, b"info").unwrap();
        assert_eq!(&doc[span], b"d3:fooi1ee");
        assert!(dict_value_span(doc, b"nope").is_err());
    }

    #[test]
    fn test_dict_value_span_tolerates_unsorted_source() {
        let doc = &b"d4:infod3:fooi1ee8:announce3:urle"[..];
        assert_eq!(decode(doc), Err(Error::UnsortedKeys));
        let span = dict_value_span(doc, b"info").unwrap();
        assert_eq!(&doc[span], b"d3:fooi1ee");
    }
}

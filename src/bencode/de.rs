use serde::de::{self, Deserialize};
use serde::forward_to_deserialize_any;

use super::decoder::{take_bytes, take_integer};
use super::error::{Error, Result};

/// Typed deserialiser over a bencoded byte slice. Dictionary keys the
/// target record does not declare are skipped; missing required fields
/// and wrongly typed values surface through [`Error`].
pub struct Deserializer<'de> {
    input: &'de [u8],
}

impl<'de> Deserializer<'de> {
    pub fn from_bytes(input: &'de [u8]) -> Self {
        Deserializer { input }
    }
}

pub fn from_bytes<'a, T>(b: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    let mut deserializer = Deserializer::from_bytes(b);
    let t = T::deserialize(&mut deserializer)?;
    if deserializer.input.is_empty() {
        Ok(t)
    } else {
        Err(Error::TrailingBytes)
    }
}

pub fn from_str<'a, T>(s: &'a str) -> Result<T>
where
    T: Deserialize<'a>,
{
    from_bytes(s.as_bytes())
}

impl<'de> Deserializer<'de> {
    fn peek_byte(&self) -> Result<u8> {
        self.input.first().copied().ok_or(Error::Eof)
    }

    fn next_byte(&mut self) -> Result<u8> {
        let b = self.peek_byte()?;
        self.input = &self.input[1..];
        Ok(b)
    }

    fn parse_signed(&mut self) -> Result<i64> {
        if self.peek_byte()? != b'i' {
            return Err(Error::InvalidInteger);
        }
        let (value, used) = take_integer(self.input)?;
        self.input = &self.input[used..];
        Ok(value)
    }

    fn parse_bytes(&mut self) -> Result<&'de [u8]> {
        let (bytes, used) = take_bytes(self.input)?;
        self.input = &self.input[used..];
        Ok(bytes)
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.peek_byte()? {
            b'0'..=b'9' => self.deserialize_byte_buf(visitor),
            b'i' => self.deserialize_i64(visitor),
            b'l' => self.deserialize_seq(visitor),
            b'd' => self.deserialize_map(visitor),
            other => Err(Error::InvalidPrefix(other as char)),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes option struct tuple tuple_struct newtype_struct unit unit_struct
        enum
    }

    fn deserialize_i64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_i64(self.parse_signed()?)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.parse_bytes()?)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        if self.next_byte()? != b'l' {
            return Err(Error::InvalidPrefix('l'));
        }
        let value = visitor.visit_seq(Seq::new(self))?;
        if self.next_byte()? == b'e' {
            Ok(value)
        } else {
            Err(Error::TrailingBytes)
        }
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        if self.next_byte()? != b'd' {
            return Err(Error::InvalidPrefix('d'));
        }
        let value = visitor.visit_map(Map::new(self))?;
        if self.next_byte()? == b'e' {
            Ok(value)
        } else {
            Err(Error::TrailingBytes)
        }
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_any(visitor)
    }
}

struct Seq<'a, 'de: 'a> {
    de: &'a mut Deserializer<'de>,
}

impl<'a, 'de> Seq<'a, 'de> {
    fn new(de: &'a mut Deserializer<'de>) -> Self {
        Seq { de }
    }
}

impl<'de, 'a> de::SeqAccess<'de> for Seq<'a, 'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: de::DeserializeSeed<'de>,
    {
        if self.de.peek_byte()? == b'e' {
            return Ok(None);
        }
        seed.deserialize(&mut *self.de).map(Some)
    }
}

struct Map<'a, 'de: 'a> {
    de: &'a mut Deserializer<'de>,
}

impl<'a, 'de> Map<'a, 'de> {
    fn new(de: &'a mut Deserializer<'de>) -> Self {
        Map { de }
    }
}

impl<'de, 'a> de::MapAccess<'de> for Map<'a, 'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        if self.de.peek_byte()? == b'e' {
            return Ok(None);
        }
        if !self.de.peek_byte()?.is_ascii_digit() {
            return Err(Error::NonStringKey);
        }
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.de)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use serde_bytes::ByteBuf;

    #[test]
    fn test_int() {
        assert_eq!(5i64, from_str("i5e").unwrap());
        assert_eq!(-5i64, from_str("i-5e").unwrap());
    }

    #[test]
    fn test_strict_integers() {
        assert_eq!(from_str::<i64>("i-0e"), Err(Error::InvalidInteger));
        assert_eq!(from_str::<i64>("i03e"), Err(Error::InvalidInteger));
        assert_eq!(from_str::<i64>("i0e"), Ok(0));
    }

    #[test]
    fn test_bytes() {
        let actual: ByteBuf = from_str("4:spam").unwrap();
        assert_eq!(b"spam".to_vec(), *actual);
    }

    #[test]
    fn test_list() {
        let actual: (i64, i64) = from_str("li5ei6ee").unwrap();
        assert_eq!((5, 6), actual);
    }

    #[test]
    fn test_struct_skips_unknown_keys() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Test {
            int: i64,
        }

        let actual: Test = from_str("d5:extrali1eli2eee3:inti7e5:other5:abcdee").unwrap();
        assert_eq!(actual, Test { int: 7 });
    }

    #[test]
    fn test_missing_field() {
        #[derive(serde::Deserialize, Debug)]
        struct Test {
            #[allow(dead_code)]
            int: i64,
        }

        assert_eq!(
            from_str::<Test>("de").unwrap_err(),
            Error::MissingField("int")
        );
    }

    #[test]
    fn test_trailing_input() {
        assert_eq!(from_str::<i64>("i5ei6e"), Err(Error::TrailingBytes));
    }
}

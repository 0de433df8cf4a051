use crate::fmt::format_float;
use crate::ValueError;

/// A typed primitive as it appears in instruction bodies and entry tables.
///
/// Each variant corresponds to one format tag:
/// `b` unsigned byte, `c` signed byte, `u`/`s` 16-bit, `U`/`S` 32-bit,
/// `f`/`d` floats, `z` NUL-terminated text, `m` length-delimited opaque
/// bytes. Multi-byte encodings are little-endian.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// `b`: unsigned byte.
    U8(u8),
    /// `c`: signed byte.
    I8(i8),
    /// `u`: unsigned 16-bit.
    U16(u16),
    /// `s`: signed 16-bit.
    I16(i16),
    /// `U`: unsigned 32-bit.
    U32(u32),
    /// `S`: signed 32-bit.
    I32(i32),
    /// `f`: IEEE-754 binary32.
    F32(f32),
    /// `d`: IEEE-754 binary64.
    F64(f64),
    /// `z`: text.
    Str(String),
    /// `m`: opaque bytes.
    Blob(Vec<u8>),
}

/// Reader callback driving [`Value::list_from_data`]. Implementations decode
/// one value of the given tag from the front of the buffer and return it
/// together with the number of bytes consumed.
pub trait ValueReader: FnMut(&[u8], char) -> Result<(Value, usize), ValueError> {}

impl<T> ValueReader for T where T: FnMut(&[u8], char) -> Result<(Value, usize), ValueError> {}

macro_rules! read_fixed {
    ($data:expr, $tag:expr, $t:ty) => {{
        const N: usize = std::mem::size_of::<$t>();
        if $data.len() < N {
            return Err(ValueError::ShortRead {
                tag: $tag,
                wanted: N,
                remaining: $data.len(),
            });
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&$data[..N]);
        (<$t>::from_le_bytes(buf), N)
    }};
}

impl Value {
    /// The format tag this value serializes as.
    pub fn tag(&self) -> char {
        match self {
            Value::U8(_) => 'b',
            Value::I8(_) => 'c',
            Value::U16(_) => 'u',
            Value::I16(_) => 's',
            Value::U32(_) => 'U',
            Value::I32(_) => 'S',
            Value::F32(_) => 'f',
            Value::F64(_) => 'd',
            Value::Str(_) => 'z',
            Value::Blob(_) => 'm',
        }
    }

    /// Decode one value of `tag` from the front of `data`.
    ///
    /// `z` and `m` consume the whole remaining buffer; the caller bounds the
    /// slice. For `z` the text stops at the first NUL.
    pub fn from_data(data: &[u8], tag: char) -> Result<(Value, usize), ValueError> {
        Ok(match tag {
            'b' => {
                let (v, n) = read_fixed!(data, tag, u8);
                (Value::U8(v), n)
            }
            'c' => {
                let (v, n) = read_fixed!(data, tag, i8);
                (Value::I8(v), n)
            }
            'u' => {
                let (v, n) = read_fixed!(data, tag, u16);
                (Value::U16(v), n)
            }
            's' => {
                let (v, n) = read_fixed!(data, tag, i16);
                (Value::I16(v), n)
            }
            'U' => {
                let (v, n) = read_fixed!(data, tag, u32);
                (Value::U32(v), n)
            }
            'S' => {
                let (v, n) = read_fixed!(data, tag, i32);
                (Value::I32(v), n)
            }
            'f' => {
                let (v, n) = read_fixed!(data, tag, f32);
                (Value::F32(v), n)
            }
            'd' => {
                let (v, n) = read_fixed!(data, tag, f64);
                (Value::F64(v), n)
            }
            'z' => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let text = String::from_utf8_lossy(&data[..end]).into_owned();
                (Value::Str(text), data.len())
            }
            'm' => (Value::Blob(data.to_vec()), data.len()),
            other => return Err(ValueError::InvalidTag(other)),
        })
    }

    /// Append the wire encoding of this value to `out`.
    pub fn to_data(&self, out: &mut Vec<u8>) {
        match self {
            Value::U8(v) => out.push(*v),
            Value::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Str(v) => out.extend_from_slice(v.as_bytes()),
            Value::Blob(v) => out.extend_from_slice(v),
        }
    }

    /// Number of bytes [`Value::to_data`] will emit.
    pub fn wire_size(&self) -> usize {
        match self {
            Value::U8(_) | Value::I8(_) => 1,
            Value::U16(_) | Value::I16(_) => 2,
            Value::U32(_) | Value::I32(_) | Value::F32(_) => 4,
            Value::F64(_) => 8,
            Value::Str(v) => v.len(),
            Value::Blob(v) => v.len(),
        }
    }

    /// Parse a value of `tag` from text.
    ///
    /// Integer tags accept decimal with optional sign; `f` accepts an
    /// optional trailing `f` suffix.
    pub fn from_text(text: &str, tag: char) -> Result<Value, ValueError> {
        let bad = || ValueError::BadText {
            tag,
            text: text.to_owned(),
        };

        Ok(match tag {
            'b' => Value::U8(text.parse().map_err(|_| bad())?),
            'c' => Value::I8(text.parse().map_err(|_| bad())?),
            'u' => Value::U16(text.parse().map_err(|_| bad())?),
            's' => Value::I16(text.parse().map_err(|_| bad())?),
            'U' => Value::U32(text.parse().map_err(|_| bad())?),
            'S' => Value::I32(text.parse().map_err(|_| bad())?),
            'f' => {
                let text = text.strip_suffix(['f', 'F']).unwrap_or(text);
                Value::F32(text.parse().map_err(|_| bad())?)
            }
            'd' => Value::F64(text.parse().map_err(|_| bad())?),
            'z' => Value::Str(text.to_owned()),
            'm' => Value::Blob(text.as_bytes().to_vec()),
            other => return Err(ValueError::InvalidTag(other)),
        })
    }

    /// Render this value as source text. Floats get an `f` suffix; `z` is
    /// returned unquoted (quoting belongs to the statement printer).
    pub fn to_text(&self) -> String {
        match self {
            Value::U8(v) => v.to_string(),
            Value::I8(v) => v.to_string(),
            Value::U16(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::F32(v) => format!("{}f", format_float(*v)),
            Value::F64(v) => format!("{v}"),
            Value::Str(v) => v.clone(),
            Value::Blob(v) => String::from_utf8_lossy(v).into_owned(),
        }
    }

    /// The integral content of this value, if it has one.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::U8(v) => Some(i32::from(*v)),
            Value::I8(v) => Some(i32::from(*v)),
            Value::U16(v) => Some(i32::from(*v)),
            Value::I16(v) => Some(i32::from(*v)),
            Value::U32(v) => Some(*v as i32),
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// The float content of this value, if it is an `f`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// The text content of this value, if it is a `z`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Decode a list of values from `data`, driven by `format`.
    ///
    /// Each character of `format` names a tag read once, except for two
    /// prefix modifiers: `*X` repeats `X` greedily until the buffer is
    /// exhausted, and `?X` silently drops `X` when no bytes remain. Bytes
    /// left over once the format string is spent are an error.
    ///
    /// `read_one` decodes a single tag; languages with extra tags (`o`, `D`,
    /// length-prefixed strings) wrap [`Value::from_data`] with their own
    /// reader.
    pub fn list_from_data<F: ValueReader>(
        mut read_one: F,
        mut data: &[u8],
        format: &str,
    ) -> Result<Vec<Value>, ValueError> {
        let mut values = Vec::new();
        let mut chars = format.chars().peekable();

        while let Some(f) = chars.next() {
            let (tag, repeat, optional) = match f {
                '*' => (chars.next().ok_or(ValueError::InvalidTag('*'))?, true, false),
                '?' => (chars.next().ok_or(ValueError::InvalidTag('?'))?, false, true),
                other => (other, false, false),
            };

            if data.is_empty() && (repeat || optional) {
                continue;
            }

            loop {
                let (value, consumed) = read_one(data, tag)?;
                data = &data[consumed..];
                values.push(value);
                if !repeat || data.is_empty() {
                    break;
                }
            }
        }

        if !data.is_empty() {
            return Err(ValueError::TrailingData(data.len(), format.to_owned()));
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case('b', Value::U8(0xfe))]
    #[case('c', Value::I8(-2))]
    #[case('u', Value::U16(40000))]
    #[case('s', Value::I16(-12345))]
    #[case('U', Value::U32(0xdead_beef))]
    #[case('S', Value::I32(-123_456_789))]
    #[case('f', Value::F32(1.5))]
    #[case('d', Value::F64(-0.125))]
    fn fixed_width_binary_round_trip(#[case] tag: char, #[case] value: Value) {
        let mut wire = Vec::new();
        value.to_data(&mut wire);
        assert_eq!(wire.len(), value.wire_size());

        let (back, consumed) = Value::from_data(&wire, tag).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(back, value);
    }

    #[rstest]
    #[case('b', Value::U8(255))]
    #[case('c', Value::I8(-128))]
    #[case('s', Value::I16(-1))]
    #[case('U', Value::U32(4_000_000_000))]
    #[case('S', Value::I32(-17))]
    #[case('f', Value::F32(0.25))]
    #[case('z', Value::Str("stage1.anm".into()))]
    fn text_round_trip(#[case] tag: char, #[case] value: Value) {
        let text = value.to_text();
        assert_eq!(Value::from_text(&text, tag).unwrap(), value);
    }

    #[test]
    fn float_text_carries_suffix() {
        assert_eq!(Value::F32(16.0).to_text(), "16.0f");
        assert_eq!(Value::from_text("16.0f", 'f').unwrap(), Value::F32(16.0));
    }

    #[test]
    fn short_read_reports_sizes() {
        let err = Value::from_data(&[1, 2], 'S').unwrap_err();
        match err {
            ValueError::ShortRead { tag, wanted, remaining } => {
                assert_eq!((tag, wanted, remaining), ('S', 4, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn list_parses_a_plain_format() {
        let mut data = Vec::new();
        Value::I32(7).to_data(&mut data);
        Value::F32(2.0).to_data(&mut data);
        Value::F32(3.0).to_data(&mut data);

        let values = Value::list_from_data(Value::from_data, &data, "Sff").unwrap();
        assert_eq!(
            values,
            vec![Value::I32(7), Value::F32(2.0), Value::F32(3.0)]
        );
    }

    #[test]
    fn star_repeats_until_exhausted() {
        let mut data = Vec::new();
        for v in [1, 2, 3, 4] {
            Value::I32(v).to_data(&mut data);
        }
        let values = Value::list_from_data(Value::from_data, &data, "*S").unwrap();
        assert_eq!(values.len(), 4);

        // An empty tail yields zero repeats rather than an error.
        let values = Value::list_from_data(Value::from_data, &[], "*S").unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn question_mark_drops_missing_tail() {
        let mut data = Vec::new();
        Value::I16(9).to_data(&mut data);
        let values = Value::list_from_data(Value::from_data, &data, "s?S").unwrap();
        assert_eq!(values, vec![Value::I16(9)]);
    }

    #[test]
    fn leftover_bytes_are_an_error() {
        let mut data = Vec::new();
        Value::I32(1).to_data(&mut data);
        data.push(0xcc);
        let err = Value::list_from_data(Value::from_data, &data, "S").unwrap_err();
        assert!(matches!(err, ValueError::TrailingData(1, _)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn signed_text_round_trips(v: i32) {
                let value = Value::I32(v);
                prop_assert_eq!(Value::from_text(&value.to_text(), 'S').unwrap(), value);
            }

            #[test]
            fn unsigned_text_round_trips(v: u32) {
                let value = Value::U32(v);
                prop_assert_eq!(Value::from_text(&value.to_text(), 'U').unwrap(), value);
            }

            #[test]
            fn float_text_round_trips(v: f32) {
                prop_assume!(v.is_finite());
                let value = Value::F32(v);
                prop_assert_eq!(Value::from_text(&value.to_text(), 'f').unwrap(), value);
            }

            #[test]
            fn double_text_round_trips(v: f64) {
                prop_assume!(v.is_finite());
                let value = Value::F64(v);
                prop_assert_eq!(Value::from_text(&value.to_text(), 'd').unwrap(), value);
            }
        }
    }
}

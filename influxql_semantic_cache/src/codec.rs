//! Binary encoding of query results for the cache store.
//!
//! Each table is written as its semantic key text, a space, the big-endian `i64` length of its
//! row data and a `\r\n` terminator, followed by the rows. Every row is the concatenation of its
//! column values, each written at a width fixed by the column's data type, and ends with
//! `\r\n`. The stream is closed by a final `\r\n`.
//!
//! | type      | encoding                                            |
//! |-----------|-----------------------------------------------------|
//! | `bool`    | 1 byte, `0` or `1`                                  |
//! | `int64`   | 8 bytes, big-endian                                 |
//! | `float64` | 8 bytes, big-endian IEEE-754 bits                   |
//! | `string`  | 25 zero-padded bytes, or a `u16` length and bytes   |
//!
//! The timestamp column is always written as `int64` nanoseconds, whatever its representation in
//! the encoded result. Nulls are written as the zero value of their column type.
//!
//! An empty result is encoded as the literal `empty response`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::key::{KeyError, SemanticKey};
use crate::model::{DataType, QueryResult, Table, Value};

/// The payload of an empty result.
pub const EMPTY_RESPONSE: &[u8] = b"empty response";

/// Terminates the table header, every row, and the stream.
const TERMINATOR: &[u8] = b"\r\n";

/// Width of a fixed-width string value.
pub const STRING_WIDTH: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{keys} semantic keys given for {tables} tables")]
    KeyCountMismatch { keys: usize, tables: usize },

    #[error("expected {expected} columns, found {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("cannot encode {value:?} as {datatype}")]
    Conversion { value: Value, datatype: DataType },

    #[error("truncated payload reading {what}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("row data of {length} bytes does not hold whole rows")]
    LengthMismatch { length: i64 },

    #[error("missing terminator after {what}")]
    MissingTerminator { what: &'static str },

    #[error("invalid semantic key in payload: {source}")]
    InvalidKey {
        #[from]
        source: KeyError,
    },

    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),

    #[error("invalid UTF-8 in payload: {source}")]
    InvalidUtf8 {
        #[from]
        source: std::str::Utf8Error,
    },

    #[error("{len} trailing bytes after end of payload")]
    TrailingBytes { len: usize },
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// How string values are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringEncoding {
    /// Truncated or zero-padded to [`STRING_WIDTH`] bytes. Trailing NUL bytes do not survive.
    #[default]
    FixedWidth,
    /// A big-endian `u16` byte length followed by the bytes, truncated to `u16::MAX`.
    LengthPrefixed,
}

/// Truncate `s` to at most `max` bytes on a character boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split `n` bytes off the front of `buf`.
fn take<'a>(buf: &mut &'a [u8], n: usize, what: &'static str) -> Result<&'a [u8]> {
    let Some((head, tail)) = buf.split_at_checked(n) else {
        return Err(CodecError::Truncated {
            what,
            needed: n,
            remaining: buf.len(),
        });
    };
    *buf = tail;
    Ok(head)
}

fn expect_terminator(buf: &mut &[u8], what: &'static str) -> Result<()> {
    match buf.strip_prefix(TERMINATOR) {
        Some(rest) => {
            *buf = rest;
            Ok(())
        }
        None => Err(CodecError::MissingTerminator { what }),
    }
}

/// The offset of the first space not escaped by a backslash.
fn key_end(buf: &[u8]) -> Option<usize> {
    let mut escaped = false;
    for (i, b) in buf.iter().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b' ' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Encodes and decodes query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Codec {
    string_encoding: StringEncoding,
}

impl Codec {
    pub fn new(string_encoding: StringEncoding) -> Self {
        Self { string_encoding }
    }

    pub fn string_encoding(&self) -> StringEncoding {
        self.string_encoding
    }

    /// Encode `result` using one semantic key per table, as returned by
    /// [`build_table_keys`](crate::key::build_table_keys).
    pub fn encode(&self, result: &QueryResult, keys: &[SemanticKey]) -> Result<Bytes> {
        if result.is_empty() {
            return Ok(Bytes::from_static(EMPTY_RESPONSE));
        }
        if keys.len() != result.tables.len() {
            return Err(CodecError::KeyCountMismatch {
                keys: keys.len(),
                tables: result.tables.len(),
            });
        }

        let mut buf = BytesMut::new();
        for (table, key) in result.tables.iter().zip(keys) {
            self.encode_table(&mut buf, table, key)?;
        }
        buf.put_slice(TERMINATOR);
        Ok(buf.freeze())
    }

    fn encode_table(&self, buf: &mut BytesMut, table: &Table, key: &SemanticKey) -> Result<()> {
        let types = key.column_types();
        if table.columns.len() != types.len() {
            return Err(CodecError::ColumnCountMismatch {
                expected: types.len(),
                actual: table.columns.len(),
            });
        }

        let mut rows = BytesMut::new();
        for row in &table.rows {
            if row.len() != types.len() {
                return Err(CodecError::ColumnCountMismatch {
                    expected: types.len(),
                    actual: row.len(),
                });
            }
            let mut values = row.iter().zip(&types);
            if let Some((time, _)) = values.next() {
                let ts = time.timestamp_nanos().ok_or_else(|| CodecError::Conversion {
                    value: time.clone(),
                    datatype: DataType::Int64,
                })?;
                rows.put_i64(ts);
            }
            for (value, datatype) in values {
                self.encode_value(&mut rows, value, *datatype)?;
            }
            rows.put_slice(TERMINATOR);
        }

        buf.put_slice(key.to_string().as_bytes());
        buf.put_u8(b' ');
        // a BytesMut never holds more than isize::MAX bytes
        buf.put_i64(rows.len() as i64);
        buf.put_slice(TERMINATOR);
        buf.put_slice(&rows);
        Ok(())
    }

    /// Append `value` as a column of type `datatype`.
    pub fn encode_value(&self, buf: &mut BytesMut, value: &Value, datatype: DataType) -> Result<()> {
        let conversion = || CodecError::Conversion {
            value: value.clone(),
            datatype,
        };

        match (datatype, value) {
            (DataType::Bool, Value::Bool(b)) => buf.put_u8(u8::from(*b)),
            (DataType::Bool, Value::Null) => buf.put_u8(0),
            (DataType::Int64, Value::Int64(v)) => buf.put_i64(*v),
            (DataType::Int64, Value::Float64(v)) if v.fract() == 0.0 => buf.put_i64(*v as i64),
            (DataType::Int64, Value::Null) => buf.put_i64(0),
            (DataType::Float64, Value::Float64(v)) => buf.put_f64(*v),
            (DataType::Float64, Value::Int64(v)) => buf.put_f64(*v as f64),
            (DataType::Float64, Value::Null) => buf.put_f64(0.0),
            (DataType::String, Value::String(s)) => self.encode_str(buf, s),
            (DataType::String, Value::Null) => self.encode_str(buf, ""),
            _ => return Err(conversion()),
        }
        Ok(())
    }

    fn encode_str(&self, buf: &mut BytesMut, s: &str) {
        match self.string_encoding {
            StringEncoding::FixedWidth => {
                let s = truncate(s, STRING_WIDTH);
                buf.put_slice(s.as_bytes());
                buf.put_bytes(0, STRING_WIDTH - s.len());
            }
            StringEncoding::LengthPrefixed => {
                let s = truncate(s, u16::MAX as usize);
                buf.put_u16(s.len() as u16);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    /// Decode a payload produced by [`Codec::encode`].
    pub fn decode(&self, payload: &[u8]) -> Result<QueryResult> {
        if payload == EMPTY_RESPONSE {
            return Ok(QueryResult::default());
        }

        let mut buf = payload;
        let mut tables = Vec::new();
        loop {
            if buf.is_empty() {
                return Err(CodecError::MissingTerminator { what: "payload" });
            }
            if let Some(rest) = buf.strip_prefix(TERMINATOR) {
                if !rest.is_empty() {
                    return Err(CodecError::TrailingBytes { len: rest.len() });
                }
                break;
            }
            tables.push(self.decode_table(&mut buf)?);
        }

        Ok(QueryResult::new(tables))
    }

    fn decode_table(&self, buf: &mut &[u8]) -> Result<Table> {
        let end = key_end(buf).ok_or(CodecError::Truncated {
            what: "semantic key",
            needed: buf.len() + 1,
            remaining: buf.len(),
        })?;
        let key: SemanticKey = std::str::from_utf8(take(buf, end, "semantic key")?)?.parse()?;
        take(buf, 1, "key separator")?;

        let length = take(buf, 8, "row data length")?.get_i64();
        expect_terminator(buf, "table header")?;
        let size = usize::try_from(length).map_err(|_| CodecError::LengthMismatch { length })?;
        let mut data = take(buf, size, "row data")?;

        let types = key.column_types();
        let mut rows = Vec::new();
        while !data.is_empty() {
            let mut row = Vec::with_capacity(types.len());
            for datatype in &types {
                let value = self
                    .decode_value(&mut data, *datatype)
                    .map_err(|e| match e {
                        CodecError::Truncated { .. } => CodecError::LengthMismatch { length },
                        e => e,
                    })?;
                row.push(value);
            }
            expect_terminator(&mut data, "row")?;
            rows.push(row);
        }

        let mut table = Table::new(key.measurement().unwrap_or_default())
            .with_columns(key.column_names());
        if let Some(segment) = key.segments.first() {
            for (tag, value) in segment.equality_tags() {
                table = table.with_tag(tag, value);
            }
        }
        table.rows = rows;
        Ok(table)
    }

    /// Read one value of type `datatype` from the front of `buf`.
    pub fn decode_value(&self, buf: &mut &[u8], datatype: DataType) -> Result<Value> {
        Ok(match datatype {
            DataType::Bool => match take(buf, 1, "bool")?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                b => return Err(CodecError::InvalidBool(b)),
            },
            DataType::Int64 => Value::Int64(take(buf, 8, "int64")?.get_i64()),
            DataType::Float64 => Value::Float64(take(buf, 8, "float64")?.get_f64()),
            DataType::String => {
                let bytes = match self.string_encoding {
                    StringEncoding::FixedWidth => {
                        let bytes = take(buf, STRING_WIDTH, "string")?;
                        let len = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                        &bytes[..len]
                    }
                    StringEncoding::LengthPrefixed => {
                        let len = take(buf, 2, "string length")?.get_u16();
                        take(buf, len as usize, "string")?
                    }
                };
                Value::String(std::str::from_utf8(bytes)?.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{ColumnSpec, Segment, TagEntry};
    use crate::parser::ComparisonOperator;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const TS: i64 = 1_566_086_400_000_000_000;

    fn key(location: Option<&str>, fields: &[(&str, DataType)]) -> SemanticKey {
        let entries = location
            .map(|l| vec![TagEntry::new("location", ComparisonOperator::Eq, l)])
            .unwrap_or_default();
        SemanticKey {
            segments: vec![Segment::new("h2o_feet", entries)],
            fields: fields
                .iter()
                .map(|(name, dt)| ColumnSpec::new(*name, *dt))
                .collect(),
            predicates: vec![],
            aggregation: None,
            interval: None,
        }
    }

    fn encode_one(codec: &Codec, value: Value, datatype: DataType) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec.encode_value(&mut buf, &value, datatype).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_bool() {
        let codec = Codec::default();
        assert_eq!(encode_one(&codec, Value::Bool(true), DataType::Bool), vec![1]);
        assert_eq!(encode_one(&codec, Value::Bool(false), DataType::Bool), vec![0]);
        assert_eq!(
            codec.decode_value(&mut [1u8].as_slice(), DataType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            codec.decode_value(&mut [0u8].as_slice(), DataType::Bool).unwrap(),
            Value::Bool(false)
        );
        assert_matches!(
            codec.decode_value(&mut [7u8].as_slice(), DataType::Bool),
            Err(CodecError::InvalidBool(7))
        );
    }

    #[test]
    fn test_numbers() {
        let codec = Codec::default();
        assert_eq!(
            encode_one(&codec, Value::Int64(-2), DataType::Int64),
            (-2i64).to_be_bytes()
        );
        assert_eq!(
            encode_one(&codec, Value::Float64(8.12), DataType::Float64),
            8.12f64.to_bits().to_be_bytes()
        );
        // integers widen to floats, integral floats narrow to integers
        assert_eq!(
            encode_one(&codec, Value::Int64(2), DataType::Float64),
            2f64.to_bits().to_be_bytes()
        );
        assert_eq!(
            encode_one(&codec, Value::Float64(3.0), DataType::Int64),
            3i64.to_be_bytes()
        );
        assert_eq!(encode_one(&codec, Value::Null, DataType::Int64), [0; 8]);

        let mut buf = BytesMut::new();
        assert_matches!(
            codec.encode_value(&mut buf, &Value::Float64(3.5), DataType::Int64),
            Err(CodecError::Conversion { datatype: DataType::Int64, .. })
        );
        assert_matches!(
            codec.encode_value(&mut buf, &Value::from("x"), DataType::Bool),
            Err(CodecError::Conversion { .. })
        );
    }

    #[test]
    fn test_fixed_width_strings() {
        let codec = Codec::default();
        let encoded = encode_one(&codec, "below 3 feet".into(), DataType::String);
        assert_eq!(encoded.len(), STRING_WIDTH);
        assert_eq!(&encoded[..12], b"below 3 feet");
        assert!(encoded[12..].iter().all(|b| *b == 0));
        assert_eq!(
            codec.decode_value(&mut encoded.as_slice(), DataType::String).unwrap(),
            Value::from("below 3 feet")
        );

        // truncated on a character boundary
        let long = "at or greater than 9 feet µ";
        let encoded = encode_one(&codec, long.into(), DataType::String);
        assert_eq!(encoded.len(), STRING_WIDTH);
        assert_eq!(
            codec.decode_value(&mut encoded.as_slice(), DataType::String).unwrap(),
            Value::from("at or greater than 9 feet")
        );
        assert_eq!(truncate("aaaaaaaaaaaaaaaaaaaaaaaµ", 24), "aaaaaaaaaaaaaaaaaaaaaaa");
    }

    #[test]
    fn test_length_prefixed_strings() {
        let codec = Codec::new(StringEncoding::LengthPrefixed);
        let long = "at or greater than 9 feet and rising";
        let encoded = encode_one(&codec, long.into(), DataType::String);
        assert_eq!(encoded.len(), 2 + long.len());
        assert_eq!(&encoded[..2], (long.len() as u16).to_be_bytes());
        assert_eq!(
            codec.decode_value(&mut encoded.as_slice(), DataType::String).unwrap(),
            Value::from(long)
        );
    }

    #[test]
    fn test_table_layout() {
        let codec = Codec::default();
        let key = key(Some("coyote_creek"), &[("water_level", DataType::Float64)]);
        let result = QueryResult::new(vec![
            Table::new("h2o_feet")
                .with_tag("location", "coyote_creek")
                .with_columns(["time", "water_level"])
                .with_row(vec!["2019-08-18T00:00:00Z".into(), Value::Float64(8.12)]),
        ]);

        let encoded = codec.encode(&result, &[key.clone()]).unwrap();

        let mut expected = key.to_string().into_bytes();
        expected.push(b' ');
        expected.extend_from_slice(&18i64.to_be_bytes());
        expected.extend_from_slice(b"\r\n");
        expected.extend_from_slice(&TS.to_be_bytes());
        expected.extend_from_slice(&8.12f64.to_bits().to_be_bytes());
        expected.extend_from_slice(b"\r\n");
        expected.extend_from_slice(b"\r\n");
        assert_eq!(encoded.as_ref(), expected.as_slice());

        // string timestamps come back as nanoseconds
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(
            decoded,
            QueryResult::new(vec![
                Table::new("h2o_feet")
                    .with_tag("location", "coyote_creek")
                    .with_columns(["time", "water_level"])
                    .with_row(vec![Value::Int64(TS), Value::Float64(8.12)]),
            ])
        );
    }

    #[test]
    fn test_round_trip_multiple_tables() {
        let fields = [
            ("level description", DataType::String),
            ("water_level", DataType::Float64),
            ("ok", DataType::Bool),
            ("index", DataType::Int64),
        ];
        let table = |location: &str| {
            Table::new("h2o_feet")
                .with_tag("location", location)
                .with_columns(["time", "level description", "water_level", "ok", "index"])
                .with_row(vec![
                    Value::Int64(TS),
                    "between 6 and 9 feet".into(),
                    Value::Float64(8.12),
                    Value::Bool(true),
                    Value::Int64(7),
                ])
                .with_row(vec![
                    Value::Int64(TS + 360),
                    "below 3 feet".into(),
                    Value::Float64(-0.5),
                    Value::Bool(false),
                    Value::Int64(i64::MIN),
                ])
        };
        let result = QueryResult::new(vec![table("coyote_creek"), table("santa monica")]);
        let keys = [
            key(Some("coyote_creek"), &fields),
            key(Some("santa monica"), &fields),
        ];

        for codec in [Codec::default(), Codec::new(StringEncoding::LengthPrefixed)] {
            let encoded = codec.encode(&result, &keys).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), result);
        }
    }

    #[test]
    fn test_empty_response() {
        let codec = Codec::default();
        let encoded = codec.encode(&QueryResult::default(), &[]).unwrap();
        assert_eq!(encoded.as_ref(), b"empty response");
        assert_eq!(codec.decode(&encoded).unwrap(), QueryResult::default());
    }

    #[test]
    fn test_nulls_are_zero_filled() {
        let codec = Codec::default();
        let key = key(None, &[("water_level", DataType::Float64), ("desc", DataType::String)]);
        let result = QueryResult::new(vec![
            Table::new("h2o_feet")
                .with_columns(["time", "water_level", "desc"])
                .with_row(vec![Value::Int64(1), Value::Null, Value::Null]),
        ]);

        let decoded = codec.decode(&codec.encode(&result, &[key]).unwrap()).unwrap();
        assert_eq!(
            decoded.tables[0].rows[0],
            vec![Value::Int64(1), Value::Float64(0.0), Value::from("")]
        );
    }

    #[test]
    fn test_encode_errors() {
        let codec = Codec::default();
        let table = Table::new("h2o_feet")
            .with_columns(["time", "water_level"])
            .with_row(vec![Value::Int64(1), Value::Float64(1.0)]);
        let result = QueryResult::new(vec![table.clone()]);

        assert_matches!(
            codec.encode(&result, &[]),
            Err(CodecError::KeyCountMismatch { keys: 0, tables: 1 })
        );
        assert_matches!(
            codec.encode(&result, &[key(None, &[])]),
            Err(CodecError::ColumnCountMismatch { expected: 1, actual: 2 })
        );

        let result = QueryResult::new(vec![table.with_row(vec![Value::Int64(2)])]);
        assert_matches!(
            codec.encode(&result, &[key(None, &[("water_level", DataType::Float64)])]),
            Err(CodecError::ColumnCountMismatch { expected: 2, actual: 1 })
        );

        let result = QueryResult::new(vec![
            Table::new("h2o_feet")
                .with_columns(["time", "water_level"])
                .with_row(vec![Value::Bool(true), Value::Float64(1.0)]),
        ]);
        assert_matches!(
            codec.encode(&result, &[key(None, &[("water_level", DataType::Float64)])]),
            Err(CodecError::Conversion { .. })
        );
    }

    #[test]
    fn test_decode_errors() {
        let codec = Codec::default();
        let key = key(None, &[("water_level", DataType::Float64)]);
        let result = QueryResult::new(vec![
            Table::new("h2o_feet")
                .with_columns(["time", "water_level"])
                .with_row(vec![Value::Int64(1), Value::Float64(1.0)]),
        ]);
        let encoded = codec.encode(&result, &[key]).unwrap().to_vec();

        // missing end sentinel
        assert_matches!(
            codec.decode(&encoded[..encoded.len() - 2]),
            Err(CodecError::MissingTerminator { what: "payload" })
        );
        // truncated row data
        assert_matches!(
            codec.decode(&encoded[..encoded.len() - 6]),
            Err(CodecError::Truncated { what: "row data", .. })
        );
        // trailing garbage
        let mut trailing = encoded.clone();
        trailing.extend_from_slice(b"xx");
        assert_matches!(
            codec.decode(&trailing),
            Err(CodecError::TrailingBytes { len: 2 })
        );
        // no key separator
        assert_matches!(
            codec.decode(b"{empty}#{empty}"),
            Err(CodecError::Truncated { what: "semantic key", .. })
        );
        // malformed key
        assert_matches!(
            codec.decode(b"{garbage} \0\0\0\0\0\0\0\0\r\n\r\n"),
            Err(CodecError::InvalidKey { .. })
        );

        // a length that does not hold whole rows
        let key_len = key_end(&encoded).unwrap();
        let mut short = encoded.clone();
        short[key_len + 1..key_len + 9].copy_from_slice(&10i64.to_be_bytes());
        assert_matches!(
            codec.decode(&short),
            Err(CodecError::LengthMismatch { length: 10 })
        );

        // negative length
        let mut negative = encoded;
        negative[key_len + 1..key_len + 9].copy_from_slice(&(-1i64).to_be_bytes());
        assert_matches!(
            codec.decode(&negative),
            Err(CodecError::LengthMismatch { length: -1 })
        );
    }

    #[test]
    fn test_key_end() {
        assert_eq!(key_end(br"{(m.a\ b=c)} rest"), Some(12));
        assert_eq!(key_end(br"a\\ b"), Some(3));
        assert_eq!(key_end(b"none"), None);
    }
}

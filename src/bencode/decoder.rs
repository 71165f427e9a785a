//! Bencode decoding.
//!
//! Decoding works over a byte slice with an explicit cursor rather than a
//! `Read` stream: callers need the byte range a value occupied (to hash a
//! torrent's `info` dict without re-encoding it), which is awkward to get
//! back out of a consuming reader.

use super::{BencodeError, BencodeResult, BencodeValue, ByteRange};

/// Decodes `bytes` as a single bencode value, requiring the value to consume
/// every byte of the input.
pub fn decode(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    let (value, end) = decode_value_at(bytes, 0)?;
    if end != bytes.len() {
        return Err(BencodeError::InvalidFormat(
            "trailing bytes after top-level value".to_string(),
        ));
    }
    Ok(value)
}

/// Decodes the first bencode value in `bytes` and returns it along with the
/// byte range it occupied. Unlike [`decode`], trailing bytes are allowed.
pub fn decode_with_range(bytes: &[u8]) -> BencodeResult<(BencodeValue, ByteRange)> {
    let (value, end) = decode_value_at(bytes, 0)?;
    Ok((value, 0..end))
}

fn decode_value_at(bytes: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    match byte_at(bytes, pos)? {
        b'i' => {
            let (i, end) = decode_integer_at(bytes, pos)?;
            Ok((BencodeValue::Integer(i), end))
        }
        b'l' => decode_list_at(bytes, pos),
        b'd' => decode_dict_at(bytes, pos),
        b'0'..=b'9' => {
            let (s, end) = decode_string_at(bytes, pos)?;
            Ok((BencodeValue::Bytes(s), end))
        }
        other => Err(BencodeError::InvalidFormat(format!(
            "unexpected byte 0x{other:02x} at offset {pos}"
        ))),
    }
}

fn byte_at(bytes: &[u8], pos: usize) -> BencodeResult<u8> {
    bytes.get(pos).copied().ok_or(BencodeError::UnexpectedEnd)
}

/// Decodes a `<len>:<bytes>` string starting at `pos`, returning the string
/// and the position just past it.
fn decode_string_at(bytes: &[u8], pos: usize) -> BencodeResult<(Vec<u8>, usize)> {
    let colon = find(bytes, pos, b':').ok_or(BencodeError::UnexpectedEnd)?;
    let len_str =
        std::str::from_utf8(&bytes[pos..colon]).map_err(|_| BencodeError::InvalidStringLength)?;
    if len_str.len() > 1 && len_str.starts_with('0') {
        return Err(BencodeError::InvalidStringLength);
    }
    let len: usize = len_str
        .parse()
        .map_err(|_| BencodeError::InvalidStringLength)?;
    let start = colon + 1;
    let end = start
        .checked_add(len)
        .ok_or(BencodeError::InvalidStringLength)?;
    if end > bytes.len() {
        return Err(BencodeError::UnexpectedEnd);
    }
    Ok((bytes[start..end].to_vec(), end))
}

/// Decodes an `i<int>e` integer starting at `pos`. No leading zeros are
/// permitted except the literal `0`, and `-0` is rejected.
fn decode_integer_at(bytes: &[u8], pos: usize) -> BencodeResult<(i64, usize)> {
    debug_assert_eq!(byte_at(bytes, pos)?, b'i');
    let digits_start = pos + 1;
    let e = find(bytes, digits_start, b'e').ok_or(BencodeError::UnexpectedEnd)?;
    let num_str =
        std::str::from_utf8(&bytes[digits_start..e]).map_err(|_| BencodeError::InvalidInteger)?;

    if num_str.is_empty() {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    let unsigned = num_str.strip_prefix('-').unwrap_or(num_str);
    if unsigned.len() > 1 && unsigned.starts_with('0') {
        return Err(BencodeError::InvalidInteger);
    }

    let value: i64 = num_str.parse().map_err(|_| BencodeError::InvalidInteger)?;
    Ok((value, e + 1))
}

fn decode_list_at(bytes: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    debug_assert_eq!(byte_at(bytes, pos)?, b'l');
    let mut cursor = pos + 1;
    let mut items = Vec::new();
    loop {
        if byte_at(bytes, cursor)? == b'e' {
            return Ok((BencodeValue::List(items), cursor + 1));
        }
        let (item, next) = decode_value_at(bytes, cursor)?;
        items.push(item);
        cursor = next;
    }
}

fn decode_dict_at(bytes: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    debug_assert_eq!(byte_at(bytes, pos)?, b'd');
    let mut cursor = pos + 1;
    let mut pairs = Vec::new();
    loop {
        if byte_at(bytes, cursor)? == b'e' {
            return Ok((BencodeValue::Dict(pairs), cursor + 1));
        }
        if !matches!(byte_at(bytes, cursor)?, b'0'..=b'9') {
            return Err(BencodeError::InvalidDictKey);
        }
        let (key, after_key) = decode_string_at(bytes, cursor)?;
        let (value, after_value) = decode_value_at(bytes, after_key)?;
        pairs.push((key, value));
        cursor = after_value;
    }
}

fn find(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

/// Finds the byte range of the `info` value inside a raw metainfo dictionary
/// without decoding it into a [`BencodeValue`]. Torrent info-hashes must be
/// computed over the *original* bytes a peer or tracker will also hash, so
/// re-encoding a decoded value is not equivalent when the source used a
/// non-canonical key order or string form.
///
/// This walks the top-level dictionary key by key, comparing raw key bytes
/// against `b"info"` and skipping exactly one value per key, rather than
/// fully decoding every value.
pub fn find_info_range(bytes: &[u8]) -> BencodeResult<ByteRange> {
    if byte_at(bytes, 0)? != b'd' {
        return Err(BencodeError::InvalidFormat(
            "metainfo must be a dictionary".to_string(),
        ));
    }
    let mut cursor = 1;
    loop {
        if byte_at(bytes, cursor)? == b'e' {
            return Err(BencodeError::InvalidFormat(
                "metainfo has no \"info\" key".to_string(),
            ));
        }
        let (key, after_key) = decode_string_at(bytes, cursor)?;
        let value_start = after_key;
        let value_end = skip_value(bytes, value_start)?;
        if key == b"info" {
            return Ok(value_start..value_end);
        }
        cursor = value_end;
    }
}

/// Advances past one bencode value starting at `pos` without constructing it.
fn skip_value(bytes: &[u8], pos: usize) -> BencodeResult<usize> {
    match byte_at(bytes, pos)? {
        b'i' => {
            let e = find(bytes, pos + 1, b'e').ok_or(BencodeError::UnexpectedEnd)?;
            Ok(e + 1)
        }
        b'l' => {
            let mut cursor = pos + 1;
            while byte_at(bytes, cursor)? != b'e' {
                cursor = skip_value(bytes, cursor)?;
            }
            Ok(cursor + 1)
        }
        b'd' => {
            let mut cursor = pos + 1;
            while byte_at(bytes, cursor)? != b'e' {
                let (_, after_key) = decode_string_at(bytes, cursor)?;
                cursor = skip_value(bytes, after_key)?;
            }
            Ok(cursor + 1)
        }
        b'0'..=b'9' => {
            let (_, end) = decode_string_at(bytes, pos)?;
            Ok(end)
        }
        other => Err(BencodeError::InvalidFormat(format!(
            "unexpected byte 0x{other:02x} at offset {pos}"
        ))),
    }
}

//! Bencode encoding. Output is always canonical: dictionary keys are emitted
//! in lexicographic byte order regardless of the order `BencodeValue::Dict`
//! carries them in (decode order is preserved for reading; encode order is
//! not).

use super::BencodeValue;

fn encode_into(buf: &mut Vec<u8>, value: &BencodeValue) {
    match value {
        BencodeValue::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        BencodeValue::Bytes(s) => {
            buf.extend_from_slice(s.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(s);
        }
        BencodeValue::List(items) => {
            buf.push(b'l');
            for item in items {
                encode_into(buf, item);
            }
            buf.push(b'e');
        }
        BencodeValue::Dict(pairs) => {
            buf.push(b'd');
            let mut sorted: Vec<&(Vec<u8>, BencodeValue)> = pairs.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, val) in sorted {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode_into(buf, val);
            }
            buf.push(b'e');
        }
    }
}

/// Encodes a value to its canonical bencode byte representation.
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(&mut buf, value);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn encodes_in_canonical_key_order() {
        let value = BencodeValue::dict(vec![
            (b"info".to_vec(), BencodeValue::bytes(b"x".to_vec())),
            (b"announce".to_vec(), BencodeValue::bytes(b"t".to_vec())),
        ]);
        let out = encode(&value);
        assert!(out.starts_with(b"d8:announce"));
    }

    #[test]
    fn round_trips_through_decode() {
        let value = BencodeValue::List(vec![
            BencodeValue::Integer(1),
            BencodeValue::bytes(b"hi".to_vec()),
            BencodeValue::dict(vec![(b"a".to_vec(), BencodeValue::Integer(-5))]),
        ]);
        let encoded = encode(&value);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn encode_then_decode_is_identity_for_canonical_input() {
        let canonical = b"d8:announce4:http4:infoi5ee";
        let value = decode(canonical).unwrap();
        assert_eq!(encode(&value), canonical);
    }
}

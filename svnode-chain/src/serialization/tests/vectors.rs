//! Fixed test vectors for the primitive codec.

use std::io::Cursor;

use crate::serialization::{
    sv_serialize_bytes, ReadSvExt, SerializationError, SvDeserializeInto, WriteSvExt,
};

/// Compactsize encodings at every width boundary.
const COMPACTSIZE_BOUNDARIES: &[(u64, &str)] = &[
    (0, "00"),
    (252, "fc"),
    (253, "fdfd00"),
    (65535, "fdffff"),
    (65536, "fe00000100"),
    (0xffff_ffff, "feffffffff"),
];

#[test]
fn compactsize_boundaries() {
    svnode_test::init();

    for (value, expected) in COMPACTSIZE_BOUNDARIES {
        let mut bytes = Vec::new();
        bytes.write_compactsize(*value).unwrap();
        assert_eq!(hex::encode(&bytes), *expected, "encoding of {value}");

        let parsed = Cursor::new(&bytes).read_compactsize();
        if *value <= crate::serialization::MAX_PROTOCOL_MESSAGE_LEN as u64 {
            assert_eq!(parsed.unwrap(), *value);
        } else {
            assert!(matches!(parsed, Err(SerializationError::Parse(_))));
        }
    }
}

#[test]
fn nine_byte_compactsize_encoding() {
    svnode_test::init();

    let mut bytes = Vec::new();
    bytes.write_compactsize(0x1_0000_0000).unwrap();
    assert_eq!(hex::encode(&bytes), "ff0000000001000000");

    // Too large for a size, but fine as an index.
    assert!(Cursor::new(&bytes).read_compactsize().is_err());
    assert_eq!(Cursor::new(&bytes).read_compact_u64().unwrap(), 0x1_0000_0000);
}

#[test]
fn non_canonical_compactsize_is_rejected() {
    svnode_test::init();

    let non_canonical: [&[u8]; 3] = [
        b"\xfd\xfc\x00",
        b"\xfe\xff\xff\x00\x00",
        b"\xff\xff\xff\xff\xff\x00\x00\x00\x00",
    ];

    for bytes in non_canonical {
        let err = Cursor::new(bytes).read_compactsize().unwrap_err();
        assert!(
            matches!(err, SerializationError::Parse("non-canonical compactsize")),
            "unexpected error {err:?}"
        );
    }
}

#[test]
fn byte_strings() {
    svnode_test::init();

    let mut bytes = Vec::new();
    sv_serialize_bytes(&[], &mut bytes).unwrap();
    assert_eq!(bytes, [0]);

    let payload = vec![0xab; 300];
    let mut bytes = Vec::new();
    sv_serialize_bytes(&payload, &mut bytes).unwrap();
    assert_eq!(&bytes[..3], &[0xfd, 0x2c, 0x01]);
    let parsed: Vec<u8> = bytes.as_slice().sv_deserialize_into().unwrap();
    assert_eq!(parsed, payload);

    // A length prefix that promises more data than is present.
    let truncated = &bytes[..bytes.len() - 1];
    let err = truncated.sv_deserialize_into::<Vec<u8>>().unwrap_err();
    assert!(err.is_truncated(), "unexpected error {err:?}");
}

#[test]
fn invalid_utf8_string_is_rejected() {
    svnode_test::init();

    let err = (&[2u8, 0xc3, 0x28][..])
        .sv_deserialize_into::<String>()
        .unwrap_err();
    assert!(matches!(err, SerializationError::Parse("invalid utf-8")));
}

#[test]
fn booleans() {
    svnode_test::init();

    assert!(!Cursor::new([0u8]).read_bool().unwrap());
    assert!(Cursor::new([1u8]).read_bool().unwrap());
    assert!(Cursor::new([2u8]).read_bool().is_err());
}

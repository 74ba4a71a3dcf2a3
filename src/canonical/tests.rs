use super::{as_bytes, error::Error, to_hash, to_writer, types::*, Writer};
use alloc::{string::String, vec, vec::Vec};
use core::fmt::Debug;
use serde::Serialize;
use uint::hex::FromHex;

struct AssertWriter<'a, I>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    expected_iter: I,
}

struct Slot<'a>(&'a [u8]);

impl<'a> Debug for Slot<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl<'a> PartialEq for Slot<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<'a, I> Writer for AssertWriter<'a, I>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    fn write(&mut self, slot: &[u8]) {
        match self.expected_iter.next() {
            Some((expected, _line)) => {
                assert_eq!(slot.len(), 32, "Each slot should have 32 bytes.");

                #[cfg(feature = "std")]
                println!("{}", _line);

                let expected = <[u8; 32]>::from_hex(expected).unwrap();
                assert_eq!(
                    Slot(slot),
                    Slot(expected.as_slice()),
                    "slot did not match the expected value"
                );
            }
            None => {
                panic!("Expected end of data, got {:?}", Slot(slot));
            }
        }
    }
}

struct CountingWriter(usize);

impl Writer for CountingWriter {
    fn write(&mut self, _slot: &[u8]) {
        self.0 += 1;
    }
}

// Expected slots are given as one 32 byte hex string per line, anything after
// the hex string is a comment.
fn serialize_and_compare<T>(value: &T, expected: &str)
where
    T: Serialize,
{
    let mut iter = expected
        .split('\n')
        .filter(|&line| !line.trim().is_empty())
        .map(|line| (&line.trim()[..64], line));
    let mut writer = AssertWriter {
        expected_iter: &mut iter,
    };
    to_writer(value, &mut writer).unwrap();
    assert!(iter.next().is_none(), "Expected more data");
}

fn slot_count<T: Serialize>(value: &T) -> usize {
    let mut writer = CountingWriter(0);
    to_writer(value, &mut writer).unwrap();
    writer.0
}

#[derive(Serialize)]
struct WithBytes {
    #[serde(with = "as_bytes")]
    data: Vec<u8>,
}

#[derive(Serialize)]
enum Shape {
    Empty,
    Single(u64),
    Pair { a: u8, b: bool },
}

#[test]
fn u64() {
    let d: u64 = 0x1337000012341111;
    let expected = "
    0000000000000000000000000000000000000000000000001337000012341111
    ";
    serialize_and_compare(&d, expected);
}

#[test]
fn negative_i32_is_sign_extended() {
    let expected = "
    fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe
    ";
    serialize_and_compare(&-2i32, expected);
}

#[test]
fn bool_and_address() {
    let addr = Address(<[u8; 20]>::from_hex("95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5").unwrap());
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000001 true
    00000000000000000000000095222290dd7278aa3ddd389cc1e1d165cc4bafe5 address
    ";
    serialize_and_compare(&(true, addr), expected);
}

#[test]
fn dynamic_bytes_are_length_prefixed() {
    let d = WithBytes {
        data: vec![0xa1, 0xa2, 0xa3, 0xa4],
    };
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000004 length
    a1a2a3a400000000000000000000000000000000000000000000000000000000 data
    ";
    serialize_and_compare(&d, expected);
}

#[test]
fn empty_bytes_only_write_the_length() {
    let d = WithBytes { data: vec![] };
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000000 length
    ";
    serialize_and_compare(&d, expected);
}

#[test]
fn string_is_length_prefixed() {
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000003
    6162630000000000000000000000000000000000000000000000000000000000
    ";
    serialize_and_compare(&String::from("abc"), expected);
}

#[test]
fn sequence_is_length_prefixed() {
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000002 length
    0000000000000000000000000000000000000000000000000000000000000007
    0000000000000000000000000000000000000000000000000000000000000009
    ";
    serialize_and_compare(&vec![7u16, 9u16], expected);
}

#[test]
fn enum_variants_are_tagged() {
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000000 Empty
    ";
    serialize_and_compare(&Shape::Empty, expected);

    let expected = "
    0000000000000000000000000000000000000000000000000000000000000001 Single
    000000000000000000000000000000000000000000000000000000000000002a
    ";
    serialize_and_compare(&Shape::Single(42), expected);

    let expected = "
    0000000000000000000000000000000000000000000000000000000000000002 Pair
    0000000000000000000000000000000000000000000000000000000000000003 a
    0000000000000000000000000000000000000000000000000000000000000000 b
    ";
    serialize_and_compare(&Shape::Pair { a: 3, b: false }, expected);
}

#[test]
fn option_has_presence_slot() {
    let expected = "
    0000000000000000000000000000000000000000000000000000000000000000
    ";
    serialize_and_compare(&Option::<u8>::None, expected);

    let expected = "
    0000000000000000000000000000000000000000000000000000000000000001
    0000000000000000000000000000000000000000000000000000000000000005
    ";
    serialize_and_compare(&Some(5u8), expected);
}

#[test]
fn fixed_size_types() {
    assert_eq!(slot_count(&Hash::default()), 1);
    assert_eq!(slot_count(&Signature::default()), 3);
    assert_eq!(slot_count(&U256::from(1)), 1);
}

#[test]
fn floats_are_rejected() {
    let mut writer = CountingWriter(0);
    assert!(matches!(
        to_writer(&1.5f64, &mut writer),
        Err(Error::TypeNotRepresentable(_))
    ));
}

#[test]
fn hash_of_empty_tuple_is_keccak_of_nothing() {
    // keccak256("")
    let expected =
        <[u8; 32]>::from_hex("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
            .unwrap();
    assert_eq!(to_hash(&()).unwrap(), Hash(expected));
}

#[test]
fn hash_depends_on_length_prefix() {
    let a = (WithBytes { data: vec![1] }, WithBytes { data: vec![2, 3] });
    let b = (WithBytes { data: vec![1, 2] }, WithBytes { data: vec![3] });
    assert_ne!(to_hash(&a).unwrap(), to_hash(&b).unwrap());
}

#[test]
fn destination_from_address_is_left_padded() {
    let addr = Address([0xab; 20]);
    let dest = Destination::from(addr);
    assert_eq!(dest.0[..12], [0u8; 12]);
    assert_eq!(dest.0[12..], [0xab; 20]);
}

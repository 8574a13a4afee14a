//! Round-trip and chunked-delivery tests for the streaming decoder

use std::future::Future;
use std::task::{Context, Poll};

use bytes::Bytes;
use proptest::prelude::*;
use strata_codec::{encode_named_tag, NamedTag, Result, Tag, TagDecoder, TagList, TagObject, TagType};

fn noop_waker() -> std::task::Waker {
    struct NoopWake;
    impl std::task::Wake for NoopWake {
        fn wake(self: std::sync::Arc<Self>) {}
    }
    std::task::Waker::from(std::sync::Arc::new(NoopWake))
}

/// Requests resolve synchronously inside feed/end, so one poll collects them.
fn poll_now<F: Future>(fut: F) -> F::Output {
    let mut fut = Box::pin(fut);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(out) => out,
        Poll::Pending => panic!("request did not resolve synchronously"),
    }
}

/// Decode one top-level value, delivering the input in the given chunk sizes
fn decode_chunked(bytes: &[u8], chunk: usize) -> Result<Option<NamedTag>> {
    let mut decoder = TagDecoder::new();
    let fut = decoder.read_value();
    for piece in bytes.chunks(chunk.max(1)) {
        decoder.feed(piece)?;
    }
    decoder.end()?;
    poll_now(fut)
}

fn kitchen_sink() -> TagObject {
    let mut inner = TagObject::new();
    inner.insert("xPos", Tag::Int(-14));
    inner.insert("zPos", Tag::Int(3));
    inner.insert("label", Tag::String("inner object".to_string()));

    let mut obj = TagObject::new();
    obj.insert("byte", Tag::Byte(-7));
    obj.insert("short", Tag::Short(-30000));
    obj.insert("int", Tag::Int(123_456_789));
    obj.insert("long", Tag::Long(0x0123_4567_89AB_CDEF));
    obj.insert("float", Tag::Float(2.5));
    obj.insert("double", Tag::Double(-1234.5678));
    obj.insert("string", Tag::String("héllo wörld".to_string()));
    obj.insert(
        "bytes",
        Tag::ByteArray(Bytes::from(
            (0..2048u32).map(|v| v as u8).collect::<Vec<_>>(),
        )),
    );
    obj.insert(
        "ints",
        Tag::IntArray(Bytes::from(
            [1i32, -1, i32::MAX, i32::MIN]
                .iter()
                .flat_map(|v| v.to_be_bytes())
                .collect::<Vec<_>>(),
        )),
    );
    obj.insert(
        "list",
        Tag::List(TagList::new(TagType::Int, vec![Tag::Int(1), Tag::Int(2), Tag::Int(3)]).unwrap()),
    );
    obj.insert(
        "objects",
        Tag::List(
            TagList::new(
                TagType::Object,
                vec![Tag::Object(inner.clone()), Tag::Object(TagObject::new())],
            )
            .unwrap(),
        ),
    );
    obj.insert("nested", Tag::Object(inner));
    obj
}

#[test]
fn kitchen_sink_round_trip() {
    let obj = kitchen_sink();
    let bytes = encode_named_tag("", &Tag::Object(obj.clone())).unwrap();
    let named = decode_chunked(&bytes, bytes.len()).unwrap().unwrap();
    assert_eq!(named.name, "");
    assert_eq!(named.tag, Tag::Object(obj));
}

#[test]
fn one_byte_at_a_time_matches_single_feed() {
    let obj = kitchen_sink();
    let bytes = encode_named_tag("", &Tag::Object(obj)).unwrap();
    assert!(bytes.len() > 1024, "fixture should span many feeds");
    let whole = decode_chunked(&bytes, bytes.len()).unwrap();
    let trickled = decode_chunked(&bytes, 1).unwrap();
    assert_eq!(whole, trickled);
}

#[test]
fn read_object_resolves_name_and_object() {
    let obj = kitchen_sink();
    let bytes = encode_named_tag("", &Tag::Object(obj.clone())).unwrap();
    let mut decoder = TagDecoder::new();
    let fut = decoder.read_object();
    decoder.feed(&bytes).unwrap();
    decoder.end().unwrap();
    let (name, decoded) = poll_now(fut).unwrap().unwrap();
    assert_eq!(name, "");
    assert_eq!(decoded, obj);
}

#[test]
fn sibling_top_level_values_decode_in_order() {
    let mut stream = encode_named_tag("first", &Tag::Int(1)).unwrap().to_vec();
    stream.extend_from_slice(&encode_named_tag("second", &Tag::String("two".into())).unwrap());

    let mut decoder = TagDecoder::new();
    let fut_a = decoder.read_value();
    let fut_b = decoder.read_value();
    let fut_c = decoder.read_value();
    for piece in stream.chunks(7) {
        decoder.feed(piece).unwrap();
    }
    decoder.end().unwrap();

    assert_eq!(poll_now(fut_a).unwrap().unwrap().name, "first");
    assert_eq!(poll_now(fut_b).unwrap().unwrap().name, "second");
    assert!(poll_now(fut_c).unwrap().is_none());
}

#[test]
fn deep_nesting_decodes_without_native_recursion() {
    // 200 nested objects, far beyond a comfortable call-stack depth if the
    // decoder recursed natively.
    let mut tag = Tag::Object(TagObject::new());
    for depth in 0..200 {
        let mut wrapper = TagObject::new();
        wrapper.insert(format!("level{depth}"), tag);
        tag = Tag::Object(wrapper);
    }
    let bytes = encode_named_tag("", &tag).unwrap();
    let named = decode_chunked(&bytes, 13).unwrap().unwrap();
    assert_eq!(named.tag, tag);
}

fn arb_scalar() -> impl Strategy<Value = Tag> {
    prop_oneof![
        any::<i8>().prop_map(Tag::Byte),
        any::<i16>().prop_map(Tag::Short),
        any::<i32>().prop_map(Tag::Int),
        any::<i64>().prop_map(Tag::Long),
        prop_oneof![prop::num::f32::NORMAL, prop::num::f32::ZERO].prop_map(Tag::Float),
        prop_oneof![prop::num::f64::NORMAL, prop::num::f64::ZERO].prop_map(Tag::Double),
        "[ -~]{0,24}".prop_map(Tag::String),
        prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(|v| Tag::ByteArray(Bytes::from(v))),
        prop::collection::vec(any::<i32>(), 0..16).prop_map(|v| {
            Tag::IntArray(Bytes::from(
                v.iter().flat_map(|n| n.to_be_bytes()).collect::<Vec<_>>(),
            ))
        }),
    ]
}

fn arb_tag() -> impl Strategy<Value = Tag> {
    arb_scalar().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(any::<i32>().prop_map(Tag::Int), 0..6).prop_map(|v| {
                Tag::List(TagList::new(TagType::Int, v).unwrap())
            }),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6).prop_map(|map| {
                let mut obj = TagObject::new();
                for (name, tag) in map {
                    obj.insert(name, tag);
                }
                Tag::Object(obj)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn round_trip_property(tag in arb_tag(), name in "[a-z]{0,12}", chunk in 1usize..32) {
        let bytes = encode_named_tag(&name, &tag).unwrap();
        let named = decode_chunked(&bytes, chunk).unwrap().unwrap();
        prop_assert_eq!(named.name, name);
        prop_assert_eq!(named.tag, tag);
    }

    #[test]
    fn chunking_is_invisible(tag in arb_tag(), chunk in 1usize..48) {
        let bytes = encode_named_tag("t", &tag).unwrap();
        let whole = decode_chunked(&bytes, bytes.len().max(1)).unwrap();
        let pieces = decode_chunked(&bytes, chunk).unwrap();
        prop_assert_eq!(whole, pieces);
    }

    #[test]
    fn truncation_always_fails_cleanly(tag in arb_tag(), cut in 1usize..16) {
        let bytes = encode_named_tag("t", &tag).unwrap();
        if bytes.len() > cut {
            let result = decode_chunked(&bytes[..bytes.len() - cut], 9);
            prop_assert!(result.is_err());
        }
    }
}

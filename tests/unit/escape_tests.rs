//! Unit tests for field escaping.

use yate_extmodule::wire::escape::{decode, decode_parameter, encode, encode_parameter};
use yate_extmodule::ClientError;

// ── encode ────────────────────────────────────────────────────────────────────

#[test]
fn plain_text_passes_through() {
    assert_eq!(encode("test"), "test");
    assert_eq!(encode(""), "");
    assert_eq!(encode("héllo wörld/42"), "héllo wörld/42");
}

#[test]
fn percent_is_doubled() {
    assert_eq!(encode("test%test"), "test%%test");
    assert_eq!(encode("%>message"), "%%>message");
}

#[test]
fn separators_and_line_breaks_are_shifted() {
    assert_eq!(encode("test\n"), "test%J");
    assert_eq!(encode("a:b"), "a%zb");
    assert_eq!(encode("a=b"), "a%}b");
    assert_eq!(encode("\t\r"), "%I%M");
}

#[test]
fn every_control_character_is_escaped() {
    for code in 0u8..32 {
        let c = char::from(code);
        let encoded = encode(&c.to_string());
        assert_eq!(encoded, format!("%{}", char::from(code + 64)), "code {code}");
        assert_eq!(decode(&encoded).unwrap(), c.to_string(), "code {code}");
    }
}

// ── decode ────────────────────────────────────────────────────────────────────

#[test]
fn decode_reverses_encode() {
    let samples = [
        "test",
        "test%test",
        "test\n",
        "%>message",
        "a:b=c%d",
        "%%%",
        "tab\there",
        "",
    ];
    for sample in samples {
        assert_eq!(decode(&encode(sample)).unwrap(), sample, "sample {sample:?}");
    }
}

#[test]
fn decode_known_sequences() {
    assert_eq!(decode("%%>message").unwrap(), "%>message");
    assert_eq!(decode("k%}v").unwrap(), "k=v");
    assert_eq!(decode("a%zb").unwrap(), "a:b");
    assert_eq!(decode("line%Jbreak").unwrap(), "line\nbreak");
}

#[test]
fn trailing_escape_is_rejected() {
    let err = decode("abc%").unwrap_err();
    assert!(matches!(&err, ClientError::Decode(msg) if msg.contains("abc%")), "{err:?}");
}

#[test]
fn escape_followed_by_low_character_is_rejected() {
    for text in ["%>", "%0", "%@", "a% b"] {
        assert!(
            matches!(decode(text), Err(ClientError::Decode(_))),
            "expected decode error for {text:?}"
        );
    }
}

// ── Parameters ────────────────────────────────────────────────────────────────

#[test]
fn parameter_join_is_unambiguous() {
    assert_eq!(encode_parameter("caller", "a=b"), "caller=a%}b");
    assert_eq!(encode_parameter("k:1", "v"), "k%z1=v");
}

#[test]
fn decode_parameter_splits_at_first_raw_equals() {
    assert_eq!(
        decode_parameter("a%%a%%%}a%Jb=foo%Ivoid").unwrap(),
        ("a%a%=a\nb".to_owned(), "foo\tvoid".to_owned())
    );
    assert_eq!(
        decode_parameter("name=value").unwrap(),
        ("name".to_owned(), "value".to_owned())
    );
}

#[test]
fn decode_parameter_without_equals_has_empty_value() {
    assert_eq!(
        decode_parameter("flag").unwrap(),
        ("flag".to_owned(), String::new())
    );
    assert_eq!(
        decode_parameter("empty=").unwrap(),
        ("empty".to_owned(), String::new())
    );
}

#[test]
fn decode_parameter_rejects_malformed_halves() {
    assert!(decode_parameter("bad%=value").is_err());
    assert!(decode_parameter("key=bad%").is_err());
}

use proptest::prelude::*;
use scriptwatch_diff::{ContentHint, Normalizer, NormalizerConfig};

fn normalizer() -> Normalizer {
    Normalizer::new(&NormalizerConfig::default()).expect("default rules compile")
}

/// Fragments that exercise every built-in rule when glued together.
fn script_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("?v=12345".to_string()),
        Just("&t=9".to_string()),
        Just("&_=1".to_string()),
        Just("2024-01-01T10:00:00Z".to_string()),
        Just("1700000000".to_string()),
        Just("1.2.3".to_string()),
        Just(".deadbeef12".to_string()),
        Just("\"".to_string()),
        Just("'".to_string()),
        Just("\n\n".to_string()),
        Just("  ".to_string()),
        Just(";".to_string()),
        "[a-z0-9]{1,6}",
    ]
}

proptest! {
    #[test]
    fn proptest_normalize_is_idempotent(input in "[a-f0-9 =;.?&_:/\"'\n-]{0,160}") {
        let n = normalizer();
        let once = n.normalize(&input, ContentHint::JavaScript).text;
        let twice = n.normalize(&once, ContentHint::JavaScript).text;
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn proptest_normalize_is_idempotent_on_noise_fragments(
        parts in prop::collection::vec(script_fragment(), 0..40)
    ) {
        let input = parts.concat();
        let n = normalizer();
        for hint in [ContentHint::JavaScript, ContentHint::Other] {
            let once = n.normalize(&input, hint).text;
            let twice = n.normalize(&once, hint).text;
            prop_assert_eq!(twice, once);
        }
    }

    #[test]
    fn proptest_cache_buster_value_never_matters(value in "[0-9a-z]{1,12}") {
        let n = normalizer();
        let a = n.normalize(&format!("s(\"/app.js?v={value}\");"), ContentHint::JavaScript).text;
        let b = n.normalize("s(\"/app.js?v=0\");", ContentHint::JavaScript).text;
        prop_assert_eq!(a, b);
    }
}

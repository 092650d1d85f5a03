use hd_keystore::{AbsoluteKeypath, Keystore, KeypathComponent, SigningMode, SoftwareKeystore};
use proptest::prelude::*;

fn any_component() -> impl Strategy<Value = (u32, bool)> {
    (0u32..0x8000_0000, any::<bool>())
}

proptest! {
    #[test]
    fn keypaths_roundtrip_through_display(parts in prop::collection::vec(any_component(), 1..8)) {
        let text = parts
            .iter()
            .map(|(index, hardened)| format!("{}{}", index, if *hardened { "'" } else { "" }))
            .collect::<Vec<_>>()
            .join("/");
        let text = format!("m/{}", text);

        let parsed: AbsoluteKeypath = text.parse().expect("generated keypath parses");
        prop_assert_eq!(parsed.to_string(), text.clone());
        prop_assert_eq!(parsed.depth(), parts.len());

        let reparsed: AbsoluteKeypath = parsed.to_string().parse().expect("display parses");
        prop_assert_eq!(&reparsed, &parsed);

        let json = serde_json::to_string(&parsed).expect("serialize");
        let from_json: AbsoluteKeypath = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(from_json, parsed);
    }

    #[test]
    fn h_marker_is_equivalent_to_apostrophe(index in 0u32..0x8000_0000) {
        let apostrophe: AbsoluteKeypath = format!("m/{}'", index).parse().expect("parses");
        let h: AbsoluteKeypath = format!("m/{}h", index).parse().expect("parses");
        prop_assert_eq!(apostrophe, h);
    }

    #[test]
    fn out_of_range_indices_rejected(index in 0x8000_0000u32..=u32::MAX, hardened in any::<bool>()) {
        prop_assert!(KeypathComponent::new(index, hardened).is_err());
        let text = format!("m/{}{}", index, if hardened { "'" } else { "" });
        prop_assert!(text.parse::<AbsoluteKeypath>().is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn identifier_is_deterministic(seed in prop::collection::vec(any::<u8>(), 16..=64), multisig in any::<bool>()) {
        let mode = if multisig { SigningMode::Multisig } else { SigningMode::SingleSig };
        let a = SoftwareKeystore::from_seed(&seed, mode).expect("valid seed");
        let b = SoftwareKeystore::from_seed(&seed, mode).expect("valid seed");

        let id = a.identifier().expect("identifier");
        prop_assert_eq!(id.as_str().len(), 64);
        prop_assert!(id.as_str().bytes().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_eq!(&id, &a.identifier().expect("cached identifier"));
        prop_assert_eq!(id, b.identifier().expect("identifier"));
    }

    #[test]
    fn derivation_is_deterministic(seed in prop::collection::vec(any::<u8>(), 16..=64), account in 0u32..100, index in 0u32..1000) {
        let keystore = SoftwareKeystore::from_seed(&seed, SigningMode::SingleSig).expect("valid seed");
        let keypath: AbsoluteKeypath = format!("m/84'/0'/{}'/0/{}", account, index).parse().expect("parses");

        let first = keystore.extended_public_key(&keypath).expect("derive");
        let second = keystore.extended_public_key(&keypath).expect("derive again");
        prop_assert_eq!(first.public_key, second.public_key);
        prop_assert_eq!(first.chain_code, second.chain_code);
        prop_assert_eq!(usize::from(first.depth), keypath.depth());
    }
}

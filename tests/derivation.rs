use hd_keystore::{
    AbsoluteKeypath, EmulatedDevice, ErrorCode, HardwareKeystore, Keystore, KeypathTemplate,
    SigningMode, SoftwareKeystore,
};

// BIP32 test vector 2
const VECTOR2_SEED: &str = "fffcf9f6f3f0edeae7e4e1dedbd8d5d2cfccc9c6c3c0bdbab7b4b1aeaba8a5a29f9c999693908d8a8784817e7b7875726f6c696663605d5a5754514e4b484542";
const VECTOR2_ADDRESS_XPUB: &str = "xpub6GzdxUN9kG9JBLfiM8t7nYgFe2N4p2xd2fBYnE4povnHuu3NowyoZCYSBP4agz6UtRr1P2DtdzShGqftKAJHBLAuamT9D5u7T3cxYg5gSqt";
const VECTOR2_ADDRESS_CHAIN_CODE: &str = "1d0169359714f3e802804ccb787ae50c519ca7d2f5e29d1d58cef7abdc6b5470";
const VECTOR2_MULTISIG_ACCOUNT_XPUB: &str = "xpub6DwQ4gBCmJZM3TaKogP41tpjuEwnMH2nWEi3PFev37LfsWPvjZrh1GfAG8xvoDYMPWGKG1oBPMCfKpkVbJtUHRaqRdCb6X6o1e9PQTVK88a";

fn seed() -> Vec<u8> {
    hex::decode(VECTOR2_SEED).expect("seed hex")
}

#[test]
fn canonical_single_sig_address_key() {
    let keystore = SoftwareKeystore::from_seed(&seed(), SigningMode::SingleSig).expect("seed");
    let template = KeypathTemplate::new("m/84'/0'/0'".parse().expect("account"));
    let keypath = template.address(0, 0).expect("address keypath");
    assert_eq!(keypath.to_string(), "m/84'/0'/0'/0/0");

    let xpub = keystore.extended_public_key(&keypath).expect("derive");
    assert_eq!(xpub.to_string(), VECTOR2_ADDRESS_XPUB);
    assert_eq!(hex::encode(&xpub.chain_code[..]), VECTOR2_ADDRESS_CHAIN_CODE);
}

#[test]
fn hardware_and_software_backends_agree() {
    let software = SoftwareKeystore::from_seed(&seed(), SigningMode::Multisig).expect("seed");
    let hardware = HardwareKeystore::new(EmulatedDevice::new(&seed()), SigningMode::Multisig);

    let account: AbsoluteKeypath = "m/48'/0'/0'/2'".parse().expect("account");
    let from_software = software.extended_public_key(&account).expect("software xpub");
    let from_hardware = hardware.extended_public_key(&account).expect("hardware xpub");

    assert_eq!(from_software.to_string(), VECTOR2_MULTISIG_ACCOUNT_XPUB);
    assert_eq!(from_software, from_hardware);
    assert_eq!(software.identifier().unwrap(), hardware.identifier().unwrap());
}

#[test]
fn identity_roots_differ_per_mode() {
    let single = SoftwareKeystore::from_seed(&seed(), SigningMode::SingleSig).expect("seed");
    let multi = SoftwareKeystore::from_seed(&seed(), SigningMode::Multisig).expect("seed");
    assert_ne!(single.identifier().unwrap(), multi.identifier().unwrap());
    assert_eq!(
        AbsoluteKeypath::identity_root(SigningMode::SingleSig).to_string(),
        "m/44'"
    );
    assert_eq!(
        AbsoluteKeypath::identity_root(SigningMode::Multisig).to_string(),
        "m/46'"
    );
}

#[test]
fn backends_agree_on_depth_limit() {
    let software = SoftwareKeystore::from_seed(&[7u8; 32], SigningMode::SingleSig).expect("seed");
    let hardware = HardwareKeystore::new(EmulatedDevice::new(&[7u8; 32]), SigningMode::SingleSig);

    let deepest: AbsoluteKeypath = format!("m{}", "/0".repeat(255)).parse().expect("255 levels");
    let from_software = software.extended_public_key(&deepest).expect("software xpub");
    let from_hardware = hardware.extended_public_key(&deepest).expect("hardware xpub");
    assert_eq!(from_software, from_hardware);
    assert_eq!(from_software.depth, 255);

    let err = format!("m{}", "/0".repeat(256))
        .parse::<AbsoluteKeypath>()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidPath);
}

use proptest::prelude::*;
use skillvault_crypto::wire::{NONCE_BYTES, TAG_BYTES, WRAPPED_DEK_BYTES};
use skillvault_crypto::{Kek, KeyError, KeyManager};

fn setup() -> KeyManager {
    KeyManager::new(Kek::generate().unwrap())
}

#[test]
fn wire_constants() {
    assert_eq!(NONCE_BYTES, 12);
    assert_eq!(TAG_BYTES, 16);
    assert_eq!(WRAPPED_DEK_BYTES, 60);
}

#[test]
fn roundtrip_basic() {
    let keys = setup();
    let dek = keys.generate_dek().unwrap();
    let blob = keys.encrypt("hello vault", &dek).unwrap();
    assert_eq!(keys.decrypt(&blob, &dek).unwrap(), "hello vault");
}

#[test]
fn roundtrip_empty_plaintext() {
    let keys = setup();
    let dek = keys.generate_dek().unwrap();
    let blob = keys.encrypt("", &dek).unwrap();
    assert_eq!(blob.len(), NONCE_BYTES + TAG_BYTES);
    assert_eq!(keys.decrypt(&blob, &dek).unwrap(), "");
}

#[test]
fn roundtrip_at_the_bound() {
    let keys = setup().with_plaintext_limit(65536);
    let dek = keys.generate_dek().unwrap();
    let plaintext = "a".repeat(65536);
    let blob = keys.encrypt(&plaintext, &dek).unwrap();
    assert_eq!(keys.decrypt(&blob, &dek).unwrap(), plaintext);
    assert_eq!(
        keys.encrypt(&"a".repeat(65537), &dek).unwrap_err(),
        KeyError::TooLarge { len: 65537, max: 65536 }
    );
}

#[test]
fn fresh_nonce_per_encryption() {
    let keys = setup();
    let dek = keys.generate_dek().unwrap();
    let a = keys.encrypt("same plaintext", &dek).unwrap();
    let b = keys.encrypt("same plaintext", &dek).unwrap();
    assert_ne!(a, b);
    assert_ne!(&a[..NONCE_BYTES], &b[..NONCE_BYTES]);
}

#[test]
fn tamper_any_byte_of_wrap_fails() {
    let keys = setup();
    let dek = keys.generate_dek().unwrap();
    let blob = keys.wrap_dek(&dek).unwrap();
    for i in 0..blob.len() {
        let mut tampered = blob.clone();
        tampered[i] ^= 0x01;
        assert_eq!(
            keys.unwrap_dek(&tampered).unwrap_err(),
            KeyError::CorruptWrap,
            "byte {} accepted after tamper",
            i
        );
    }
}

#[test]
fn truncated_wrap_fails() {
    let keys = setup();
    let dek = keys.generate_dek().unwrap();
    let blob = keys.wrap_dek(&dek).unwrap();
    assert_eq!(keys.unwrap_dek(&blob[..59]).unwrap_err(), KeyError::CorruptWrap);
    assert_eq!(keys.unwrap_dek(&[]).unwrap_err(), KeyError::CorruptWrap);
}

#[test]
fn ciphertext_is_not_transferable_between_deks() {
    let keys = setup();
    let dek1 = keys.generate_dek().unwrap();
    let dek2 = keys.generate_dek().unwrap();
    let blob = keys.encrypt("secret rules", &dek1).unwrap();
    assert_eq!(
        keys.decrypt(&blob, &dek2).unwrap_err(),
        KeyError::CorruptCiphertext
    );
}

proptest! {
    #[test]
    fn prop_encrypt_decrypt_roundtrip(plaintext in "\\PC{0,512}") {
        let keys = setup();
        let dek = keys.generate_dek().unwrap();
        let blob = keys.encrypt(&plaintext, &dek).unwrap();
        prop_assert_eq!(keys.decrypt(&blob, &dek).unwrap(), plaintext);
    }

    #[test]
    fn prop_wrap_unwrap_roundtrip(seed in prop::array::uniform32(any::<u8>())) {
        let keys = setup();
        let dek = skillvault_crypto::Dek::from_bytes(seed);
        let blob = keys.wrap_dek(&dek).unwrap();
        prop_assert_eq!(blob.len(), WRAPPED_DEK_BYTES);
        prop_assert!(keys.unwrap_dek(&blob).unwrap().ct_eq(&dek));
    }
}

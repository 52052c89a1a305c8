use std::sync::Arc;

use crate::errors::Error;
use crate::key::ConfigKey;
use crate::kms::Envelope;
use crate::kms::MockKmsProvider;

fn ciphered() -> ConfigKey {
    ConfigKey::new("cipher-db-password", "G", "T").unwrap()
}

fn plain() -> ConfigKey {
    ConfigKey::new("db-password", "G", "T").unwrap()
}

#[tokio::test]
async fn test_disabled_envelope_passes_through() {
    let envelope = Envelope::disabled();
    assert_eq!(envelope.seal(&ciphered(), "secret").await.unwrap(), "secret");
    assert_eq!(envelope.open(&ciphered(), "ENC").await.unwrap(), "ENC");
}

#[tokio::test]
async fn test_plain_key_passes_through() {
    let mut mock = MockKmsProvider::new();
    mock.expect_encrypt().never();
    mock.expect_decrypt().never();

    let envelope = Envelope::new(Some(Arc::new(mock)), "key-1".into(), true);
    assert_eq!(envelope.seal(&plain(), "v").await.unwrap(), "v");
    assert_eq!(envelope.open(&plain(), "v").await.unwrap(), "v");
}

#[tokio::test]
async fn test_ciphered_key_uses_oracle() {
    let mut mock = MockKmsProvider::new();
    mock.expect_encrypt()
        .withf(|key_id, plaintext| key_id == "key-1" && plaintext == "plain")
        .returning(|_, _| Ok("ENC".to_string()));
    mock.expect_decrypt().withf(|c| c == "ENC").returning(|_| Ok("plain".to_string()));

    let envelope = Envelope::new(Some(Arc::new(mock)), "key-1".into(), true);
    assert_eq!(envelope.seal(&ciphered(), "plain").await.unwrap(), "ENC");
    assert_eq!(envelope.open(&ciphered(), "ENC").await.unwrap(), "plain");
}

#[tokio::test]
async fn test_oracle_failures_are_classified() {
    let mut mock = MockKmsProvider::new();
    mock.expect_encrypt().returning(|_, _| Err(Error::Encrypt("kms down".into())));
    mock.expect_decrypt().returning(|_| Err(Error::Decrypt("kms down".into())));

    let envelope = Envelope::new(Some(Arc::new(mock)), "key-1".into(), true);
    assert!(matches!(
        envelope.seal(&ciphered(), "plain").await,
        Err(Error::Encrypt(_))
    ));
    assert!(matches!(
        envelope.open(&ciphered(), "ENC").await,
        Err(Error::Decrypt(_))
    ));
}

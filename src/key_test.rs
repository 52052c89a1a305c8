use super::*;
use std::path::PathBuf;

#[test]
fn test_blank_group_defaults() {
    let key = ConfigKey::new("app.properties", "", "tenant-a").unwrap();
    assert_eq!(key.group(), "DEFAULT_GROUP");

    let key = ConfigKey::new("app.properties", "   ", "tenant-a").unwrap();
    assert_eq!(key.group(), "DEFAULT_GROUP");
}

#[test]
fn test_invalid_data_id_rejected() {
    assert!(ConfigKey::new("", "G", "T").is_err());
    assert!(ConfigKey::new("has space", "G", "T").is_err());
    assert!(ConfigKey::new("has/slash", "G", "T").is_err());
}

#[test]
fn test_invalid_group_rejected() {
    assert!(ConfigKey::new("D", "bad group", "T").is_err());
}

#[test]
fn test_accepted_charset() {
    let key = ConfigKey::new("com.alibaba.cloud:sample-app_1.properties", "grp-1", "ns").unwrap();
    assert_eq!(key.data_id(), "com.alibaba.cloud:sample-app_1.properties");
}

#[test]
fn test_key_equality_is_componentwise() {
    let a = ConfigKey::new("D", "G", "T").unwrap();
    let b = ConfigKey::new("D", "G", "T").unwrap();
    let c = ConfigKey::new("D", "G", "").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_cipher_prefix_detection() {
    assert!(ConfigKey::new("cipher-db-password", "G", "T").unwrap().is_ciphered());
    assert!(!ConfigKey::new("db-password", "G", "T").unwrap().is_ciphered());
    // Prefix match only at the start.
    assert!(!ConfigKey::new("not-cipher-x", "G", "T").unwrap().is_ciphered());
}

#[test]
fn test_relative_path_layout() {
    let key = ConfigKey::new("D", "G", "T").unwrap();
    assert_eq!(key.relative_path(), PathBuf::from("T/G/D"));

    // Empty tenant maps to the sentinel directory.
    let key = ConfigKey::new("D", "G", "").unwrap();
    assert_eq!(key.relative_path(), PathBuf::from("DEFAULT_TENANT/G/D"));
}

#[test]
fn test_display_format() {
    let key = ConfigKey::new("D", "G", "T").unwrap();
    assert_eq!(key.to_string(), "D+G+T");
}

//! Loading the same TOML through different key orderings must yield the
//! same config hash; changing a value must change it.

use std::io::Write;

const BASE_TOML: &str = r#"
concurrent = 4
interval = 3

[postgres]
host = "db.internal"
port = 5433
"#;

const BASE_TOML_REORDERED: &str = r#"
interval = 3
concurrent = 4

[postgres]
port = 5433
host = "db.internal"
"#;

#[test]
fn hash_is_stable_across_key_order() {
    let mut a = tempfile::NamedTempFile::new().unwrap();
    write!(a, "{BASE_TOML}").unwrap();
    let mut b = tempfile::NamedTempFile::new().unwrap();
    write!(b, "{BASE_TOML_REORDERED}").unwrap();

    let loaded_a = walt_config::load(Some(a.path()));
    let loaded_b = walt_config::load(Some(b.path()));

    assert_eq!(loaded_a.config_hash, loaded_b.config_hash);
    assert_eq!(loaded_a.config, loaded_b.config);
}

#[test]
fn hash_changes_when_a_value_changes() {
    let mut a = tempfile::NamedTempFile::new().unwrap();
    write!(a, "{BASE_TOML}").unwrap();
    let mut c = tempfile::NamedTempFile::new().unwrap();
    write!(c, "concurrent = 5\ninterval = 3\n\n[postgres]\nhost = \"db.internal\"\nport = 5433\n").unwrap();

    let loaded_a = walt_config::load(Some(a.path()));
    let loaded_c = walt_config::load(Some(c.path()));

    assert_ne!(loaded_a.config_hash, loaded_c.config_hash);
}

#[test]
fn hash_is_deterministic_for_repeated_loads() {
    let loaded_1 = walt_config::load(None);
    let loaded_2 = walt_config::load(None);
    assert_eq!(loaded_1.config_hash, loaded_2.config_hash);
}

use std::sync::Arc;

use measure_mockup::codes::{CodeEntry, CodeResolver, CodeValidity};
use measure_mockup::resources::ResourceManager;

use crate::utils::{PSA_CODES, write_file};

#[test]
fn test_code_directory_is_loaded_once_per_year() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "codes.csv", PSA_CODES);
    let resources = ResourceManager::new();

    let first = resources.acquire(&path, 2026).unwrap();
    let second = resources.acquire(&path, 2026).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(resources.cached_resolvers(), 1);

    let other_year = resources.acquire(&path, 2020).unwrap();
    assert!(!Arc::ptr_eq(&first, &other_year));
    assert_eq!(resources.cached_resolvers(), 2);

    assert_eq!(resources.invalidate(&path).unwrap(), 2);
    assert_eq!(resources.cached_resolvers(), 0);

    let reloaded = resources.acquire(&path, 2026).unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
}

#[test]
fn test_validity_window_filters_codes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "codes.csv", PSA_CODES);
    let codes = ResourceManager::new().acquire(&path, 2026).unwrap();

    assert_eq!(codes.len(), 4);
    assert_eq!(codes.get_codes("PSA Lab Test", true), ["84153".to_string()]);
    assert_eq!(codes.get_codes("psa lab test", false).len(), 2);
    assert_eq!(codes.get_code_system("C61"), "ICD10CM");

    assert_eq!(codes.is_code_valid("84153", None), CodeValidity::Valid);
    assert!(matches!(codes.is_code_valid("84154", None), CodeValidity::Expired(_)));
    assert_eq!(codes.is_code_valid("99999", None), CodeValidity::NotFound);
}

#[test]
fn test_value_set_search() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "codes.csv", PSA_CODES);
    let codes = CodeResolver::load(&path, 2026).unwrap();

    assert_eq!(codes.find_value_sets("cancer", false), vec!["Prostate Cancer"]);
    assert_eq!(codes.find_value_sets("^psa", true), vec!["PSA Lab Test"]);
    assert!(codes.find_value_sets("hospice", false).is_empty());
}

#[test]
fn test_inserted_resolver_is_shared() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "codes.csv", PSA_CODES);
    let resources = ResourceManager::new();

    let resolver = CodeResolver::from_entries(vec![CodeEntry::new("Custom", "X1", "CPT")], 2026);
    let inserted = resources.insert(&path, resolver).unwrap();
    let acquired = resources.acquire(&path, 2026).unwrap();

    assert!(Arc::ptr_eq(&inserted, &acquired));
    assert_eq!(acquired.value_set_names(), ["Custom".to_string()]);

    resources.clear().unwrap();
    assert_eq!(resources.cached_resolvers(), 0);
}

#[test]
fn test_relative_path_invalidated_after_removal() {
    // Created under the working directory so the path stays relative
    let dir = tempfile::tempdir_in(".").unwrap();
    assert!(dir.path().is_relative());
    let path = write_file(dir.path(), "vsd.csv", PSA_CODES);
    let resources = ResourceManager::new();

    resources.acquire(&path, 2026).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(resources.invalidate(&path).unwrap(), 1);
    assert_eq!(resources.cached_resolvers(), 0);
}

#[test]
fn test_missing_code_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let resources = ResourceManager::new();
    assert!(resources.acquire(&dir.path().join("nope.xlsx"), 2026).is_err());
    assert_eq!(resources.cached_resolvers(), 0);
}

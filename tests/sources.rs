use std::collections::BTreeSet;
use std::fs;

use camino::Utf8PathBuf;

use spt_item_scanner::domain::Identity;
use spt_item_scanner::sources::IdentitySources;

const A: &str = "5448be9a4bdc2dfd2f8b456a";
const B: &str = "5449016a4bdc2d6f028b456f";
const C: &str = "544fb45d4bdc2dee738b4568";

fn sources(dir: &tempfile::TempDir) -> IdentitySources {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    IdentitySources::new(root.join("items.json"), root.join("production.json"))
}

#[test]
fn union_of_catalog_and_recipes() {
    let dir = tempfile::tempdir().unwrap();
    let sources = sources(&dir);
    fs::write(
        sources.catalog_path().as_std_path(),
        format!(r#"{{"{A}": {{"_id": "{A}"}}, "{B}": {{"_id": "{B}"}}}}"#),
    )
    .unwrap();
    fs::write(
        sources.recipes_path().as_std_path(),
        format!(
            r#"{{"recipes": [{{"endProduct": "{B}", "requirements": [{{"type": "Tool", "templateId": "{C}"}}]}}]}}"#
        ),
    )
    .unwrap();

    let expected: BTreeSet<Identity> = [A, B, C].iter().map(|id| id.parse().unwrap()).collect();
    assert_eq!(sources.extract_identities(), expected);
}

#[test]
fn missing_files_yield_nothing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(sources(&dir).extract_identities().is_empty());
}

#[test]
fn missing_catalog_keeps_recipe_identities() {
    let dir = tempfile::tempdir().unwrap();
    let sources = sources(&dir);
    fs::write(
        sources.recipes_path().as_std_path(),
        format!(r#"{{"recipes": [{{"endProduct": "{C}", "requirements": []}}]}}"#),
    )
    .unwrap();

    let ids = sources.extract_identities();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains(&C.parse().unwrap()));
}

use chrono::{TimeZone, Utc};
use serde_json::json;

use spt_item_scanner::dedup::resolve;
use spt_item_scanner::domain::{Identity, Record};

fn id() -> Identity {
    "5e831507ea0a7c419c2f9bd9".parse().unwrap()
}

fn bare() -> Record {
    Record::new(id(), Utc.timestamp_opt(1_710_000_000, 0).unwrap())
}

#[test]
fn more_complete_record_wins() {
    let mut sparse = bare();
    sparse.kind = "Item".to_string();

    let mut complete = bare();
    complete.kind = "Item".to_string();
    complete
        .localized_fields
        .insert("Name".to_string(), json!("Esmarch tourniquet"));
    complete.handbook.insert("Price".to_string(), json!(2900));

    let cache = resolve(vec![sparse, complete.clone()]).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&id()), Some(&complete));
}

#[test]
fn ties_keep_the_first_candidate() {
    let mut first = bare();
    first.display_name = "first".to_string();
    let mut second = bare();
    second.display_name = "second".to_string();

    let cache = resolve(vec![first.clone(), second]).unwrap();
    assert_eq!(cache.get(&id()), Some(&first));
}

#[test]
fn resolving_twice_changes_nothing() {
    let mut other = Record::new(
        "544fb25a4bdc2dfb738b4567".parse().unwrap(),
        Utc.timestamp_opt(1_710_000_000, 0).unwrap(),
    );
    other.kind = "Item".to_string();
    let candidates = vec![bare(), other, bare()];

    let once = resolve(candidates).unwrap();
    let twice = resolve(once.records().cloned()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.len(), 2);
}

use archivist::{Archivist, Format, Result, Serializable, Strategies};
use serde_json::{Value, json};
use std::collections::HashMap;

#[derive(Serializable, Debug, Default, PartialEq)]
struct Account {
    id: u64,
    #[archivist(rename = "display_name")]
    name: String,
    #[archivist(skip)]
    session_token: Option<Box<u32>>,
    balances: HashMap<String, i64>,
}

#[derive(Serializable, Debug, Default, PartialEq)]
#[archivist(version = 4)]
struct Versioned {
    value: u16,
}

#[derive(Serializable, Debug, Default, PartialEq)]
struct Rgb(u8, u8, #[archivist(rename = "blue")] u8);

#[derive(Serializable, Debug, Default, PartialEq)]
struct Unit;

#[derive(Serializable, Debug, Default, PartialEq)]
#[archivist(version = 1)]
struct VersionedUnit;

#[derive(Serializable, Debug, Default, PartialEq)]
struct Wrapper<T> {
    inner: T,
    items: Vec<T>,
}

fn tree(value: &mut impl Serializable) -> Result<Value> {
    let bytes = Archivist::builder().format(Format::Tree).compact().build().to_bytes(value)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[test]
fn renamed_and_skipped_fields() -> Result<()> {
    let mut account = Account {
        id: 9,
        name: "ada".into(),
        session_token: Some(Box::new(77)),
        balances: HashMap::from([("eur".to_string(), -5)]),
    };
    assert_eq!(
        tree(&mut account)?,
        json!({
            "value0": {
                "id": 9,
                "display_name": "ada",
                "balances": [{"key": "eur", "value": -5}],
            }
        })
    );

    let loaded: Account = Archivist::from_bytes(&Archivist::to_bytes(&mut account)?)?;
    assert_eq!(loaded.session_token, None);
    assert_eq!(loaded.name, "ada");
    assert_eq!(loaded.balances, account.balances);
    Ok(())
}

#[test]
fn version_attribute_selects_the_versioned_strategy() -> Result<()> {
    assert_eq!(Versioned::STRATEGY, Strategies::SERIALIZE_VERSIONED);
    assert_eq!(Versioned::VERSION, 4);

    let bytes = Archivist::to_bytes(&mut Versioned { value: 3 })?;
    let mut expected = 4u32.to_ne_bytes().to_vec();
    expected.extend_from_slice(&3u16.to_ne_bytes());
    assert_eq!(bytes, expected);
    assert_eq!(Archivist::from_bytes::<Versioned>(&bytes)?, Versioned { value: 3 });
    Ok(())
}

#[test]
fn tuple_structs_are_positional() -> Result<()> {
    let mut color = Rgb(1, 2, 3);
    assert_eq!(tree(&mut color)?, json!({"value0": {"value0": 1, "value1": 2, "blue": 3}}));
    assert_eq!(Archivist::to_bytes(&mut color)?, [1, 2, 3]);
    Ok(())
}

#[test]
fn unit_structs_are_empty() -> Result<()> {
    assert_eq!(Unit::STRATEGY, Strategies::EMPTY);
    assert!(Archivist::to_bytes(&mut Unit)?.is_empty());
    assert_eq!(Archivist::from_bytes::<Unit>(&[])?, Unit);

    assert_eq!(VersionedUnit::STRATEGY, Strategies::SERIALIZE_VERSIONED);
    assert_eq!(Archivist::to_bytes(&mut VersionedUnit)?, 1u32.to_ne_bytes());
    Ok(())
}

#[test]
fn generic_structs_bound_their_parameters() -> Result<()> {
    let mut wrapper = Wrapper { inner: 'x', items: vec!['y', 'z'] };
    let bytes = Archivist::to_bytes(&mut wrapper)?;
    assert_eq!(Archivist::from_bytes::<Wrapper<char>>(&bytes)?, wrapper);

    let mut nested = Wrapper { inner: Rgb(0, 0, 0), items: vec![Rgb(9, 8, 7)] };
    let doc = tree(&mut nested)?;
    assert_eq!(doc["value0"]["items"], json!([{"value0": 9, "value1": 8, "blue": 7}]));
    Ok(())
}

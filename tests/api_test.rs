#![allow(missing_docs)]

use archivist::{
    ArchiveError, ArchiveOptions, Archiver, Archivist, Endianness, Format, Result, Serializable,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;

#[derive(Serializable, Debug, Default, PartialEq, Clone)]
struct Inventory {
    owner: String,
    slots: Vec<Option<Box<Item>>>,
    totals: BTreeMap<String, u32>,
}

#[derive(Serializable, Debug, Default, PartialEq, Clone)]
struct Item {
    name: String,
    weight: f32,
}

fn inventory() -> Inventory {
    Inventory {
        owner: "mira".into(),
        slots: vec![
            Some(Box::new(Item { name: "rope".into(), weight: 1.5 })),
            None,
            Some(Box::new(Item { name: "lamp".into(), weight: 0.75 })),
        ],
        totals: BTreeMap::from([("rope".to_string(), 1), ("lamp".to_string(), 1)]),
    }
}

fn archivers() -> Vec<Archiver> {
    vec![
        Archiver::default(),
        Archivist::builder().format(Format::PortableBinary).endianness(Endianness::Big).build(),
        Archivist::builder().format(Format::PortableBinary).endianness(Endianness::Little).build(),
        Archivist::builder().format(Format::Tree).build(),
        Archivist::builder().format(Format::Tree).indent(2).build(),
        Archivist::builder().format(Format::Tree).compact().build(),
    ]
}

#[test]
fn bytes_round_trip_in_every_configuration() -> Result<()> {
    for archiver in archivers() {
        let mut original = inventory();
        let bytes = archiver.to_bytes(&mut original)?;
        let loaded: Inventory = archiver.from_bytes(&bytes)?;
        assert_eq!(loaded, original, "{:?}", archiver.options());
    }
    Ok(())
}

#[test]
fn streams_round_trip_through_write_and_read() -> Result<()> {
    let mut buffer = Vec::new();
    Archivist::write(&mut buffer, &mut inventory())?;
    let loaded: Inventory = Archivist::read(Cursor::new(buffer))?;
    assert_eq!(loaded, inventory());
    Ok(())
}

#[test]
fn files_round_trip_through_save_and_load() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (index, archiver) in archivers().into_iter().enumerate() {
        let path = dir.path().join(format!("inventory_{index}.arc"));
        archiver.save(&path, &mut inventory())?;
        assert!(fs::metadata(&path)?.len() > 0);
        assert_eq!(archiver.load::<Inventory, _>(&path)?, inventory());
    }
    Ok(())
}

#[test]
fn static_helpers_use_the_native_binary_format() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("numbers.bin");
    Archivist::save(&path, &mut vec![1u16, 2])?;

    let mut expected = 2u64.to_ne_bytes().to_vec();
    expected.extend_from_slice(&1u16.to_ne_bytes());
    expected.extend_from_slice(&2u16.to_ne_bytes());
    assert_eq!(fs::read(&path)?, expected);
    assert_eq!(Archivist::load::<Vec<u16>, _>(&path)?, [1, 2]);
    Ok(())
}

#[test]
fn empty_files_load_empty_types_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("empty.bin");
    fs::write(&path, b"")?;

    Archivist::load::<(), _>(&path)?;
    assert!(matches!(
        Archivist::load::<u32, _>(&path),
        Err(ArchiveError::ShortRead { requested: 4, read: 0 })
    ));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let result = Archivist::load::<u32, _>("/definitely/not/here.arc");
    assert!(matches!(result, Err(ArchiveError::Io(_))));
}

#[test]
fn options_can_come_from_configuration_files() -> Result<()> {
    let options: ArchiveOptions = serde_json::from_str(r#"{ "format": "tree", "indent": null }"#)?;
    assert_eq!(options.format, Format::Tree);
    assert_eq!(options.endianness, Endianness::native());

    let archiver = Archivist::builder().options(options).build();
    let bytes = archiver.to_bytes(&mut 5u8)?;
    assert_eq!(bytes, br#"{"value0":5}"#);

    let defaults: ArchiveOptions = serde_json::from_str("{}")?;
    assert_eq!(defaults, ArchiveOptions::default());
    assert_eq!(Archiver::new(defaults).options().format, Format::Binary);
    Ok(())
}

#[test]
fn decoding_errors_do_not_panic() {
    let garbage = [0xFFu8; 16];
    for archiver in archivers() {
        assert!(archiver.from_bytes::<Inventory>(&garbage).is_err());
    }
}

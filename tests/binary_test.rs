use archivist::registry::set_class_version;
use archivist::{
    Archive, ArchiveError, Construct, InputArchive, Minimal, MinimalKind, OutputArchive, Result,
    Serializable, Strategies, defer,
};
use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

// --- FIXTURES ---

#[derive(Debug, Default, PartialEq)]
struct Config {
    level: u8,
    label: String,
}

impl Serializable for Config {
    const STRATEGY: Strategies = Strategies::SERIALIZE_VERSIONED;
    const VERSION: u32 = 2;

    fn serialize<A: Archive>(&mut self, ar: &mut A, version: u32) -> Result<()> {
        ar.nvp("level", &mut self.level)?;
        if version >= 2 {
            ar.nvp("label", &mut self.label)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
struct Legacy {
    level: u8,
    label: String,
}

impl Serializable for Legacy {
    const STRATEGY: Strategies = Strategies::SERIALIZE_VERSIONED;
    const VERSION: u32 = 2;

    fn serialize<A: Archive>(&mut self, ar: &mut A, version: u32) -> Result<()> {
        ar.nvp("level", &mut self.level)?;
        if version >= 2 {
            ar.nvp("label", &mut self.label)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Celsius(f32);

impl Serializable for Celsius {
    const STRATEGY: Strategies = Strategies::minimal(MinimalKind::of::<f32>());

    fn save_minimal(&self, _version: u32) -> Result<Minimal> {
        Ok(Minimal::from(self.0))
    }

    fn load_minimal(&mut self, value: Minimal, _version: u32) -> Result<()> {
        self.0 = value.into_primitive()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LyingSurrogate;

impl Serializable for LyingSurrogate {
    const STRATEGY: Strategies = Strategies::minimal(MinimalKind::STRING);

    fn save_minimal(&self, _version: u32) -> Result<Minimal> {
        Ok(Minimal::from(1u8))
    }
}

#[derive(Debug, Default)]
struct Undeclared;

impl Serializable for Undeclared {}

#[derive(Debug, Default)]
struct Indecisive;

impl Serializable for Indecisive {
    const STRATEGY: Strategies = Strategies::SERIALIZE.with(Strategies::SAVE_LOAD);
}

#[derive(Debug, Default)]
struct Forgetful;

impl Serializable for Forgetful {
    const STRATEGY: Strategies = Strategies::SAVE_LOAD;
}

#[derive(Debug, Default, PartialEq)]
struct Marker;

impl Serializable for Marker {
    const STRATEGY: Strategies = Strategies::EMPTY;
}

#[derive(Debug, Default, PartialEq)]
struct Base {
    id: u32,
}

impl Serializable for Base {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.nvp("id", &mut self.id)
    }
}

/// Reaches its base through two paths, like a diamond hierarchy.
#[derive(Debug, Default, PartialEq)]
struct Diamond {
    base: Base,
    left: u8,
    right: u8,
}

impl Serializable for Diamond {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.virtual_base_class(&mut self.base)?;
        ar.nvp("left", &mut self.left)?;
        ar.virtual_base_class(&mut self.base)?;
        ar.nvp("right", &mut self.right)
    }
}

#[derive(Debug, Default, PartialEq)]
struct Twice {
    base: Base,
}

impl Serializable for Twice {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.base_class(&mut self.base)?;
        ar.base_class(&mut self.base)
    }
}

#[derive(Debug, PartialEq)]
struct Ticket {
    serial: u64,
}

impl Serializable for Ticket {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.nvp("serial", &mut self.serial)
    }
}

impl Construct for Ticket {
    fn load_and_construct(ar: &mut InputArchive<'_>, _version: u32) -> Result<Self> {
        let mut serial = 0u64;
        ar.nvp("serial", &mut serial)?;
        Ok(Self { serial })
    }
}

#[derive(Debug, Default)]
struct Holder {
    head: u8,
    tail: Rc<RefCell<Vec<u16>>>,
}

impl Serializable for Holder {
    const STRATEGY: Strategies = Strategies::SERIALIZE;

    fn serialize<A: Archive>(&mut self, ar: &mut A, _version: u32) -> Result<()> {
        ar.nvp("head", &mut self.head)?;
        ar.defer(defer(&self.tail))
    }
}

fn encode(build: impl FnOnce(&mut OutputArchive<'_>) -> Result<()>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut ar = OutputArchive::binary(&mut bytes);
    build(&mut ar)?;
    ar.finish()?;
    Ok(bytes)
}

// --- TESTS ---

#[test]
fn pair_then_vector_decodes_in_order_without_overreading() -> Result<()> {
    let mut bytes = encode(|ar| {
        ar.process(&mut (true, 1234i32))?;
        ar.process(&mut vec![1i32, 2, 3])
    })?;
    assert_eq!(bytes.len(), 1 + 4 + 8 + 3 * 4);
    bytes.push(0xFF);

    let mut cursor = Cursor::new(bytes);
    {
        let mut ar = InputArchive::binary(&mut cursor);
        let mut pair = (false, 0i32);
        let mut numbers: Vec<i32> = Vec::new();
        ar.process(&mut pair)?;
        ar.process(&mut numbers)?;
        assert_eq!(pair, (true, 1234));
        assert_eq!(numbers, [1, 2, 3]);
    }
    assert_eq!(cursor.position(), 25);
    Ok(())
}

#[test]
fn class_version_is_written_once_per_type() -> Result<()> {
    let mut configs = vec![
        Config { level: 1, label: "a".into() },
        Config { level: 2, label: "b".into() },
    ];
    let bytes = encode(|ar| ar.process(&mut configs))?;
    // size tag, one version, then two (level + label) bodies
    assert_eq!(bytes.len(), 8 + 4 + 2 * (1 + 8 + 1));
    assert_eq!(&bytes[8..12], &2u32.to_ne_bytes());

    let mut ar = InputArchive::binary(bytes.as_slice());
    assert_eq!(ar.construct::<Vec<Config>>()?, configs);
    Ok(())
}

#[test]
fn version_override_reaches_the_routine() -> Result<()> {
    set_class_version::<Legacy>(1);
    let bytes = encode(|ar| ar.process(&mut Legacy { level: 7, label: "dropped".into() }))?;
    let mut expected = 1u32.to_ne_bytes().to_vec();
    expected.push(7);
    assert_eq!(bytes, expected);

    let mut ar = InputArchive::binary(bytes.as_slice());
    assert_eq!(ar.construct::<Legacy>()?, Legacy { level: 7, label: String::new() });
    Ok(())
}

#[test]
fn minimal_values_are_written_as_their_surrogate() -> Result<()> {
    let bytes = encode(|ar| ar.process(&mut Celsius(21.5)))?;
    assert_eq!(bytes, 21.5f32.to_ne_bytes());

    let mut ar = InputArchive::binary(bytes.as_slice());
    assert_eq!(ar.construct::<Celsius>()?, Celsius(21.5));
    Ok(())
}

#[test]
fn surrogate_of_the_wrong_kind_is_rejected() {
    let result = encode(|ar| ar.process(&mut LyingSurrogate));
    assert!(matches!(result, Err(ArchiveError::Internal(_))));
}

#[test]
fn strategy_declarations_are_checked_before_writing() -> Result<()> {
    let mut bytes = Vec::new();
    let mut ar = OutputArchive::binary(&mut bytes);
    assert!(matches!(ar.process(&mut Undeclared), Err(ArchiveError::MissingStrategy(_))));
    assert!(matches!(ar.process(&mut Indecisive), Err(ArchiveError::AmbiguousStrategy { .. })));
    assert!(matches!(ar.process(&mut Forgetful), Err(ArchiveError::MissingStrategy(_))));
    ar.finish()?;
    assert!(bytes.is_empty());
    Ok(())
}

#[test]
fn empty_types_write_nothing() -> Result<()> {
    let bytes = encode(|ar| {
        ar.process(&mut Marker)?;
        ar.process(&mut ())
    })?;
    assert!(bytes.is_empty());

    let mut ar = InputArchive::binary(bytes.as_slice());
    assert_eq!(ar.construct::<Marker>()?, Marker);
    Ok(())
}

#[test]
fn virtual_base_is_processed_once_per_object() -> Result<()> {
    let mut diamond = Diamond { base: Base { id: 99 }, left: 1, right: 2 };
    let bytes = encode(|ar| ar.process(&mut diamond))?;
    assert_eq!(bytes.len(), 4 + 1 + 1);

    let mut ar = InputArchive::binary(bytes.as_slice());
    assert_eq!(ar.construct::<Diamond>()?, diamond);
    Ok(())
}

#[test]
fn plain_base_class_is_processed_every_time() -> Result<()> {
    let bytes = encode(|ar| ar.process(&mut Twice { base: Base { id: 5 } }))?;
    assert_eq!(bytes.len(), 8);
    Ok(())
}

#[test]
fn types_without_default_are_built_by_load_and_construct() -> Result<()> {
    let mut tickets = vec![Ticket { serial: 10 }, Ticket { serial: 11 }];
    let bytes = encode(|ar| ar.process(&mut tickets))?;

    let mut ar = InputArchive::binary(bytes.as_slice());
    assert_eq!(ar.construct::<Vec<Ticket>>()?, tickets);
    Ok(())
}

#[test]
fn deferred_data_is_written_after_everything_else() -> Result<()> {
    let mut first = Holder { head: 1, tail: Rc::new(RefCell::new(vec![10])) };
    let mut second = Holder { head: 2, tail: Rc::new(RefCell::new(vec![20, 21])) };

    let mut bytes = Vec::new();
    let mut ar = OutputArchive::binary(&mut bytes);
    ar.process(&mut first)?;
    ar.process(&mut second)?;
    assert_eq!(ar.pending_deferred(), 2);
    ar.flush_deferred()?;
    assert_eq!(ar.pending_deferred(), 0);
    ar.finish()?;

    assert_eq!(&bytes[..2], &[1, 2]);
    assert_eq!(bytes.len(), 2 + (8 + 2) + (8 + 4));

    let mut ar = InputArchive::binary(bytes.as_slice());
    let mut a = Holder::default();
    let mut b = Holder::default();
    ar.process(&mut a)?;
    ar.process(&mut b)?;
    ar.flush_deferred()?;
    assert_eq!((a.head, b.head), (1, 2));
    assert_eq!(*a.tail.borrow(), [10]);
    assert_eq!(*b.tail.borrow(), [20, 21]);
    Ok(())
}

#[test]
fn reset_forgets_written_versions() -> Result<()> {
    let mut bytes = Vec::new();
    let mut ar = OutputArchive::binary(&mut bytes);
    ar.process(&mut Config::default())?;
    ar.reset();
    ar.process(&mut Config::default())?;
    ar.finish()?;
    assert_eq!(bytes.len(), 2 * (4 + 1 + 8));
    Ok(())
}

#[test]
fn invalid_bool_byte_is_malformed() {
    let mut ar = InputArchive::binary(&[2u8][..]);
    match ar.construct::<bool>() {
        Err(ArchiveError::Malformed(msg)) => assert_eq!(msg, "Invalid bool value '2' at byte 0"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn truncated_input_reports_the_short_read() {
    let mut ar = InputArchive::binary(&[1u8, 2][..]);
    assert!(matches!(ar.construct::<u32>(), Err(ArchiveError::ShortRead { requested: 4, read: 2 })));
}

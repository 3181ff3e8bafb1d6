use archivist::registry::Registry;
use archivist::{
    Archive, ArchiveError, Archivist, Format, InputArchive, Polymorphic, Result, Serializable,
};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

trait Shape: Polymorphic {
    fn area(&self) -> f64;
}

trait Named: Polymorphic {
    fn name(&self) -> &'static str;
}

archivist::polymorphic_base!(dyn Shape, Circle);
archivist::polymorphic_base!(dyn Named);

#[derive(Serializable, Debug, Default, PartialEq)]
struct Circle {
    radius: f64,
}

#[derive(Serializable, Debug, Default, PartialEq)]
struct Square {
    side: f64,
}

#[derive(Serializable, Debug, Default, PartialEq)]
struct Triangle {
    base: f64,
    height: f64,
}

#[derive(Serializable, Debug, Default, PartialEq)]
struct Hexagon {
    side: f64,
}

impl Shape for Circle {
    fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

impl Shape for Triangle {
    fn area(&self) -> f64 {
        self.base * self.height / 2.0
    }
}

impl Shape for Hexagon {
    fn area(&self) -> f64 {
        3.0 * 3f64.sqrt() / 2.0 * self.side * self.side
    }
}

impl Named for Square {
    fn name(&self) -> &'static str {
        "square"
    }
}

const SQUARE: &str = "polymorphic_test::Square";

fn register() -> Result<()> {
    archivist::register_polymorphic!(dyn Shape => Square, SQUARE)?;
    archivist::register_polymorphic!(dyn Shape => Hexagon)?;
    Ok(())
}

type SharedShape = Option<Rc<RefCell<dyn Shape>>>;

fn shape<S: Shape>(value: S) -> Rc<RefCell<dyn Shape>> {
    Rc::new(RefCell::new(value))
}

fn area(pointer: &SharedShape) -> Option<f64> {
    pointer.as_ref().map(|rc| rc.borrow().area())
}

struct Bytes(Vec<u8>);

impl Bytes {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn id(mut self, raw: u32) -> Self {
        self.0.extend_from_slice(&raw.to_ne_bytes());
        self
    }

    fn text(mut self, value: &str) -> Self {
        self.0.extend_from_slice(&(value.len() as u64).to_ne_bytes());
        self.0.extend_from_slice(value.as_bytes());
        self
    }

    fn float(mut self, value: f64) -> Self {
        self.0.extend_from_slice(&value.to_ne_bytes());
        self
    }

    fn flag(mut self, value: u8) -> Self {
        self.0.push(value);
        self
    }
}

#[test]
fn type_name_is_sent_once_per_session() -> Result<()> {
    register()?;
    let first = shape(Square { side: 2.0 });
    let mut shapes: (SharedShape, SharedShape, SharedShape) =
        (Some(Rc::clone(&first)), Some(Rc::clone(&first)), Some(shape(Square { side: 3.0 })));
    let bytes = Archivist::to_bytes(&mut shapes)?;

    let expected = Bytes::new()
        .id(0x8000_0001)
        .text(SQUARE)
        .id(0x8000_0001)
        .float(2.0)
        .id(1)
        .id(1)
        .id(1)
        .id(0x8000_0002)
        .float(3.0);
    assert_eq!(bytes, expected.0);

    let (a, b, c): (SharedShape, SharedShape, SharedShape) = Archivist::from_bytes(&bytes)?;
    assert_eq!(area(&a), Some(4.0));
    assert_eq!(area(&c), Some(9.0));
    match (&a, &b, &c) {
        (Some(a), Some(b), Some(c)) => {
            assert!(Rc::ptr_eq(a, b));
            assert!(!Rc::ptr_eq(a, c));
        }
        _ => panic!("a pointer loaded as null"),
    }
    Ok(())
}

#[test]
fn static_type_travels_inline_without_registration() -> Result<()> {
    let mut pointer: SharedShape = Some(shape(Circle { radius: 1.0 }));
    let bytes = Archivist::to_bytes(&mut pointer)?;
    assert_eq!(bytes, Bytes::new().id(0x4000_0000).id(0x8000_0001).float(1.0).0);

    let loaded: SharedShape = Archivist::from_bytes(&bytes)?;
    assert_eq!(area(&loaded), Some(std::f64::consts::PI));
    Ok(())
}

#[test]
fn null_polymorphic_pointer_is_id_zero() -> Result<()> {
    let mut pointer: SharedShape = None;
    let bytes = Archivist::to_bytes(&mut pointer)?;
    assert_eq!(bytes, Bytes::new().id(0).0);
    assert!(Archivist::from_bytes::<SharedShape>(&bytes)?.is_none());
    Ok(())
}

#[test]
fn boxed_trait_objects_round_trip() -> Result<()> {
    register()?;
    let mut boxed: Option<Box<dyn Shape>> = Some(Box::new(Square { side: 5.0 }));
    let bytes = Archivist::to_bytes(&mut boxed)?;
    assert_eq!(bytes, Bytes::new().id(0x8000_0001).text(SQUARE).flag(1).float(5.0).0);

    let loaded: Option<Box<dyn Shape>> = Archivist::from_bytes(&bytes)?;
    assert_eq!(loaded.map(|shape| shape.area()), Some(25.0));
    Ok(())
}

#[test]
fn default_name_is_the_type_path() -> Result<()> {
    register()?;
    let binding = Registry::global()
        .binding_by_name("Hexagon")
        .ok_or_else(|| ArchiveError::Internal("Hexagon missing".into()))?;
    assert_eq!(binding.type_id(), std::any::TypeId::of::<Hexagon>());
    Ok(())
}

#[test]
fn unregistered_type_cannot_be_saved() {
    let mut pointer: SharedShape = Some(shape(Triangle { base: 1.0, height: 1.0 }));
    match Archivist::to_bytes(&mut pointer) {
        Err(ArchiveError::UnregisteredType { action, type_name }) => {
            assert_eq!(action, "save");
            assert!(type_name.ends_with("Triangle"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_transmitted_name_cannot_be_loaded() {
    let bytes = Bytes::new().id(0x8000_0001).text("nowhere::Ghost").id(0x8000_0001).float(1.0);
    match Archivist::from_bytes::<SharedShape>(&bytes.0) {
        Err(ArchiveError::UnregisteredType { action, type_name }) => {
            assert_eq!(action, "load");
            assert_eq!(type_name, "nowhere::Ghost");
        }
        other => panic!("unexpected {:?}", other.map(|p| p.is_some())),
    }
}

#[test]
fn type_back_reference_must_be_known() {
    let bytes = Bytes::new().id(2).id(1);
    let result = Archivist::from_bytes::<SharedShape>(&bytes.0);
    assert!(matches!(result, Err(ArchiveError::UnknownPolymorphicType(2))));
}

#[test]
fn missing_relation_is_a_cast_error() -> Result<()> {
    register()?;
    let mut named: Option<Box<dyn Named>> = Some(Box::new(Square { side: 1.0 }));
    let bytes = Archivist::to_bytes(&mut named)?;
    match Archivist::from_bytes::<Option<Box<dyn Named>>>(&bytes) {
        Err(ArchiveError::UnregisteredType { action, .. }) => assert_eq!(action, "cast"),
        other => panic!("unexpected {:?}", other.map(|p| p.map(|n| n.name()))),
    }
    Ok(())
}

#[test]
fn conflicting_name_is_rejected() -> Result<()> {
    register()?;
    let result = archivist::register_polymorphic!(dyn Shape => Triangle, SQUARE);
    assert!(matches!(result, Err(ArchiveError::Registration(_))));
    Ok(())
}

#[test]
fn expired_weak_to_a_trait_object_cannot_be_loaded() -> Result<()> {
    let mut weak: Weak<RefCell<dyn Shape>> = {
        let temporary = shape(Circle::default());
        Rc::downgrade(&temporary)
    };
    let bytes = Archivist::to_bytes(&mut weak)?;
    assert_eq!(bytes, Bytes::new().id(0).0);

    let mut ar = InputArchive::binary(&bytes[..]);
    let result = ar.process(&mut weak);
    assert!(matches!(result, Err(ArchiveError::Malformed(_))));
    Ok(())
}

#[test]
fn mixed_collections_in_a_tree_document() -> Result<()> {
    register()?;
    let archiver = Archivist::builder().format(Format::Tree).compact().build();
    let square = shape(Square { side: 2.0 });
    let mut shapes: Vec<SharedShape> =
        vec![Some(Rc::clone(&square)), Some(shape(Circle { radius: 1.0 })), None, Some(square)];
    let bytes = archiver.to_bytes(&mut shapes)?;

    let doc: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(
        doc,
        json!({
            "value0": [
                {
                    "polymorphic_id": 0x8000_0001u32,
                    "polymorphic_name": SQUARE,
                    "ptr_wrapper": {"id": 0x8000_0001u32, "data": {"side": 2.0}},
                },
                {
                    "polymorphic_id": 0x4000_0000u32,
                    "ptr_wrapper": {"id": 0x8000_0002u32, "data": {"radius": 1.0}},
                },
                {"polymorphic_id": 0},
                {"polymorphic_id": 1, "ptr_wrapper": {"id": 1}},
            ]
        })
    );

    let loaded: Vec<SharedShape> = archiver.from_bytes(&bytes)?;
    let areas: Vec<Option<f64>> = loaded.iter().map(area).collect();
    assert_eq!(areas, [Some(4.0), Some(std::f64::consts::PI), None, Some(4.0)]);
    match (&loaded[0], &loaded[3]) {
        (Some(first), Some(last)) => assert!(Rc::ptr_eq(first, last)),
        _ => panic!("shared square loaded as null"),
    }
    Ok(())
}

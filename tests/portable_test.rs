use archivist::{
    Archive, ArchiveError, Endianness, InputArchive, OutputArchive, PortableOptions, Result,
    Serializable,
};
use std::collections::BTreeMap;
use std::io::Cursor;

#[derive(Serializable, Debug, Default, PartialEq)]
struct Telemetry {
    station: String,
    samples: Vec<f64>,
    counters: BTreeMap<u16, i64>,
    flags: (bool, char),
}

fn sample() -> Telemetry {
    Telemetry {
        station: "north-7".into(),
        samples: vec![0.25, -3.5, f64::MAX],
        counters: BTreeMap::from([(1, -9), (40_000, i64::MIN)]),
        flags: (true, 'λ'),
    }
}

fn encode<T: Serializable>(value: &mut T, options: PortableOptions) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut ar = OutputArchive::portable_binary(&mut bytes, options)?;
    ar.process(value)?;
    ar.finish()?;
    Ok(bytes)
}

#[test]
fn header_announces_the_stream_order() -> Result<()> {
    assert_eq!(encode(&mut 0x0102_0304u32, PortableOptions::big_endian())?, [0, 1, 2, 3, 4]);
    assert_eq!(encode(&mut 0x0102_0304u32, PortableOptions::little_endian())?, [1, 4, 3, 2, 1]);
    Ok(())
}

#[test]
fn either_byte_order_reads_back_natively() -> Result<()> {
    for options in [PortableOptions::big_endian(), PortableOptions::little_endian()] {
        let bytes = encode(&mut sample(), options)?;
        let mut ar = InputArchive::portable_binary(Cursor::new(bytes), PortableOptions::default())?;
        assert_eq!(ar.construct::<Telemetry>()?, sample());
    }
    Ok(())
}

#[test]
fn both_orders_carry_the_same_payload_reversed() -> Result<()> {
    let big = encode(&mut -2i16, PortableOptions::big_endian())?;
    let little = encode(&mut -2i16, PortableOptions::little_endian())?;
    assert_eq!(big[1..], [0xFF, 0xFE]);
    assert_eq!(little[1..], [0xFE, 0xFF]);
    Ok(())
}

#[test]
fn input_order_option_selects_the_produced_order() -> Result<()> {
    let bytes = encode(&mut 0xA1B2_C3D4u32, PortableOptions::big_endian())?;
    let mut ar = InputArchive::portable_binary(Cursor::new(bytes), PortableOptions::new(Endianness::Big))?;
    let raw = ar.construct::<u32>()?;
    assert_eq!(u32::from_be(raw), 0xA1B2_C3D4);
    Ok(())
}

#[test]
fn bad_header_is_malformed() {
    let result = InputArchive::portable_binary(Cursor::new(vec![7u8, 0, 0]), PortableOptions::default());
    assert!(matches!(result, Err(ArchiveError::Malformed(_))));
}

#[test]
fn sequence_larger_than_the_stream_is_refused() -> Result<()> {
    let mut bytes = vec![Endianness::native().to_flag()];
    bytes.extend_from_slice(&u64::MAX.to_ne_bytes());
    bytes.extend_from_slice(&[0; 8]);

    let mut ar = InputArchive::portable_binary(Cursor::new(bytes), PortableOptions::default())?;
    let result = ar.construct::<Vec<u32>>();
    assert!(matches!(result, Err(ArchiveError::OversizedRead { remaining: 8, .. })));
    Ok(())
}

#[test]
fn oversized_string_is_refused() -> Result<()> {
    let mut bytes = vec![Endianness::native().to_flag()];
    bytes.extend_from_slice(&1_000_000u64.to_ne_bytes());
    bytes.push(b'x');

    let mut ar = InputArchive::portable_binary(Cursor::new(bytes), PortableOptions::default())?;
    let result = ar.construct::<String>();
    assert!(matches!(
        result,
        Err(ArchiveError::OversizedRead { requested: 1_000_000, remaining: 1 })
    ));
    Ok(())
}

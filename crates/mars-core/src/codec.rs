//! Record codec - binary (MessagePack) and text (JSON) encodings
//!
//! Both encodings are self-describing: structs are written as maps keyed by
//! field name, so decoding does not depend on field order and skips fields
//! it does not know. The streaming functions read or write exactly one
//! record and leave the cursor right after it.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// Serialized record encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Compact MessagePack with named fields
    #[default]
    Binary,
    /// Human-readable JSON
    Text,
}

impl Format {
    /// Lowercase format name
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Binary => "binary",
            Format::Text => "text",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "smile" | "msgpack" => Ok(Format::Binary),
            "text" | "json" => Ok(Format::Text),
            other => Err(Error::config(format!("unknown format '{}'", other))),
        }
    }
}

/// Encode a record into a new buffer
pub fn encode<T: Serialize>(record: &T, format: Format) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_record(&mut buffer, record, format)?;
    Ok(buffer)
}

/// Decode a record from a complete buffer
pub fn decode<T: DeserializeOwned>(bytes: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Binary => Ok(rmp_serde::from_slice(bytes)?),
        Format::Text => Ok(serde_json::from_slice(bytes)?),
    }
}

/// Write one record to `writer`
pub fn write_record<W: Write, T: Serialize>(writer: W, record: &T, format: Format) -> Result<()> {
    match format {
        Format::Binary => {
            let mut serializer = rmp_serde::Serializer::new(writer).with_struct_map();
            record.serialize(&mut serializer)?;
        }
        Format::Text => serde_json::to_writer(writer, record)?,
    }
    Ok(())
}

/// Read exactly one record from `reader`
pub fn read_record<R: Read, T: DeserializeOwned>(reader: R, format: Format) -> Result<T> {
    match format {
        Format::Binary => Ok(rmp_serde::from_read(reader)?),
        Format::Text => {
            let mut deserializer = serde_json::Deserializer::from_reader(reader);
            Ok(T::deserialize(&mut deserializer)?)
        }
    }
}

/// Encoded size of a record in bytes
pub fn encoded_len<T: Serialize>(record: &T, format: Format) -> Result<usize> {
    let mut counter = ByteCounter::default();
    write_record(&mut counter, record, format)?;
    Ok(counter.count)
}

#[derive(Default)]
struct ByteCounter {
    count: usize,
}

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.count += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Metadata, Molecule, ViewSource};
    use crate::table::DataTable;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample_molecule() -> Molecule {
        let mut table = DataTable::with_columns(["time", "position"]);
        table.append_row(&[0.0, 1.25]).unwrap();
        table.append_row(&[1.0, 2.5]).unwrap();

        let mut molecule = Molecule::with_table("4eNrhQZ2K8vFbR1xh9SmtD", table.clone());
        molecule.metadata_uid = Some("5xZ2GbyUeZ".into());
        molecule.notes = "stalled at 30s".into();
        molecule.add_tag("good");
        molecule.add_tag("bright");
        molecule.set_parameter("rate", 0.125);
        molecule.put_segment_table("time", "position", table);
        molecule
    }

    #[test]
    fn test_molecule_round_trip_both_formats() {
        let molecule = sample_molecule();
        for format in [Format::Binary, Format::Text] {
            let bytes = encode(&molecule, format).unwrap();
            let decoded: Molecule = decode(&bytes, format).unwrap();
            assert_eq!(decoded, molecule, "format {}", format);
        }
    }

    #[test]
    fn test_binary_is_smaller_than_text() {
        let molecule = sample_molecule();
        let binary = encoded_len(&molecule, Format::Binary).unwrap();
        let text = encoded_len(&molecule, Format::Text).unwrap();
        assert!(binary < text);
        assert_eq!(binary, encode(&molecule, Format::Binary).unwrap().len());
    }

    #[test]
    fn test_streaming_reads_one_record_at_a_time() {
        let first = sample_molecule();
        let mut second = sample_molecule();
        second.uid = "second".into();

        for format in [Format::Binary, Format::Text] {
            let mut buffer = Vec::new();
            write_record(&mut buffer, &first, format).unwrap();
            write_record(&mut buffer, &second, format).unwrap();

            let mut cursor = Cursor::new(buffer);
            let a: Molecule = read_record(&mut cursor, format).unwrap();
            let b: Molecule = read_record(&mut cursor, format).unwrap();
            assert_eq!(a, first);
            assert_eq!(b, second);
            assert_eq!(cursor.position() as usize, cursor.get_ref().len());
        }
    }

    #[test]
    fn test_unknown_binary_fields_are_skipped() {
        #[derive(serde::Serialize)]
        struct FutureMolecule<'a> {
            uid: &'a str,
            brand_new_field: Vec<u32>,
            notes: &'a str,
        }

        let bytes = encode(
            &FutureMolecule {
                uid: "abc",
                brand_new_field: vec![1, 2, 3],
                notes: "hello",
            },
            Format::Binary,
        )
        .unwrap();
        let decoded: Molecule = decode(&bytes, Format::Binary).unwrap();
        assert_eq!(decoded.uid, "abc");
        assert_eq!(decoded.notes, "hello");
    }

    #[test]
    fn test_malformed_record_is_an_error() {
        let result: Result<Molecule> = decode(b"{\"uid\": ", Format::Text);
        assert!(result.is_err());
        let result: Result<Molecule> = decode(&[0xc1], Format::Binary);
        assert!(matches!(result, Err(Error::Codec(_))));
    }

    #[test]
    fn test_non_finite_cells_round_trip_both_formats() {
        let mut molecule = sample_molecule();
        molecule.data_table.add_column("intensity").unwrap();
        molecule.set_parameter("drift", f64::NEG_INFINITY);
        molecule.set_parameter("snr", f64::NAN);

        let text = String::from_utf8(encode(&molecule, Format::Text).unwrap()).unwrap();
        assert!(text.contains(r#""values":["NaN","NaN"]"#));
        assert!(text.contains(r#""drift":"-Infinity""#));

        for format in [Format::Binary, Format::Text] {
            let bytes = encode(&molecule, format).unwrap();
            let decoded: Molecule = decode(&bytes, format).unwrap();
            assert!(decoded.data_table.column("intensity").unwrap().iter().all(|v| v.is_nan()));
            assert_eq!(decoded.parameter("drift"), Some(f64::NEG_INFINITY));
            assert!(decoded.parameter("snr").unwrap().is_nan());
            assert!(same_record(&decoded, &molecule), "format {}", format);
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<Format>().unwrap(), Format::Text);
        assert_eq!("binary".parse::<Format>().unwrap(), Format::Binary);
        assert!("yaml".parse::<Format>().is_err());
    }

    fn cell() -> impl Strategy<Value = f64> {
        prop::num::f64::ANY
    }

    /// Compare records with every NaN treated as equal
    ///
    /// The text encoding spells all NaN payloads the same way and every
    /// other value exactly, so equal text means equal records.
    fn same_record<T: Serialize>(a: &T, b: &T) -> bool {
        encode(a, Format::Text).unwrap() == encode(b, Format::Text).unwrap()
    }

    prop_compose! {
        fn arb_table()(rows in 0usize..6, cols in 0usize..4)
            (values in prop::collection::vec(prop::collection::vec(cell(), rows), cols))
            -> DataTable
        {
            let headers: Vec<String> = (0..values.len()).map(|i| format!("c{}", i)).collect();
            let mut table = DataTable::with_columns(headers);
            let rows = values.first().map(|c| c.len()).unwrap_or(0);
            for row in 0..rows {
                let cells: Vec<f64> = values.iter().map(|c| c[row]).collect();
                table.append_row(&cells).unwrap();
            }
            table
        }
    }

    prop_compose! {
        fn arb_molecule()(
            uid in "[1-9A-HJ-NP-Za-km-z]{22}",
            metadata_uid in proptest::option::of("[a-z0-9]{10}"),
            notes in ".{0,40}",
            tags in prop::collection::vec("[a-z]{1,8}", 0..6),
            parameters in prop::collection::vec(("[a-z_]{1,10}", cell()), 0..6),
            data_table in arb_table(),
        ) -> Molecule {
            let mut molecule = Molecule::with_table(uid, data_table);
            molecule.metadata_uid = metadata_uid;
            molecule.notes = notes;
            for tag in tags {
                molecule.add_tag(tag);
            }
            for (name, value) in parameters {
                molecule.set_parameter(name, value);
            }
            molecule
        }
    }

    prop_compose! {
        fn arb_metadata()(
            uid in "[a-z0-9]{10}",
            log in ".{0,60}",
            tags in prop::collection::vec("[a-z]{1,8}", 0..4),
            affine in prop::array::uniform6(cell()),
            data_table in arb_table(),
        ) -> Metadata {
            let mut meta = Metadata::new(uid);
            meta.log = log;
            meta.data_table = data_table;
            for tag in tags {
                meta.add_tag(tag);
            }
            let mut source = ViewSource::new("cam", "/tmp/cam.h5");
            source.affine = affine;
            meta.view_sources.push(source);
            meta
        }
    }

    proptest! {
        #[test]
        fn prop_molecule_round_trip(molecule in arb_molecule()) {
            let bytes = encode(&molecule, Format::Binary).unwrap();
            let decoded: Molecule = decode(&bytes, Format::Binary).unwrap();
            prop_assert_eq!(encode(&decoded, Format::Binary).unwrap(), bytes);

            let text = encode(&molecule, Format::Text).unwrap();
            let decoded: Molecule = decode(&text, Format::Text).unwrap();
            prop_assert!(same_record(&decoded, &molecule));
        }

        #[test]
        fn prop_metadata_round_trip(meta in arb_metadata()) {
            let bytes = encode(&meta, Format::Binary).unwrap();
            let decoded: Metadata = decode(&bytes, Format::Binary).unwrap();
            prop_assert_eq!(encode(&decoded, Format::Binary).unwrap(), bytes);

            let text = encode(&meta, Format::Text).unwrap();
            let decoded: Metadata = decode(&text, Format::Text).unwrap();
            prop_assert!(same_record(&decoded, &meta));
        }
    }
}

//! Container file framing
//!
//! A container is one streamed document: a map whose first entry is
//! `properties`, followed by an optional `metadata` array and a `molecules`
//! array. The binary form is the magic `YAMB` followed by a MessagePack map;
//! the text form is a plain JSON object.
//!
//! Records are streamed in both directions. Reading hands each record to a
//! [`RecordSink`] as soon as it is decoded, and writing fetches each record
//! from the store only when the serializer reaches it, so neither side ever
//! holds the whole archive in memory.

use crate::codec::Format;
use crate::properties::ArchiveProperties;
use crate::record::{Metadata, Molecule};
use crate::store::RecordStore;
use crate::{Error, Result};
use serde::de::{self, DeserializeOwned, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::io::{BufReader, Read, Write};
use std::marker::PhantomData;

/// Prefix of a binary container
pub const MAGIC: &[u8; 4] = b"YAMB";

/// Conventional container file extension
pub const EXTENSION: &str = "yama";

const PROPERTIES_SECTION: &str = "properties";
const METADATA_SECTION: &str = "metadata";
const MOLECULES_SECTION: &str = "molecules";

/// Detect the encoding of a container from its first bytes
pub fn sniff(prefix: &[u8]) -> Format {
    if prefix.starts_with(MAGIC) {
        return Format::Binary;
    }
    match prefix.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => Format::Text,
        _ => {
            tracing::debug!("Container prefix is neither binary nor JSON, assuming text");
            Format::Text
        }
    }
}

/// Whether the reader should keep going after the properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Stream the remaining sections
    Continue,
    /// Stop right after the properties
    Stop,
}

/// Receiver of records streamed out of a container
pub trait RecordSink {
    /// Called once with the leading properties record
    fn properties(&mut self, properties: ArchiveProperties) -> Result<Flow>;

    /// Called for every metadata record, in stream order
    fn metadata(&mut self, metadata: Metadata) -> Result<()>;

    /// Called for every molecule record, in stream order
    fn molecule(&mut self, molecule: Molecule) -> Result<()>;
}

/// Stream a container into `sink`, returning the sniffed encoding
///
/// Fails with [`Error::MissingProperties`] when the document is empty or
/// does not open with a properties section, and with [`Error::Container`]
/// when the stream is truncated or malformed. Unknown sections are skipped.
/// An error returned by the sink aborts the read and is passed through.
pub fn read_container<R: Read, S: RecordSink>(reader: R, sink: &mut S) -> Result<Format> {
    let mut reader = BufReader::new(reader);
    let mut prefix = [0u8; 4];
    let filled = read_prefix(&mut reader, &mut prefix)?;
    if filled == 0 {
        return Err(Error::MissingProperties);
    }

    let format = sniff(&prefix[..filled]);
    let mut interrupt = None;
    let outcome = match format {
        Format::Binary => {
            let mut deserializer = rmp_serde::Deserializer::new(reader);
            (&mut deserializer)
                .deserialize_map(DocumentVisitor {
                    sink,
                    interrupt: &mut interrupt,
                })
                .map_err(Error::from)
        }
        Format::Text => {
            let replay = (&prefix[..filled]).chain(reader);
            let mut deserializer = serde_json::Deserializer::from_reader(replay);
            (&mut deserializer)
                .deserialize_map(DocumentVisitor {
                    sink,
                    interrupt: &mut interrupt,
                })
                .and_then(|()| deserializer.end())
                .map_err(Error::from)
        }
    };

    match interrupt {
        Some(Interrupt::Stopped) => Ok(format),
        Some(Interrupt::Failed(err)) => Err(err),
        None => outcome.map(|()| format).map_err(framing_error),
    }
}

fn framing_error(err: Error) -> Error {
    match err {
        Error::Codec(msg) => Error::container(msg),
        other => other,
    }
}

fn read_prefix<R: Read>(reader: &mut R, prefix: &mut [u8; 4]) -> Result<usize> {
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Why a read stopped before the deserializer finished
enum Interrupt {
    Stopped,
    Failed(Error),
}

/// Record kinds a section can hold
trait SectionRecord: DeserializeOwned {
    fn deliver<S: RecordSink>(self, sink: &mut S) -> Result<()>;
}

impl SectionRecord for Metadata {
    fn deliver<S: RecordSink>(self, sink: &mut S) -> Result<()> {
        sink.metadata(self)
    }
}

impl SectionRecord for Molecule {
    fn deliver<S: RecordSink>(self, sink: &mut S) -> Result<()> {
        sink.molecule(self)
    }
}

struct DocumentVisitor<'a, S> {
    sink: &'a mut S,
    interrupt: &'a mut Option<Interrupt>,
}

impl<'de, S: RecordSink> Visitor<'de> for DocumentVisitor<'_, S> {
    type Value = ();

    fn expecting(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("a molecule archive document")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let sink = self.sink;
        let interrupt = self.interrupt;

        match map.next_key::<String>()? {
            Some(key) if key == PROPERTIES_SECTION => {}
            _ => {
                *interrupt = Some(Interrupt::Failed(Error::MissingProperties));
                return Err(de::Error::custom("missing properties"));
            }
        }
        let properties: ArchiveProperties = map.next_value()?;
        match sink.properties(properties) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => {
                *interrupt = Some(Interrupt::Stopped);
                return Err(de::Error::custom("stopped after properties"));
            }
            Err(err) => {
                *interrupt = Some(Interrupt::Failed(err));
                return Err(de::Error::custom("record sink failed"));
            }
        }

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                METADATA_SECTION => map.next_value_seed(SectionSeed::<S, Metadata> {
                    sink: &mut *sink,
                    interrupt: &mut *interrupt,
                    record: PhantomData,
                })?,
                MOLECULES_SECTION => map.next_value_seed(SectionSeed::<S, Molecule> {
                    sink: &mut *sink,
                    interrupt: &mut *interrupt,
                    record: PhantomData,
                })?,
                other => {
                    tracing::debug!("Skipping unknown container section '{}'", other);
                    map.next_value::<de::IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct SectionSeed<'a, S, T> {
    sink: &'a mut S,
    interrupt: &'a mut Option<Interrupt>,
    record: PhantomData<T>,
}

impl<'de, S: RecordSink, T: SectionRecord> DeserializeSeed<'de> for SectionSeed<'_, S, T> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, S: RecordSink, T: SectionRecord> Visitor<'de> for SectionSeed<'_, S, T> {
    type Value = ();

    fn expecting(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("a sequence of records")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(record) = seq.next_element::<T>()? {
            if let Err(err) = record.deliver(self.sink) {
                *self.interrupt = Some(Interrupt::Failed(err));
                return Err(de::Error::custom("record sink failed"));
            }
        }
        Ok(())
    }
}

/// Stream a container built from `store` into `writer`
///
/// Records are written in the order of the UID slices. A UID whose record
/// has vanished from the store fails the write with [`Error::NotFound`].
pub fn write_container<W: Write>(
    mut writer: W,
    format: Format,
    properties: &ArchiveProperties,
    metadata_uids: &[String],
    molecule_uids: &[String],
    store: &dyn RecordStore,
) -> Result<()> {
    let failure = RefCell::new(None);
    let document = Document {
        properties,
        metadata: RecordSection {
            uids: metadata_uids,
            fetch: &|uid| store.get_metadata(uid),
            failure: &failure,
        },
        molecules: RecordSection {
            uids: molecule_uids,
            fetch: &|uid| store.get_molecule(uid),
            failure: &failure,
        },
    };

    let outcome = match format {
        Format::Binary => {
            writer.write_all(MAGIC)?;
            let mut serializer = rmp_serde::Serializer::new(&mut writer).with_struct_map();
            document.serialize(&mut serializer).map_err(Error::from)
        }
        Format::Text => serde_json::to_writer(&mut writer, &document).map_err(Error::from),
    };

    if let Some(err) = failure.into_inner() {
        return Err(err);
    }
    outcome?;
    writer.flush()?;
    Ok(())
}

type Fetch<'a, T> = &'a dyn Fn(&str) -> Result<Option<T>>;

struct Document<'a> {
    properties: &'a ArchiveProperties,
    metadata: RecordSection<'a, Metadata>,
    molecules: RecordSection<'a, Molecule>,
}

impl Serialize for Document<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let sections = if self.metadata.uids.is_empty() { 2 } else { 3 };
        let mut map = serializer.serialize_map(Some(sections))?;
        map.serialize_entry(PROPERTIES_SECTION, self.properties)?;
        if !self.metadata.uids.is_empty() {
            map.serialize_entry(METADATA_SECTION, &self.metadata)?;
        }
        map.serialize_entry(MOLECULES_SECTION, &self.molecules)?;
        map.end()
    }
}

struct RecordSection<'a, T> {
    uids: &'a [String],
    fetch: Fetch<'a, T>,
    failure: &'a RefCell<Option<Error>>,
}

impl<T: Serialize> Serialize for RecordSection<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.uids.len()))?;
        for uid in self.uids {
            let record = match (self.fetch)(uid) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    *self.failure.borrow_mut() =
                        Some(Error::not_found(format!("record {} vanished during save", uid)));
                    return Err(ser::Error::custom("record missing"));
                }
                Err(err) => {
                    *self.failure.borrow_mut() = Some(err);
                    return Err(ser::Error::custom("record fetch failed"));
                }
            };
            seq.serialize_element(&record)?;
        }
        seq.end()
    }
}

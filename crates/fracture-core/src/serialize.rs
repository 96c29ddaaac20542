//! Durable encoding of the producer set.
//!
//! Binary via `bitcode` behind a versioned header. Each producer record and
//! each item template inside it is encoded as its own blob, so a single
//! malformed record or template is skipped on load without taking the rest
//! of the file with it.

use crate::config::Settings;
use crate::host::WorldHost;
use crate::id::{OwnerId, ProducerId, WorldId};
use crate::item::ItemTemplate;
use crate::producer::{Direction, Producer};
use crate::registry::{ProducerRegistry, RegistrySnapshot, RestoreReport};
use crate::spatial::Location;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a producer save file.
pub const SAVE_MAGIC: u32 = 0xF6A6_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that abort a whole load. Per-record problems never surface here.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SAVE_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("save from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Header at the front of every save. Checked before any record is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveHeader {
    pub magic: u32,
    pub version: u32,
    /// Registry revision the save was taken at.
    pub revision: u64,
}

impl SaveHeader {
    pub fn new(revision: u64) -> Self {
        Self {
            magic: SAVE_MAGIC,
            version: FORMAT_VERSION,
            revision,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SAVE_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Decode and validate just the header.
pub fn read_save_header(data: &[u8]) -> Result<SaveHeader, DeserializeError> {
    let file: SaveFile =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    file.header.validate()?;
    Ok(file.header)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SaveFile {
    header: SaveHeader,
    /// One encoded [`ProducerRecord`] per producer.
    records: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProducerRecord {
    id: [u8; 16],
    world: String,
    x: i32,
    y: i32,
    z: i32,
    owner: [u8; 16],
    spawn_rate: u32,
    direction: Direction,
    enabled: bool,
    /// One encoded [`ItemTemplate`] per entry, in table order.
    items: Vec<Vec<u8>>,
}

impl ProducerRecord {
    fn from_producer(producer: &Producer) -> Result<Self, SerializeError> {
        let location = producer.location();
        let items = producer
            .items()
            .iter()
            .map(|item| bitcode::serialize(item).map_err(|e| SerializeError::Encode(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: producer.id().to_bytes(),
            world: location.world.as_str().to_owned(),
            x: location.pos.x,
            y: location.pos.y,
            z: location.pos.z,
            owner: producer.owner().to_bytes(),
            spawn_rate: producer.spawn_rate(),
            direction: producer.direction(),
            enabled: producer.is_enabled(),
            items,
        })
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode `producers` as a save taken at `revision`.
pub fn encode_producers(revision: u64, producers: &[Producer]) -> Result<Vec<u8>, SerializeError> {
    let records = producers
        .iter()
        .map(|p| {
            let record = ProducerRecord::from_producer(p)?;
            bitcode::serialize(&record).map_err(|e| SerializeError::Encode(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let file = SaveFile {
        header: SaveHeader::new(revision),
        records,
    };
    bitcode::serialize(&file).map_err(|e| SerializeError::Encode(e.to_string()))
}

pub fn encode_snapshot(snapshot: &RegistrySnapshot) -> Result<Vec<u8>, SerializeError> {
    encode_producers(snapshot.revision, &snapshot.producers)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Counts from one decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records decoded into producers.
    pub decoded: usize,
    /// Records whose world the host does not have.
    pub unavailable_world: usize,
    /// Records that failed to decode.
    pub malformed: usize,
    /// Templates that failed to decode, across all records.
    pub dropped_templates: usize,
    /// Producers left with no templates that got the default one.
    pub defaulted: usize,
    /// Filled in by [`ProducerRegistry::load_bytes`]: what the registry kept.
    pub restore: RestoreReport,
}

/// Producers decoded from a save, plus the save's revision.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub revision: u64,
    pub producers: Vec<Producer>,
    pub report: LoadReport,
}

/// Decode a save. Records in worlds `host` reports unavailable are skipped,
/// as are records that fail to decode. Undecodable templates are dropped.
/// Configuration is normalized against `settings`; every producer's
/// interval starts counting from `now`.
pub fn decode_producers(
    data: &[u8],
    host: &dyn WorldHost,
    settings: &Settings,
    now: u64,
) -> Result<Decoded, DeserializeError> {
    let file: SaveFile =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    file.header.validate()?;

    let mut report = LoadReport::default();
    let mut producers = Vec::with_capacity(file.records.len());

    for (index, blob) in file.records.iter().enumerate() {
        let record: ProducerRecord = match bitcode::deserialize(blob) {
            Ok(record) => record,
            Err(e) => {
                warn!(record = index, error = %e, "skipping malformed producer record");
                report.malformed += 1;
                continue;
            }
        };

        let world = WorldId::new(record.world);
        if !host.is_world_available(&world) {
            warn!(record = index, world = %world, "skipping producer in unavailable world");
            report.unavailable_world += 1;
            continue;
        }

        let id = ProducerId::from_bytes(record.id);
        let mut items = Vec::with_capacity(record.items.len());
        for (slot, item_blob) in record.items.iter().enumerate() {
            match bitcode::deserialize::<ItemTemplate>(item_blob) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(producer = %id, slot, error = %e, "dropping undecodable item template");
                    report.dropped_templates += 1;
                }
            }
        }
        if items.is_empty() {
            report.defaulted += 1;
        }

        producers.push(Producer::restore(
            id,
            Location::new(world, record.x, record.y, record.z),
            OwnerId::from_bytes(record.owner),
            items,
            record.spawn_rate,
            record.direction,
            record.enabled,
            settings,
            now,
        ));
        report.decoded += 1;
    }

    Ok(Decoded {
        revision: file.header.revision,
        producers,
        report,
    })
}

// ---------------------------------------------------------------------------
// Registry save/load
// ---------------------------------------------------------------------------

impl ProducerRegistry {
    /// Encode the current store. Holds the store read lock only for the
    /// snapshot copy.
    pub fn save_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        encode_snapshot(&self.snapshot())
    }

    /// Decode `data` and restore every producer it yields.
    pub fn load_bytes(&self, data: &[u8], host: &dyn WorldHost) -> Result<LoadReport, DeserializeError> {
        let settings = self.settings();
        let decoded = decode_producers(data, host, &settings, self.now())?;
        let mut report = decoded.report;
        report.restore = self.restore(decoded.producers);
        info!(
            loaded = report.restore.restored,
            unavailable_world = report.unavailable_world,
            malformed = report.malformed,
            dropped_templates = report.dropped_templates,
            "producers loaded"
        );
        Ok(report)
    }
}

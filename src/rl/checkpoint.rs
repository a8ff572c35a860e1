//! Checkpoint layout and persistence helpers
//!
//! ```text
//! <save_dir>/epoch-<n>/
//!     actor.mpk          actor parameters
//!     critic.mpk         critic parameters
//!     actor_optim.mpk    Adam state for the actor
//!     critic_optim.mpk   Adam state for the critic
//!     state.json         epoch and RNG state
//! ```
//!
//! Module components load key by key: entries present in the stored record
//! replace the module's current values, everything else keeps what the
//! caller already holds, including whole component files that are missing.
//! A stored entry whose shape disagrees with the module is an error, as is
//! a missing directory or `state.json`.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use rand_chacha::ChaCha8Rng;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub const ACTOR_FILE: &str = "actor";
pub const CRITIC_FILE: &str = "critic";
pub const ACTOR_OPTIM_FILE: &str = "actor_optim";
pub const CRITIC_OPTIM_FILE: &str = "critic_optim";
pub const STATE_FILE: &str = "state.json";

const RECORD_EXTENSION: &str = "mpk";

pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Position of a ChaCha generator in its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: [u8; 32],
    pub stream: u64,
    pub word_pos: u128,
}

impl RngState {
    pub fn capture(rng: &ChaCha8Rng) -> Self {
        Self {
            seed: rng.get_seed(),
            stream: rng.get_stream(),
            word_pos: rng.get_word_pos(),
        }
    }

    pub fn restore(&self) -> ChaCha8Rng {
        use rand::SeedableRng;

        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_stream(self.stream);
        rng.set_word_pos(self.word_pos);
        rng
    }
}

/// Contents of `state.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Last completed epoch
    pub epoch: usize,
    /// Host generator used for action sampling
    pub rng: RngState,
    /// Seed the tensor backend was last seeded with
    pub backend_seed: u64,
}

impl CheckpointState {
    pub fn save(&self, dir: &Path) -> Result<()> {
        let file = File::create(dir.join(STATE_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(STATE_FILE);
        let file = File::open(&path).map_err(|err| {
            Error::Checkpoint(format!("cannot open {}: {err}", path.display()))
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// `<save_dir>/epoch-<epoch>`
pub fn epoch_dir(save_dir: impl AsRef<Path>, epoch: usize) -> PathBuf {
    save_dir.as_ref().join(format!("epoch-{epoch}"))
}

/// Path of a component as written by the recorder
pub fn component_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name).with_extension(RECORD_EXTENSION)
}

pub fn save_module<B: Backend, M: Module<B>>(module: &M, dir: &Path, name: &str) -> Result<()> {
    module
        .clone()
        .save_file(dir.join(name), &CheckpointRecorder::new())?;
    Ok(())
}

/// Load a module component, overlaying the stored entries onto `module`.
/// Keys the file lacks keep their current values. A missing file keeps
/// `module` as is.
pub fn load_module<B: Backend, M: Module<B>>(
    module: M,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<M> {
    let path = component_path(dir, name);
    if !path.exists() {
        tracing::warn!(
            "Checkpoint {} has no {} component, keeping fresh parameters",
            dir.display(),
            name
        );
        return Ok(module);
    }

    let file = File::open(&path)?;
    let stored: RecordTree = rmp_serde::from_read(BufReader::new(file))
        .map_err(|err| Error::Checkpoint(format!("cannot decode {}: {err}", path.display())))?;
    let stored = stored
        .into_field("item")
        .ok_or_else(|| Error::Checkpoint(format!("{} holds no record item", path.display())))?;

    let fresh = RecordTree::from_value(&module.clone().into_record().into_item::<FullPrecisionSettings>())?;
    let mut report = OverlayReport::default();
    let merged = fresh.overlay(&stored, "", &mut report);
    if !report.conflicts.is_empty() {
        return Err(Error::Checkpoint(format!(
            "{} does not fit the module at {}",
            path.display(),
            report.conflicts.join(", ")
        )));
    }
    if !report.kept.is_empty() {
        tracing::warn!(
            "Checkpoint {} component {} lacks {}, keeping fresh values there",
            dir.display(),
            name,
            report.kept.join(", ")
        );
    }

    let item: <M::Record as Record<B>>::Item<FullPrecisionSettings> = merged.into_value()?;
    let record = <M::Record as Record<B>>::from_item::<FullPrecisionSettings>(item, device);
    Ok(module.load_record(record))
}

pub fn save_record<B: Backend, R: Record<B>>(record: R, dir: &Path, name: &str) -> Result<()> {
    Recorder::<B>::record(&CheckpointRecorder::new(), record, dir.join(name))?;
    Ok(())
}

/// Load a record component if present.
pub fn load_record<B: Backend, R: Record<B>>(
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<Option<R>> {
    if !component_path(dir, name).exists() {
        tracing::warn!(
            "Checkpoint {} has no {} component, keeping fresh state",
            dir.display(),
            name
        );
        return Ok(None);
    }
    let record = Recorder::<B>::load(&CheckpointRecorder::new(), dir.join(name), device)?;
    Ok(Some(record))
}

/// Fail unless `dir` is an existing checkpoint directory.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(Error::Checkpoint(format!(
            "checkpoint directory {} not found",
            dir.display()
        )))
    }
}

/// Paths left at their fresh value, and paths where the stored entry has
/// another shape or kind
#[derive(Debug, Default)]
struct OverlayReport {
    kept: Vec<String>,
    conflicts: Vec<String>,
}

/// Self-describing copy of a stored record, walked key by key when merging
/// a checkpoint onto a module's current record.
#[derive(Debug, Clone, PartialEq)]
enum RecordTree {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<RecordTree>),
    Map(Vec<(RecordTree, RecordTree)>),
}

impl RecordTree {
    fn from_value<T: Serialize>(value: &T) -> Result<Self> {
        let bytes = rmp_serde::to_vec_named(value)
            .map_err(|err| Error::Checkpoint(format!("cannot encode record: {err}")))?;
        rmp_serde::from_slice(&bytes)
            .map_err(|err| Error::Checkpoint(format!("cannot decode record: {err}")))
    }

    fn into_value<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let bytes = rmp_serde::to_vec_named(&self)
            .map_err(|err| Error::Checkpoint(format!("cannot encode record: {err}")))?;
        rmp_serde::from_slice(&bytes)
            .map_err(|err| Error::Checkpoint(format!("merged record does not fit the module: {err}")))
    }

    fn get(&self, key: &RecordTree) -> Option<&RecordTree> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn into_field(self, key: &str) -> Option<RecordTree> {
        let key = Self::Str(key.to_string());
        match self {
            Self::Map(entries) => entries.into_iter().find(|(k, _)| *k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn is_leaf(&self) -> bool {
        !matches!(self, Self::Seq(_) | Self::Map(_))
    }

    fn child_path(path: &str, key: &RecordTree) -> String {
        let name = match key {
            Self::Str(name) => name.clone(),
            Self::UInt(idx) => idx.to_string(),
            other => format!("{other:?}"),
        };
        if path.is_empty() { name } else { format!("{path}.{name}") }
    }

    /// Replace entries of `self` with their counterparts in `stored`.
    fn overlay(self, stored: &RecordTree, path: &str, report: &mut OverlayReport) -> RecordTree {
        let shape = Self::Str("shape".to_string());
        match (self, stored) {
            (Self::Map(fresh), Self::Map(_)) => {
                let fresh_shape = fresh.iter().find(|(k, _)| *k == shape).map(|(_, v)| v);
                if fresh_shape.is_some() && fresh_shape != stored.get(&shape) {
                    report.conflicts.push(path.to_string());
                    return Self::Map(fresh);
                }
                Self::Map(
                    fresh
                        .into_iter()
                        .map(|(key, value)| {
                            let child = Self::child_path(path, &key);
                            let value = match stored.get(&key) {
                                Some(entry) => value.overlay(entry, &child, report),
                                None => {
                                    report.kept.push(child);
                                    value
                                }
                            };
                            (key, value)
                        })
                        .collect(),
                )
            }
            (Self::Seq(fresh), Self::Seq(items)) if fresh.len() == items.len() => Self::Seq(
                fresh
                    .into_iter()
                    .zip(items)
                    .enumerate()
                    .map(|(idx, (value, entry))| {
                        value.overlay(entry, &Self::child_path(path, &Self::UInt(idx as u64)), report)
                    })
                    .collect(),
            ),
            (fresh, entry) if fresh.is_leaf() && entry.is_leaf() => entry.clone(),
            (fresh, _) => {
                report.conflicts.push(path.to_string());
                fresh
            }
        }
    }
}

impl Serialize for RecordTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::UInt(v) => serializer.serialize_u64(*v),
            Self::F32(v) => serializer.serialize_f32(*v),
            Self::F64(v) => serializer.serialize_f64(*v),
            Self::Str(v) => serializer.serialize_str(v),
            Self::Bytes(v) => serializer.serialize_bytes(v),
            Self::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for RecordTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(RecordTreeVisitor)
    }
}

struct RecordTreeVisitor;

impl<'de> Visitor<'de> for RecordTreeVisitor {
    type Value = RecordTree;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a self-describing record")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Nil)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<RecordTree, D::Error> {
        RecordTree::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::UInt(v))
    }

    fn visit_f32<E: de::Error>(self, v: f32) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::F32(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::F64(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<RecordTree, E> {
        Ok(RecordTree::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<RecordTree, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(RecordTree::Seq(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<RecordTree, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(entry) = map.next_entry()? {
            entries.push(entry);
        }
        Ok(RecordTree::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};
    use rand::{Rng, SeedableRng};

    type TestBackend = NdArray;

    #[derive(Module, Debug)]
    struct Wide<B: Backend> {
        first: Linear<B>,
        second: Linear<B>,
    }

    #[derive(Module, Debug)]
    struct Narrow<B: Backend> {
        first: Linear<B>,
    }

    fn wide(device: &<TestBackend as Backend>::Device, out: usize) -> Wide<TestBackend> {
        Wide {
            first: LinearConfig::new(4, out).init(device),
            second: LinearConfig::new(out, 2).init(device),
        }
    }

    fn weight(linear: &Linear<TestBackend>) -> Vec<f32> {
        linear.weight.val().into_data().to_vec().unwrap()
    }

    #[test]
    fn test_partial_record_fills_present_keys() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let stored = Narrow::<TestBackend> {
            first: LinearConfig::new(4, 3).init(&device),
        };
        save_module(&stored, dir.path(), ACTOR_FILE).unwrap();

        let fresh = wide(&device, 3);
        let loaded = load_module(fresh.clone(), dir.path(), ACTOR_FILE, &device).unwrap();
        assert_eq!(weight(&loaded.first), weight(&stored.first));
        assert_ne!(weight(&loaded.first), weight(&fresh.first));
        assert_eq!(weight(&loaded.second), weight(&fresh.second));
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        save_module(&wide(&device, 5), dir.path(), CRITIC_FILE).unwrap();

        let err = load_module(wide(&device, 3), dir.path(), CRITIC_FILE, &device);
        assert!(matches!(err, Err(Error::Checkpoint(_))));
    }

    #[test]
    fn test_overlay_reports_kept_paths() {
        let fresh = RecordTree::Map(vec![
            (RecordTree::Str("a".into()), RecordTree::UInt(1)),
            (
                RecordTree::Str("b".into()),
                RecordTree::Seq(vec![RecordTree::F32(0.0), RecordTree::F32(0.0)]),
            ),
            (RecordTree::Str("c".into()), RecordTree::Bool(false)),
        ]);
        let stored = RecordTree::Map(vec![
            (RecordTree::Str("a".into()), RecordTree::UInt(7)),
            (
                RecordTree::Str("b".into()),
                RecordTree::Seq(vec![RecordTree::F32(1.0), RecordTree::F32(2.0)]),
            ),
            (RecordTree::Str("unused".into()), RecordTree::Nil),
        ]);
        let mut report = OverlayReport::default();
        let merged = fresh.overlay(&stored, "", &mut report);
        assert_eq!(report.kept, vec!["c".to_string()]);
        assert!(report.conflicts.is_empty());
        assert_eq!(merged.get(&RecordTree::Str("a".into())), Some(&RecordTree::UInt(7)));
        assert_eq!(
            merged.get(&RecordTree::Str("b".into())),
            Some(&RecordTree::Seq(vec![RecordTree::F32(1.0), RecordTree::F32(2.0)]))
        );
        assert_eq!(merged.get(&RecordTree::Str("c".into())), Some(&RecordTree::Bool(false)));

        let shorter = RecordTree::Map(vec![(
            RecordTree::Str("b".into()),
            RecordTree::Seq(vec![RecordTree::F32(1.0)]),
        )]);
        let mut report = OverlayReport::default();
        merged.overlay(&shorter, "", &mut report);
        assert_eq!(report.conflicts, vec!["b".to_string()]);
        assert_eq!(report.kept, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_rng_state_resumes_stream() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let _: u64 = rng.random();
        let state = RngState::capture(&rng);
        let expected: Vec<u32> = (0..4).map(|_| rng.random()).collect();
        let mut restored = state.restore();
        let resumed: Vec<u32> = (0..4).map(|_| restored.random()).collect();
        assert_eq!(expected, resumed);
    }

    #[test]
    fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = CheckpointState {
            epoch: 3,
            rng: RngState::capture(&ChaCha8Rng::seed_from_u64(1)),
            backend_seed: 7,
        };
        state.save(dir.path()).unwrap();
        assert_eq!(CheckpointState::load(dir.path()).unwrap(), state);
    }

    #[test]
    fn test_missing_state_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CheckpointState::load(dir.path()),
            Err(Error::Checkpoint(_))
        ));
        assert!(ensure_dir(&dir.path().join("epoch-9")).is_err());
    }

    #[test]
    fn test_epoch_dir_layout() {
        let dir = epoch_dir("runs", 12);
        assert_eq!(dir, PathBuf::from("runs").join("epoch-12"));
        assert_eq!(
            component_path(&dir, ACTOR_FILE),
            PathBuf::from("runs").join("epoch-12").join("actor.mpk")
        );
    }
}

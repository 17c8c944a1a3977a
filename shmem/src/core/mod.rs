use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ::shared_memory::{Shmem, ShmemConf, ShmemError};
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{QueueError, Result};
use crate::strategy::{self, Strategy};

pub mod ring;

use self::ring::{record_stride, slot_size, Ring, HEADER_SIZE};

pub static LOCK_LINK_SUFFIX: &str = ".lock";

/// Which enqueue/dequeue protocol the queue speaks. Every process attached to
/// one segment must agree on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// One producer, one consumer, variable-length records.
    Spsc,
    /// Many producers reserving fixed-size slots with a CAS on `tail`.
    Mpsc,
    /// Many producers serialized by a cross-process mutex, SPSC records.
    MpscLocked,
}

impl Default for QueueKind {
    fn default() -> Self {
        QueueKind::Spsc
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueKind::Spsc => "spsc",
            QueueKind::Mpsc => "mpsc",
            QueueKind::MpscLocked => "mpsc_locked",
        };
        f.write_str(name)
    }
}

impl FromStr for QueueKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "spsc" => Ok(QueueKind::Spsc),
            "mpsc" => Ok(QueueKind::Mpsc),
            "mpsc_locked" | "locked" => Ok(QueueKind::MpscLocked),
            other => Err(QueueError::Config(format!("unknown queue kind `{}`", other))),
        }
    }
}

/// Parameters every process attached to one queue must agree on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmemConfig {
    pub data_dir: String,
    pub queue_name: String,
    pub kind: QueueKind,
    /// Minimum number of max-size messages the queue holds.
    pub capacity: usize,
    pub max_message_size: usize,
    /// Only meaningful for `Mpsc`; sizes the free-space safety margin.
    pub max_producer_count: usize,
    /// Explicit data region size in bytes. Overrides the size derived from
    /// `capacity`.
    pub queue_size: Option<usize>,
}

impl Default for ShmemConfig {
    fn default() -> Self {
        ShmemConfig {
            data_dir: env::temp_dir().to_string_lossy().into_owned(),
            queue_name: "shmq".to_string(),
            kind: QueueKind::default(),
            capacity: 1000,
            max_message_size: 128,
            max_producer_count: 8,
            queue_size: None,
        }
    }
}

impl ShmemConfig {
    /// File link through which every process finds the segment.
    pub fn link_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.queue_name)
    }

    /// File link of the producer mutex used by `MpscLocked`.
    pub fn lock_link_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(format!("{}{}", self.queue_name, LOCK_LINK_SUFFIX))
    }

    /// Size in bytes of the region every slot or record stride lives in.
    pub fn stride(&self) -> usize {
        match self.kind {
            QueueKind::Mpsc => slot_size(self.max_message_size),
            QueueKind::Spsc | QueueKind::MpscLocked => record_stride(self.max_message_size),
        }
    }

    /// Size of the data region following the header.
    pub fn queue_size_bytes(&self) -> usize {
        if let Some(size) = self.queue_size {
            return size;
        }
        match self.kind {
            QueueKind::Mpsc => (self.capacity + self.max_producer_count + 1) * self.stride(),
            QueueKind::Spsc | QueueKind::MpscLocked => (self.capacity + 2) * self.stride(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(QueueError::Config(msg));
        if self.queue_name.is_empty() {
            return invalid("queue_name must not be empty".to_string());
        }
        if self.max_message_size == 0 {
            return invalid("max_message_size must be positive".to_string());
        }
        if self.capacity == 0 && self.queue_size.is_none() {
            return invalid("capacity must be positive".to_string());
        }
        if self.kind == QueueKind::Mpsc && self.max_producer_count == 0 {
            return invalid("max_producer_count must be positive".to_string());
        }
        let stride = self.stride();
        let size = self.queue_size_bytes();
        if size % 4 != 0 {
            return invalid(format!("queue size {} is not a multiple of 4", size));
        }
        if size + HEADER_SIZE > i32::MAX as usize {
            return invalid(format!("queue size {} does not fit 32-bit offsets", size));
        }
        let minimum = match self.kind {
            QueueKind::Mpsc => stride * (self.max_producer_count + 2),
            QueueKind::Spsc | QueueKind::MpscLocked => stride * 2,
        };
        if size < minimum {
            return invalid(format!(
                "queue size {} is below the {} bytes a {} queue with {} byte messages needs",
                size, minimum, self.kind, self.max_message_size
            ));
        }
        Ok(())
    }
}

/// A named shared memory mapping, found by every process through a file link.
///
/// The owner creates the backing object and destroys it on `dispose`; every
/// other handle only unmaps its view.
pub struct SharedSegment {
    shmem: Option<Shmem>,
    link: PathBuf,
    len: usize,
    owner: bool,
}

// `Shmem` holds the raw mapping pointer; the segment never shares it by reference.
unsafe impl Send for SharedSegment {}

impl SharedSegment {
    pub fn create_or_attach(link: &Path, size: usize, ownership: bool) -> Result<SharedSegment> {
        let shmem = if ownership {
            create_owned(link, size)?
        } else {
            let shmem = ShmemConf::new().flink(link).open()?;
            info!(link = %link.display(), os_id = shmem.get_os_id(), "attached to segment");
            shmem
        };
        // Every process maps the same layout; a different size means a different config.
        if shmem.len() != size {
            return Err(QueueError::SegmentSize {
                path: link.to_path_buf(),
                expected: size,
                actual: shmem.len(),
            });
        }
        Ok(SharedSegment {
            len: shmem.len(),
            owner: shmem.is_owner(),
            shmem: Some(shmem),
            link: link.to_path_buf(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_disposed(&self) -> bool {
        self.shmem.is_none()
    }

    pub fn link_path(&self) -> &Path {
        &self.link
    }

    /// Start of the mapping, null once disposed.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.shmem
            .as_ref()
            .map_or(std::ptr::null_mut(), |shmem| shmem.as_ptr())
    }

    /// Unmaps the view and, for the owner, destroys the backing object and its
    /// link. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if let Some(shmem) = self.shmem.take() {
            if self.owner {
                info!(link = %self.link.display(), "releasing owned segment");
            } else {
                info!(link = %self.link.display(), "detaching from segment");
            }
            drop(shmem);
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn create_owned(link: &Path, size: usize) -> Result<Shmem> {
    match ShmemConf::new().size(size).flink(link).create() {
        Ok(shmem) => {
            info!(link = %link.display(), os_id = shmem.get_os_id(), size, "created segment");
            Ok(shmem)
        }
        Err(ShmemError::LinkExists) => match ShmemConf::new().flink(link).open() {
            Ok(mut shmem) => {
                warn!(
                    link = %link.display(),
                    os_id = shmem.get_os_id(),
                    "segment already exists, taking ownership and reinitializing"
                );
                shmem.set_owner(true);
                Ok(shmem)
            }
            Err(e) => {
                warn!(link = %link.display(), error = %e, "removing stale segment link");
                fs::remove_file(link)?;
                Ok(ShmemConf::new().size(size).flink(link).create()?)
            }
        },
        Err(e) => Err(e.into()),
    }
}

/// Maps the queue segment, builds the strategy for `kind` and, for the owner,
/// initializes the header and control words.
pub(crate) fn queue_context(
    cfg: &ShmemConfig,
    ownership: bool,
) -> Result<(Ring, Box<dyn Strategy>)> {
    cfg.validate()?;
    let queue_size = cfg.queue_size_bytes();
    let segment =
        SharedSegment::create_or_attach(&cfg.link_path(), HEADER_SIZE + queue_size, ownership)?;
    let ring = Ring::new(segment, queue_size)?;
    let strategy = strategy::build(cfg, ownership)?;
    if ring.is_owner() {
        ring.reset();
        strategy.seed(&ring)?;
    }
    info!(
        queue = %cfg.queue_name,
        kind = %cfg.kind,
        queue_size,
        owner = ring.is_owner(),
        "queue opened"
    );
    Ok((ring, strategy))
}

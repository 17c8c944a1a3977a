use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::{tempdir, TempDir};

use crate::core::{QueueKind, ShmemConfig};
use crate::reader::{MessageReader, ReaderConfig};
use crate::writer::{MessageWriter, WriterConfig};

mod scenario_tests;

/// A queue config whose segment link lives in a fresh temporary directory.
pub(crate) fn test_config(kind: QueueKind) -> (TempDir, ShmemConfig) {
    static QUEUE_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
    let temp_dir = tempdir().expect("failed to create temp dir");
    let shmem = ShmemConfig {
        data_dir: temp_dir.path().to_string_lossy().into_owned(),
        queue_name: format!(
            "test_queue_{}_{}",
            std::process::id(),
            QUEUE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
        ),
        kind,
        capacity: 16,
        max_message_size: 64,
        max_producer_count: 4,
        queue_size: None,
    };
    (temp_dir, shmem)
}

pub(crate) fn owning_reader(shmem: &ShmemConfig) -> MessageReader {
    MessageReader::new(&ReaderConfig {
        shmem: shmem.clone(),
        ownership: true,
    })
    .expect("failed to open owning reader")
}

pub(crate) fn attached_writer(shmem: &ShmemConfig) -> MessageWriter {
    MessageWriter::new(&WriterConfig {
        shmem: shmem.clone(),
        ownership: false,
    })
    .expect("failed to attach writer")
}

/// Enqueues `message`, spinning while the queue is full.
pub(crate) fn enqueue_spinning(writer: &mut MessageWriter, message: &[u8]) {
    while !writer.enqueue(message).expect("enqueue failed") {
        std::thread::yield_now();
    }
}

/// Pattern payload whose bytes are derived from `id`, so any mix-up shows.
pub(crate) fn patterned(id: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((id * 31 + i) % 251) as u8).collect()
}

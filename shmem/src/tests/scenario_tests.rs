use std::collections::VecDeque;

use super::{attached_writer, owning_reader, patterned, test_config};
use crate::core::queue_context;
use crate::core::ring::{record_stride, slot_size, UNCOMMITTED};
use crate::core::QueueKind;
use crate::errors::QueueError;

fn sixty_four_byte_queue(kind: QueueKind) {
    let (_temp_dir, mut shmem) = test_config(kind);
    shmem.queue_size = Some(64);
    shmem.max_message_size = 8;
    let mut reader = owning_reader(&shmem);
    let mut writer = attached_writer(&shmem);

    let payloads: Vec<[u8; 8]> = (b'A'..=b'E').map(|c| [c; 8]).collect();
    for payload in &payloads {
        assert!(writer.enqueue(payload).unwrap());
    }
    assert_eq!(writer.used_bytes(), 60);
    assert_eq!(writer.free_bytes(), 4);
    assert!(!writer.enqueue(b"FFFFFFFF").unwrap());
    assert!(!writer.enqueue(b"F").unwrap());

    let mut buf = [0u8; 8];
    for payload in &payloads {
        assert_eq!(reader.dequeue(&mut buf).unwrap(), Some(8));
        assert_eq!(&buf, payload);
    }
    assert_eq!(reader.dequeue(&mut buf).unwrap(), None);
    assert_eq!(reader.head_offset(), reader.tail_offset());
}

#[test]
fn spsc_holds_five_twelve_byte_records_in_sixty_four_bytes() {
    sixty_four_byte_queue(QueueKind::Spsc);
}

#[test]
fn locked_queue_behaves_like_spsc_for_one_producer() {
    sixty_four_byte_queue(QueueKind::MpscLocked);
}

#[test]
fn empty_queue_dequeues_nothing() {
    let (_temp_dir, shmem) = test_config(QueueKind::Spsc);
    let mut reader = owning_reader(&shmem);
    let mut buf = [0u8; 64];
    assert_eq!(reader.head_offset(), 0);
    assert_eq!(reader.tail_offset(), 0);
    assert_eq!(reader.dequeue(&mut buf).unwrap(), None);
    assert_eq!(reader.used_bytes(), 0);
    assert_eq!(reader.free_bytes(), reader.queue_size());
}

#[test]
fn single_producer_fifo_round_trip() {
    let (_temp_dir, shmem) = test_config(QueueKind::Spsc);
    let mut reader = owning_reader(&shmem);
    let mut writer = attached_writer(&shmem);

    let messages: Vec<Vec<u8>> = (0..12).map(|i| patterned(i, 1 + i * 5)).collect();
    for message in &messages {
        assert!(writer.enqueue(message).unwrap());
    }
    for message in &messages {
        assert_eq!(reader.dequeue_vec().unwrap().as_ref(), Some(message));
    }
    assert_eq!(reader.dequeue_vec().unwrap(), None);
}

/// Interleaves enqueue and dequeue until the tail has wrapped at least twice,
/// checking every message against what was sent and the space accounting at
/// every step.
fn wrap_around(kind: QueueKind, queue_size: usize, max_message_size: usize) {
    let (_temp_dir, mut shmem) = test_config(kind);
    shmem.queue_size = Some(queue_size);
    shmem.max_message_size = max_message_size;
    shmem.max_producer_count = 1;
    let margin = match kind {
        QueueKind::Mpsc => slot_size(max_message_size) * 2,
        QueueKind::Spsc | QueueKind::MpscLocked => 0,
    };
    let mut reader = owning_reader(&shmem);
    let mut writer = attached_writer(&shmem);

    let mut in_flight = VecDeque::new();
    let mut wraps = 0;
    let mut buf = vec![0u8; max_message_size];
    for i in 0..200 {
        let message = patterned(i, 1 + (i * 7) % max_message_size);
        loop {
            assert_eq!(writer.used_bytes() + writer.free_bytes(), queue_size);
            let free_before = writer.free_bytes();
            let tail_before = writer.tail_offset();
            if writer.enqueue(&message).unwrap() {
                assert!(free_before > record_stride(message.len()));
                assert!(free_before >= margin);
                if writer.tail_offset() < tail_before {
                    wraps += 1;
                }
                in_flight.push_back(message);
                break;
            }
            let expected = in_flight.pop_front().expect("refused an empty queue");
            assert_eq!(reader.dequeue(&mut buf).unwrap(), Some(expected.len()));
            assert_eq!(&buf[..expected.len()], &expected[..]);
        }
    }
    while let Some(expected) = in_flight.pop_front() {
        assert_eq!(reader.dequeue(&mut buf).unwrap(), Some(expected.len()));
        assert_eq!(&buf[..expected.len()], &expected[..]);
    }
    assert_eq!(reader.dequeue(&mut buf).unwrap(), None);
    assert!(wraps >= 2, "tail wrapped only {} times", wraps);
}

#[test]
fn spsc_wraps_around_repeatedly() {
    wrap_around(QueueKind::Spsc, 64, 20);
}

#[test]
fn spsc_wraps_with_odd_lengths() {
    wrap_around(QueueKind::Spsc, 100, 13);
}

#[test]
fn mpsc_wraps_when_slots_do_not_divide_the_region() {
    // 12 byte slots in 68 bytes leave an 8 byte remainder that is skipped.
    wrap_around(QueueKind::Mpsc, 68, 8);
}

#[test]
fn mpsc_wraps_when_slots_divide_the_region() {
    wrap_around(QueueKind::Mpsc, 72, 8);
}

#[test]
fn locked_queue_wraps_around_repeatedly() {
    wrap_around(QueueKind::MpscLocked, 64, 20);
}

#[test]
fn mpsc_holds_at_least_capacity_messages() {
    let (_temp_dir, shmem) = test_config(QueueKind::Mpsc);
    let mut reader = owning_reader(&shmem);
    let mut writer = attached_writer(&shmem);

    let mut accepted = Vec::new();
    for i in 0.. {
        let message = patterned(i, 64);
        if !writer.enqueue(&message).unwrap() {
            break;
        }
        accepted.push(message);
    }
    // Refused once free space drops below one slot per producer plus one.
    assert_eq!(accepted.len(), shmem.capacity + 1);
    assert_eq!(writer.used_bytes(), accepted.len() * slot_size(64));

    for message in &accepted {
        assert_eq!(reader.dequeue_vec().unwrap().as_ref(), Some(message));
    }
    assert_eq!(reader.dequeue_vec().unwrap(), None);
    assert!(writer.enqueue(b"again").unwrap());
}

#[test]
fn mpsc_short_messages_still_take_a_whole_slot() {
    let (_temp_dir, shmem) = test_config(QueueKind::Mpsc);
    let mut reader = owning_reader(&shmem);
    let mut writer = attached_writer(&shmem);

    assert!(writer.enqueue(b"x").unwrap());
    assert_eq!(writer.tail_offset(), slot_size(shmem.max_message_size));
    assert_eq!(reader.dequeue_vec().unwrap(), Some(b"x".to_vec()));
    assert_eq!(reader.head_offset(), slot_size(shmem.max_message_size));
}

#[test]
fn consumer_stalls_behind_an_uncommitted_slot() {
    let (_temp_dir, shmem) = test_config(QueueKind::Mpsc);
    let mut reader = owning_reader(&shmem);
    let (ring, strategy) = queue_context(&shmem, false).unwrap();
    let mut writer = attached_writer(&shmem);

    let slow = strategy.reserve(&ring, 5).unwrap().expect("queue is empty");
    assert!(writer.enqueue(b"second").unwrap());

    let mut buf = [0u8; 64];
    assert_eq!(reader.dequeue(&mut buf).unwrap(), None);
    assert_eq!(reader.dequeue(&mut buf).unwrap(), None);
    assert_eq!(reader.head_offset(), 0);

    ring.write_payload(slow.offset, b"first").unwrap();
    strategy.commit(&ring, slow, 5).unwrap();

    assert_eq!(reader.dequeue(&mut buf).unwrap(), Some(5));
    assert_eq!(&buf[..5], b"first");
    assert_eq!(reader.dequeue(&mut buf).unwrap(), Some(6));
    assert_eq!(&buf[..6], b"second");
    assert_eq!(reader.dequeue(&mut buf).unwrap(), None);
}

#[test]
fn consumed_slots_are_marked_uncommitted() {
    let (_temp_dir, shmem) = test_config(QueueKind::Mpsc);
    let mut reader = owning_reader(&shmem);
    let (ring, _strategy) = queue_context(&shmem, false).unwrap();
    let mut writer = attached_writer(&shmem);

    assert!(writer.enqueue(b"payload").unwrap());
    assert_eq!(ring.load_control(0).unwrap(), 7);
    assert!(reader.dequeue_vec().unwrap().is_some());
    assert_eq!(ring.load_control(0).unwrap(), UNCOMMITTED);
}

#[test]
fn oversized_and_empty_messages_are_rejected() {
    for kind in [QueueKind::Spsc, QueueKind::Mpsc, QueueKind::MpscLocked] {
        let (_temp_dir, shmem) = test_config(kind);
        let _reader = owning_reader(&shmem);
        let mut writer = attached_writer(&shmem);

        let err = writer.enqueue(&[0u8; 65]).unwrap_err();
        assert!(matches!(err, QueueError::MessageTooLarge { len: 65, max: 64 }));
        assert!(err.is_argument_error());

        let err = writer.enqueue(&[]).unwrap_err();
        assert!(matches!(err, QueueError::EmptyMessage));
        assert_eq!(writer.used_bytes(), 0);
    }
}

#[test]
fn small_buffer_leaves_the_message_in_place() {
    for kind in [QueueKind::Spsc, QueueKind::Mpsc] {
        let (_temp_dir, shmem) = test_config(kind);
        let mut reader = owning_reader(&shmem);
        let mut writer = attached_writer(&shmem);
        assert!(writer.enqueue(b"twelve bytes").unwrap());

        let mut small = [0u8; 4];
        let err = reader.dequeue(&mut small).unwrap_err();
        assert!(matches!(err, QueueError::BufferTooSmall { len: 12, capacity: 4 }));
        assert_eq!(reader.dequeue_vec().unwrap(), Some(b"twelve bytes".to_vec()));
    }
}

#[test]
fn corrupt_control_word_is_a_protocol_violation() {
    let (_temp_dir, shmem) = test_config(QueueKind::Spsc);
    let mut reader = owning_reader(&shmem);
    let mut writer = attached_writer(&shmem);
    let (ring, _strategy) = queue_context(&shmem, false).unwrap();

    assert!(writer.enqueue(b"hello").unwrap());
    ring.store_control(0, 1000).unwrap();

    let err = reader.dequeue_vec().unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(reader.head_offset(), 0);
}

#[test]
fn reserving_a_slot_still_in_use_is_a_protocol_violation() {
    let (_temp_dir, shmem) = test_config(QueueKind::Mpsc);
    let _reader = owning_reader(&shmem);
    let (ring, _strategy) = queue_context(&shmem, false).unwrap();
    let mut writer = attached_writer(&shmem);

    ring.store_control(0, 7).unwrap();
    let err = writer.enqueue(b"clobber").unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn out_of_range_cursor_is_a_protocol_violation() {
    let (_temp_dir, shmem) = test_config(QueueKind::Spsc);
    let mut reader = owning_reader(&shmem);
    let (ring, _strategy) = queue_context(&shmem, false).unwrap();

    ring.store_tail(reader.queue_size() + 8);
    assert!(reader.dequeue_vec().unwrap_err().is_protocol_violation());
}

//! Ordering behaviour of the [`TimerQueue`].

use proptest::prelude::*;
use ruuvi_time::{after, ExtU32, Instant, TimerQueue};

fn at(ticks: u32) -> Instant {
    Instant::from_ticks(ticks)
}

fn drain<const N: usize>(queue: &mut TimerQueue<&'static str, N>, now: Instant) -> Vec<&'static str> {
    let mut fired = Vec::new();
    while let Some(entry) = queue.pop_expired(now) {
        fired.push(entry.value);
    }
    fired
}

#[test]
fn expires_in_deadline_order() {
    let mut queue: TimerQueue<&str, 8> = TimerQueue::new();
    queue.insert(at(15_000), "late").unwrap();
    queue.insert(at(5_000), "early").unwrap();
    queue.insert(at(10_000), "middle").unwrap();

    assert_eq!(queue.next_deadline(), Some(at(5_000)));
    assert!(queue.pop_expired(at(4_999)).is_none());
    assert_eq!(drain(&mut queue, at(10_000)), ["early", "middle"]);
    assert_eq!(drain(&mut queue, at(20_000)), ["late"]);
    assert!(queue.is_empty());
}

#[test]
fn equal_deadlines_are_fifo() {
    let mut queue: TimerQueue<&str, 8> = TimerQueue::new();
    queue.insert(at(100), "first").unwrap();
    queue.insert(at(50), "zero").unwrap();
    queue.insert(at(100), "second").unwrap();
    queue.insert(at(100), "third").unwrap();

    assert_eq!(drain(&mut queue, at(100)), ["zero", "first", "second", "third"]);
}

#[test]
fn ordering_survives_counter_wrap() {
    let mut queue: TimerQueue<&str, 4> = TimerQueue::new();
    let now = at(u32::MAX - 1_000);
    queue.insert(after(now, 5_000.millis()), "after wrap").unwrap();
    queue.insert(after(now, 500.millis()), "before wrap").unwrap();

    assert_eq!(queue.next_deadline(), Some(at(u32::MAX - 500)));
    assert_eq!(drain(&mut queue, at(3_999)), ["before wrap", "after wrap"]);
}

#[test]
fn full_queue_hands_value_back() {
    let mut queue: TimerQueue<&str, 2> = TimerQueue::new();
    queue.insert(at(1), "a").unwrap();
    queue.insert(at(2), "b").unwrap();
    assert!(queue.is_full());
    assert_eq!(queue.insert(at(3), "c"), Err("c"));
}

#[test]
fn removed_entries_never_fire() {
    let mut queue: TimerQueue<&str, 4> = TimerQueue::new();
    let a = queue.insert(at(10), "a").unwrap();
    let b = queue.insert(at(20), "b").unwrap();

    assert!(queue.contains(a));
    assert_eq!(queue.remove(a).map(|e| e.value), Some("a"));
    assert!(!queue.contains(a));
    assert!(queue.remove(a).is_none());

    assert_eq!(drain(&mut queue, at(30)), ["b"]);
    assert!(!queue.contains(b));
}

proptest! {
    #[test]
    fn pops_never_go_backwards(base in any::<u32>(), offsets in proptest::collection::vec(0u32..1_000_000, 1..32)) {
        let mut queue: TimerQueue<usize, 32> = TimerQueue::new();
        let now = at(base);
        for (i, offset) in offsets.iter().enumerate() {
            queue.insert(after(now, offset.millis()), i).unwrap();
        }

        let end = after(now, 1_000_000.millis());
        let mut last: Option<(u32, usize)> = None;
        while let Some(entry) = queue.pop_expired(end) {
            let offset = entry.deadline.ticks().wrapping_sub(base);
            if let Some((prev_offset, prev_index)) = last {
                prop_assert!(prev_offset <= offset);
                if prev_offset == offset {
                    prop_assert!(prev_index < entry.value);
                }
            }
            last = Some((offset, entry.value));
        }
        prop_assert!(queue.is_empty());
    }
}

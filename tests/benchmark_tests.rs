//! Performance benchmarks for critical server systems

use server::ordered_map::OrderedMap;
use shared::{decode, FrameBuffer, Message, PlayerInfo, PlayerPosition};
use std::time::Instant;

/// Spreads sequential indices over the key space without a random source.
fn scrambled_key(i: u32) -> i32 {
    i.wrapping_mul(2_654_435_761) as i32
}

fn positions(count: u32) -> Vec<PlayerPosition> {
    (0..count)
        .map(|i| PlayerPosition {
            player_id: i + 1,
            x: (i % 1000) as f32 + 0.5,
            y: (i * 7 % 1000) as f32,
            mass: 10 + i,
        })
        .collect()
}

/// Benchmarks ordered map insertion with scattered keys
#[test]
fn benchmark_ordered_map_insert() {
    let iterations = 100_000;
    let mut map = OrderedMap::new();
    let start = Instant::now();

    for i in 0..iterations {
        map.insert(scrambled_key(i), i);
    }

    let duration = start.elapsed();
    println!(
        "Ordered map insert: {} entries in {:?} ({:.2} ns/op)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(map.len(), iterations as usize);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks ordered map lookups and removals
#[test]
fn benchmark_ordered_map_lookup_and_remove() {
    let entries = 50_000;
    let mut map = OrderedMap::new();
    for i in 0..entries {
        map.insert(scrambled_key(i), i);
    }

    let start = Instant::now();
    let mut found = 0;
    for round in 0..4 {
        for i in 0..entries {
            if map.get(scrambled_key(i)).is_some() {
                found += 1;
            }
        }
        if round == 0 {
            assert_eq!(found, entries);
        }
    }
    for i in 0..entries {
        assert_eq!(map.remove(scrambled_key(i)), Some(i));
    }

    let duration = start.elapsed();
    println!(
        "Ordered map: {} lookups and {} removals in {:?}",
        found, entries, duration
    );

    assert!(map.is_empty());
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks ordered traversal, used by every broadcast
#[test]
fn benchmark_ordered_map_iteration() {
    let mut map = OrderedMap::new();
    for i in 0..2_000 {
        map.insert(scrambled_key(i), i as u64);
    }

    let iterations = 200;
    let start = Instant::now();
    let mut total = 0u64;

    for _ in 0..iterations {
        map.for_each(|_, value| total += value);
    }

    let duration = start.elapsed();
    println!(
        "Ordered map iteration: {} passes over {} entries in {:?}",
        iterations,
        map.len(),
        duration
    );

    assert!(total > 0);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks encoding of a large PLAYER_POSITIONS frame
#[test]
fn benchmark_positions_encoding() {
    let message = Message::PlayerPositions {
        positions: positions(2_000),
    };
    let mut buf = vec![0u8; message.encoded_len().unwrap()];

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        message.encode_into(&mut buf).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "PLAYER_POSITIONS encode ({} bytes): {} iterations in {:?} ({:.2} μs/iter)",
        buf.len(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks decoding of a large PLAYER_POSITIONS frame
#[test]
fn benchmark_positions_decoding() {
    let bytes = Message::PlayerPositions {
        positions: positions(2_000),
    }
    .encode()
    .unwrap();

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let (message, used) = decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert!(matches!(message, Message::PlayerPositions { .. }));
    }

    let duration = start.elapsed();
    println!(
        "PLAYER_POSITIONS decode: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks stream reassembly of many small frames in awkward chunks
#[test]
fn benchmark_frame_reassembly() {
    let mut stream = Vec::new();
    for i in 0..20_000u32 {
        let message = if i % 2 == 0 {
            Message::SetTarget {
                x: (i % 1000) as f32,
                y: 1.0,
            }
        } else {
            Message::PlayerJoin(PlayerInfo {
                player_id: i,
                name: format!("player-{}", i),
            })
        };
        stream.extend(message.encode().unwrap());
    }

    let start = Instant::now();
    let mut frames = FrameBuffer::new();
    let mut messages = Vec::new();

    for chunk in stream.chunks(1_337) {
        frames.push(chunk, &mut messages).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Frame reassembly: {} frames from {} bytes in {:?}",
        messages.len(),
        stream.len(),
        duration
    );

    assert_eq!(messages.len(), 20_000);
    assert_eq!(frames.buffered(), 0);
    assert!(duration.as_millis() < 1000);
}

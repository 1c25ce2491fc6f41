//! Benchmarks for whiteboard and file system hot paths.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use huddle_core::config::{FileSystemConfig, WhiteboardConfig};
use huddle_core::whiteboard::{ContentType, ContentUpdate, NewContent};
use huddle_core::{SharedFileSystem, SharedWhiteboard};
use serde_json::json;

fn populated_board(items: usize) -> SharedWhiteboard {
    let board = SharedWhiteboard::new("bench", "Bench", "w1", &WhiteboardConfig::default());
    for i in 0..items {
        let new = NewContent::new(ContentType::Text)
            .with_id(format!("item-{i}"))
            .at(i as f64, i as f64)
            .with_data("text", json!("note"));
        board.add_content("w1", new).unwrap();
    }
    board
}

fn bench_whiteboard_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("whiteboard_update");
    for items in [10, 100, 1000] {
        let board = populated_board(items);
        group.bench_with_input(BenchmarkId::from_parameter(items), &board, |b, board| {
            b.iter(|| {
                let update = ContentUpdate::default().with_data("text", json!("edited"));
                black_box(board.update_content("w2", black_box("item-0"), update).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_whiteboard_lock_cycle(c: &mut Criterion) {
    let board = populated_board(100);
    c.bench_function("whiteboard/lock_unlock", |b| {
        b.iter(|| {
            black_box(board.lock_content("w1", "item-50").unwrap());
            black_box(board.unlock_content("w1", "item-50").unwrap());
        });
    });
}

fn bench_file_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_update");
    for size_kb in [1, 16, 256] {
        let content = "x".repeat(size_kb * 1024);
        let files = SharedFileSystem::new("bench", &FileSystemConfig::default());
        files.create_file("w1", "data.txt", "").unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size_kb}KB")),
            &content,
            |b, content| {
                b.iter(|| black_box(files.update_file("w1", "data.txt", content, None).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_whiteboard_update, bench_whiteboard_lock_cycle, bench_file_update);
criterion_main!(benches);

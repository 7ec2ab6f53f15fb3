#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use verse_core::codec::{pack_run, unpack_run};
use verse_core::command::Command;
use verse_core::inbound::InboundQueue;

fn node_create(user: u16, parent: u32, node: u32, kind: u16) -> Command {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&user.to_be_bytes());
    payload.extend_from_slice(&parent.to_be_bytes());
    payload.extend_from_slice(&node.to_be_bytes());
    payload.extend_from_slice(&kind.to_be_bytes());
    Command::new(32, payload)
}

fn pack_run_sharing(c: &mut Criterion) {
    let cmds: Vec<Command> = (0..256)
        .map(|i| node_create(1001, 1, 500 + i, 301))
        .collect();
    let refs: Vec<&Command> = cmds.iter().collect();

    c.bench_function("pack_run 256 shared node_create", move |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            pack_run(&mut buf, 32, 6, &refs).unwrap();
            black_box(buf);
        })
    });
}

fn unpack_run_sharing(c: &mut Criterion) {
    let cmds: Vec<Command> = (0..256)
        .map(|i| node_create(1001, 1, 500 + i, 301))
        .collect();
    let refs: Vec<&Command> = cmds.iter().collect();
    let mut buf = Vec::new();
    pack_run(&mut buf, 32, 6, &refs).unwrap();

    c.bench_function("unpack_run 256 shared node_create", move |b| {
        b.iter(|| {
            let mut inbound = InboundQueue::new(1_048_576);
            unpack_run(&buf, &mut inbound).unwrap();
            black_box(&inbound);
        })
    });
}

criterion_group!(benches, pack_run_sharing, unpack_run_sharing);
criterion_main!(benches);

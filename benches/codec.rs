#![allow(missing_docs)]

use criterion::{Criterion, criterion_group, criterion_main};
use shadowheap::codec::{PrimitiveDecoder, PrimitiveEncoder};
use shadowheap::{
    ClassRegistry, ClassShape, ConstantRegistry, FieldDescriptor, FieldKind, MemoryGraphStore,
    NullFeeProcessor, ShadowHeap, Value,
};
use std::hint::black_box;
use std::rc::Rc;

fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("Primitive Codec");

    group.bench_function("encode_mixed_1k", |b| {
        b.iter(|| {
            let mut enc = PrimitiveEncoder::new();
            for i in 0..1_000i64 {
                enc.encode_byte(i as i8);
                enc.encode_int(i as i32);
                enc.encode_long(i);
            }
            black_box(enc.into_bytes());
        });
    });

    let mut enc = PrimitiveEncoder::new();
    for i in 0..1_000i64 {
        enc.encode_byte(i as i8);
        enc.encode_int(i as i32);
        enc.encode_long(i);
    }
    let bytes = enc.into_bytes();

    group.bench_function("decode_mixed_1k", |b| {
        b.iter(|| {
            let mut dec = PrimitiveDecoder::new(&bytes);
            let mut sum = 0i64;
            for _ in 0..1_000 {
                sum += dec.decode_byte().expect("byte") as i64;
                sum += dec.decode_int().expect("int") as i64;
                sum += dec.decode_long().expect("long");
            }
            black_box(sum);
        });
    });

    group.finish();
}

fn chain_classes() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry
        .register(ClassShape::new(
            "bench.Root",
            None,
            vec![],
            vec![FieldDescriptor::new("head", FieldKind::Ref)],
        ))
        .expect("register root");
    registry
        .register(ClassShape::new(
            "bench.Link",
            None,
            vec![
                FieldDescriptor::new("value", FieldKind::Long),
                FieldDescriptor::new("next", FieldKind::Ref),
            ],
            vec![],
        ))
        .expect("register link");
    registry
}

fn seeded_store(links: usize) -> Rc<MemoryGraphStore> {
    let store = Rc::new(MemoryGraphStore::new());
    let heap = ShadowHeap::new(
        store.clone(),
        Rc::new(NullFeeProcessor),
        chain_classes(),
        ConstantRegistry::new(),
    );
    let mut head: Option<shadowheap::ObjHandle> = None;
    for i in 0..links {
        let link = heap.new_object("bench.Link").expect("new link");
        heap.set_field(&link, "value", Value::Long(i as i64))
            .expect("set value");
        heap.set_field(&link, "next", Value::Ref(head.take()))
            .expect("set next");
        head = Some(link);
    }
    heap.set_static("bench.Root", "head", Value::Ref(head))
        .expect("set head");
    heap.save_graph().expect("save");
    store
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("Graph Image");

    let store = seeded_store(1_000);

    // Boot cost: boundary discovery and stub interning, no payload loads.
    group.bench_function("load_1k_stubs", |b| {
        b.iter(|| {
            let heap = ShadowHeap::new(
                store.clone(),
                Rc::new(NullFeeProcessor),
                chain_classes(),
                ConstantRegistry::new(),
            );
            heap.load_graph().expect("load");
            black_box(&heap);
        });
    });

    // Full fault-in: walk the chain end to end.
    group.bench_function("fault_1k_chain", |b| {
        b.iter(|| {
            let heap = ShadowHeap::new(
                store.clone(),
                Rc::new(NullFeeProcessor),
                chain_classes(),
                ConstantRegistry::new(),
            );
            heap.load_graph().expect("load");
            let mut cursor = heap.get_static("bench.Root", "head").expect("head");
            let mut sum = 0i64;
            while let Value::Ref(Some(link)) = cursor {
                if let Value::Long(v) = heap.field(&link, "value").expect("value") {
                    sum += v;
                }
                cursor = heap.field(&link, "next").expect("next");
            }
            black_box(sum);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_primitives, bench_graph);
criterion_main!(benches);

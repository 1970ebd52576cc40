use chunkstore::{bytemuck, component, spec, EntitySpec, World};
use criterion::*;

macro_rules! comps {
    ($($name:ident),+) => {
        $(
            #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
            #[repr(C)]
            struct $name(u64);
        )+
        component!($($name),+);
    };
}

comps!(C1, C2, C3, C4, C5, C6, C7, C8);

fn specs() -> Vec<(usize, EntitySpec)> {
    vec![
        (1, spec!(C1).unwrap()),
        (2, spec!(C1, C2).unwrap()),
        (4, spec!(C1, C2, C3, C4).unwrap()),
        (8, spec!(C1, C2, C3, C4, C5, C6, C7, C8).unwrap()),
    ]
}

fn create_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("create entity");

    for (num_comps, spec) in specs() {
        for log_entities in (0..=12).step_by(4) {
            let entities = 1usize << log_entities;
            group.throughput(Throughput::Elements(entities as u64));

            group.bench_with_input(
                BenchmarkId::new(
                    format!("{} components", num_comps),
                    format!("{} entities", entities),
                ),
                &entities,
                |b, &entities| {
                    b.iter_batched(
                        World::new,
                        |mut world| {
                            for _ in 0..entities {
                                world.create_entity(&spec).unwrap();
                            }
                            world
                        },
                        BatchSize::SmallInput,
                    );
                },
            );

            group.bench_with_input(
                BenchmarkId::new(
                    format!("{} components batched", num_comps),
                    format!("{} entities", entities),
                ),
                &entities,
                |b, &entities| {
                    b.iter_batched(
                        World::new,
                        |mut world| {
                            world.create_entities(&spec, entities).unwrap();
                            world
                        },
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
}

criterion_group!(benches, create_entity);
criterion_main!(benches);

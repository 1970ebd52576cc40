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

fn delete_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete entity");

    for (num_comps, spec) in specs() {
        for log_entities in (0..=12).step_by(4) {
            let entities = 1usize << log_entities;
            group.throughput(Throughput::Elements(entities as u64));

            let setup = || {
                let mut world = World::new();
                let created = world.create_entities(&spec, entities).unwrap();
                (world, created)
            };

            group.bench_with_input(
                BenchmarkId::new(
                    format!("{} components", num_comps),
                    format!("{} entities", entities),
                ),
                &entities,
                |b, _| {
                    b.iter_batched(
                        setup,
                        |(mut world, created)| {
                            for entity in created {
                                world.destroy_entity(entity).unwrap();
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
                |b, _| {
                    b.iter_batched(
                        setup,
                        |(mut world, created)| {
                            world.destroy_entities(&created).unwrap();
                            world
                        },
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
}

criterion_group!(benches, delete_entity);
criterion_main!(benches);

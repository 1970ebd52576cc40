use chunkstore::{bytemuck, component, spec, World};

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct MyComponent(i32);

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Doomed(u8);

component!(MyComponent, Doomed);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut world = World::new();
    let spec = spec!(MyComponent)?;
    let mut to_strip = Vec::new();
    let mut to_delete = Vec::new();

    for _ in 0..8 {
        world.destroy_entities(&to_delete)?;
        to_delete.clear();

        for entity in to_strip.drain(..) {
            world.remove_component::<Doomed>(entity)?;
            to_delete.push(entity);
        }

        let created = world.create_entities_filled(&spec, 512, MyComponent(32))?;
        for (idx, entity) in created.into_iter().enumerate() {
            if idx % 12 == 11 {
                world.set_component(entity, Doomed(1))?;
                to_strip.push(entity);
            }
        }
    }

    let moved = world.defragment();
    println!("entities: {}", world.entity_count());
    println!("defragment moved: {}", moved);
    for archetype in world.archetypes() {
        println!(
            "archetype #{} {:?}: {} entities in {} chunks",
            archetype.id(),
            archetype.spec(),
            archetype.len(),
            archetype.chunks().chunk_count()
        );
    }

    Ok(())
}

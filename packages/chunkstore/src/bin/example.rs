use chunkstore::{bytemuck, component, spec, World};

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct MyComponent(i32);

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Label(u32);

component!(MyComponent, Label);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut world = World::new();

    let entity = world.create_entity(&spec!(MyComponent)?)?;
    world.set_component(entity, MyComponent(3))?;
    world.set_component(entity, Label(7))?;

    println!("entity: {:?}", entity);
    println!("location: {:?}", world.location(entity)?);
    println!("value: {:?}", world.get_component::<MyComponent>(entity)?);

    for component in world.spec_of(entity)?.component_types() {
        println!("component: {:?}", component);
    }

    for archetype in world.archetypes() {
        println!(
            "archetype #{}: {:?} ({} entities)",
            archetype.id(),
            archetype.spec(),
            archetype.len()
        );
    }

    Ok(())
}

use std::collections::HashMap;
use std::io::Write;

use chunkstore::{bytemuck, component, spec, ColumnRef, Entity, Query, World};

const G: f32 = 10.0;
const TIME_STEP: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Position(f32, f32);

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Velocity(f32, f32);

#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Mass(f32);

component!(Position, Velocity, Mass);

struct Body {
    id: Entity,
    position: Position,
    mass: f32,
}

fn snapshot(world: &World) -> chunkstore::Result<Vec<Body>> {
    let mut bodies = Vec::new();
    for projection in world.project::<(ColumnRef<Position>, ColumnRef<Mass>)>()? {
        let projection = projection?;
        let (positions, masses) = &projection.columns;
        for (idx, id) in projection.entities.iter().enumerate() {
            bodies.push(Body {
                id: *id,
                position: positions[idx],
                mass: masses[idx].0,
            });
        }
    }
    Ok(bodies)
}

fn apply_acceleration(world: &World, query: &Query) -> chunkstore::Result<()> {
    let previous = snapshot(world)?;

    world.par_for_each(query, |chunk| {
        let ids = chunk.entities();
        let positions = chunk.read::<Position>()?;
        let mut velocities = chunk.write::<Velocity>()?;
        let mut masses = chunk.write::<Mass>()?;

        for idx_a in 0..ids.len() {
            let Position(x_a, y_a) = positions[idx_a];
            let Velocity(vx_a, vy_a) = &mut velocities[idx_a];
            let Mass(m_a) = &mut masses[idx_a];

            if *m_a <= 0.0 {
                continue;
            }

            *vx_a = 0f32;
            *vy_a = 0f32;

            for body in previous.iter() {
                if body.id == ids[idx_a] || body.mass < 0.00001 {
                    continue;
                }

                let Position(x_b, y_b) = body.position;
                let dx = x_b - x_a;
                let dy = y_b - y_a;
                let r2 = dx * dx + dy * dy;

                // Bodies are overlapped!
                if r2 < 0.0005 {
                    *m_a = 0.0;
                    continue;
                }

                let a = (G * body.mass) / r2;
                let r = r2.sqrt();
                *vx_a += TIME_STEP * ((dx * a) / r);
                *vy_a += TIME_STEP * ((dy * a) / r);
            }
        }

        Ok(())
    })
}

fn apply_velocity(world: &World, query: &Query) -> chunkstore::Result<()> {
    world.par_for_each(query, |chunk| {
        let velocities = chunk.read::<Velocity>()?;
        let mut positions = chunk.write::<Position>()?;

        for (Position(x, y), Velocity(vx, vy)) in positions.iter_mut().zip(velocities.iter()) {
            *x += TIME_STEP * vx;
            *y += TIME_STEP * vy;
        }

        Ok(())
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut world = World::new();
    let body = spec!(Position, Velocity, Mass)?;

    // Populate world!
    {
        const SQRT_NUM_ENTITIES: usize = 2;
        const SCALE: f32 = 2.0 / ((SQRT_NUM_ENTITIES - 1) as f32);

        let entities = world.create_entities_filled(
            &body,
            SQRT_NUM_ENTITIES * SQRT_NUM_ENTITIES,
            Mass(0.00001),
        )?;
        for (idx, entity) in entities.into_iter().enumerate() {
            let x = ((idx / SQRT_NUM_ENTITIES) as f32 * SCALE) - 1.0;
            let y = ((idx % SQRT_NUM_ENTITIES) as f32 * SCALE) - 1.0;

            world.set_component(entity, Position(x, y))?;
            world.set_component(entity, Velocity(y * 0.003, -x * 0.003))?;
        }
    }

    let acceleration = Query::builder()
        .read::<Position>()
        .write::<Velocity>()
        .write::<Mass>()
        .build()?;
    let motion = Query::builder().read::<Velocity>().write::<Position>().build()?;

    const SIZE: (i32, i32) = (500, 500);
    const OFFSET: (f32, f32) = (250.0, 250.0);
    const SCALE: (f32, f32) = (200.0, 200.0);
    const NUM_ITER: usize = 100;

    let mut dest = std::io::stdout();
    let mut last_positions = HashMap::new();

    writeln!(&mut dest, "<?xml version=\"1.0\" standalone=\"no\"?>")?;
    writeln!(
        &mut dest,
        "<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.0//EN\" \"{}\">",
        "http://www.w3.org/TR/2001/REC-SVG-20010904/DTD/svg10.dtd"
    )?;
    write!(
        &mut dest,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" height=\"{}\" width=\"{}\">",
        SIZE.0, SIZE.1
    )?;
    write!(&mut dest, "<rect width=\"100%\" height=\"100%\" fill=\"black\"/>")?;

    for _ in 0..NUM_ITER {
        for _ in 0..10usize {
            apply_acceleration(&world, &acceleration)?;
            apply_velocity(&world, &motion)?;
        }

        // Render result!
        for projection in world.project::<(ColumnRef<Position>, ColumnRef<Velocity>)>()? {
            let projection = projection?;
            let (positions, velocities) = &projection.columns;

            for (idx, id) in projection.entities.iter().enumerate() {
                let Position(x, y) = positions[idx];
                let Velocity(vx, vy) = velocities[idx];
                let v2 = (vx * vx + vy * vy).sqrt();
                let a = 1.0 - (v2 / 0.03).clamp(0.0, 0.7);

                if let Some((lx, ly)) = last_positions.get(id) {
                    let x1 = lx * SCALE.0 + OFFSET.0;
                    let y1 = ly * SCALE.1 + OFFSET.1;
                    let x2 = x * SCALE.0 + OFFSET.0;
                    let y2 = y * SCALE.1 + OFFSET.1;

                    write!(
                        &mut dest,
                        concat!(
                            "<line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" ",
                            "style=\"stroke:rgba(255,0,0,{});stroke-width:1\" />"
                        ),
                        x1,
                        y1,
                        x2,
                        y2,
                        a
                    )?;
                }

                last_positions.insert(*id, (x, y));
            }
        }
    }

    write!(&mut dest, "</svg>")?;
    Ok(())
}

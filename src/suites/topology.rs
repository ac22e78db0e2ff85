//! Primitive topology conformance suite.
//!
//! Draws a primitive using 6 vertices under each topology and probes the
//! framebuffer: a covered probe pixel must be solid green, an uncovered
//! one must keep the transparent-black clear value. The vertex zig-zag is
//! the same for every topology, so each topology has its own set of
//! covered and uncovered probe locations (vertices for points, segment
//! midpoints for lines, centroids for triangles). Strip topologies
//! additionally restart between the third and fourth vertex when
//! primitive restart is enabled, which moves probes between the sets.

use crate::device::{
    BufferUsage, ColorAttachment, ColorTargetState, CommandEncoder, FragmentState, IndexFormat,
    PrimitiveState, PrimitiveTopology, RenderPassDescriptor, RenderPipelineDescriptor,
    ShaderModule, TextureDescriptor, TextureFormat, TextureUsage, VertexState,
};
use crate::error::Result;
use crate::fixture::Fixture;
use crate::group::TestGroup;
use crate::params::{params, Fragment, ParamValue};

const RT_SIZE: u32 = 56;
const DEFAULT_DRAW_COUNT: u32 = 6;
const VALID_PIXEL: [u8; 4] = [0x00, 0xff, 0x00, 0xff]; // green
const INVALID_PIXEL: [u8; 4] = [0x00, 0x00, 0x00, 0x00]; // cleared

const VERTEX_SHADER: &str = r#"
@vertex fn main(@location(0) pos : vec4<f32>) -> @builtin(position) vec4<f32> {
    return pos;
}
"#;

const FRAGMENT_SHADER: &str = r#"
struct Uniform { color: vec4<f32> };
@group(0) @binding(0) var<uniform> u : Uniform;

@fragment fn main() -> @location(0) vec4<f32> {
    return u.color;
}
"#;

// ---------------------------------------------------------------------------
// Probe geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Point {
    x: f64,
    y: f64,
}

impl Point {
    const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Framebuffer coordinate to NDC, placing the vertex at the pixel
    /// center. NDC is y-up, so the y mapping negates.
    fn to_ndc(self) -> [f64; 2] {
        [
            (2.0 * (self.x + 0.5)) / RT_SIZE as f64 - 1.0,
            (-2.0 * (self.y + 0.5)) / RT_SIZE as f64 + 1.0,
        ]
    }

    fn midpoint(a: Point, b: Point) -> Point {
        Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }

    fn centroid(a: Point, b: Point, c: Point) -> Point {
        Point::new((a.x + b.x + c.x) / 3.0, (a.y + b.y + c.y) / 3.0)
    }
}

/// The shared vertex zig-zag: odd vertices on the bottom row, even on top.
const VERTEX_LOCATIONS: [Point; 6] = [
    Point::new(8.0, 24.0),  // v1
    Point::new(16.0, 8.0),  // v2
    Point::new(24.0, 24.0), // v3
    Point::new(32.0, 8.0),  // v4
    Point::new(40.0, 24.0), // v5
    Point::new(48.0, 8.0),  // v6
];

#[derive(Debug, Clone, Copy)]
struct Probe {
    location: Point,
    color: [u8; 4],
}

fn probes_at(points: impl IntoIterator<Item = Point>, color: [u8; 4]) -> Vec<Probe> {
    points
        .into_iter()
        .map(|location| Probe { location, color })
        .collect()
}

/// Every vertex location.
fn point_probes(color: [u8; 4]) -> Vec<Probe> {
    probes_at(VERTEX_LOCATIONS, color)
}

/// Midpoints of the three line-list segments {v1,v2}, {v3,v4}, {v5,v6}.
fn line_probes(color: [u8; 4]) -> Vec<Probe> {
    let v = &VERTEX_LOCATIONS;
    probes_at(
        [
            Point::midpoint(v[0], v[1]),
            Point::midpoint(v[2], v[3]),
            Point::midpoint(v[4], v[5]),
        ],
        color,
    )
}

/// Midpoints of the two segments surviving a strip restart: {v1,v2}, {v5,v6}.
fn restart_line_probes(color: [u8; 4]) -> Vec<Probe> {
    let v = &VERTEX_LOCATIONS;
    probes_at(
        [Point::midpoint(v[0], v[1]), Point::midpoint(v[4], v[5])],
        color,
    )
}

/// Midpoints of the strip-only segments {v2,v3}, {v4,v5}.
fn line_strip_probes(color: [u8; 4]) -> Vec<Probe> {
    let v = &VERTEX_LOCATIONS;
    probes_at(
        [Point::midpoint(v[1], v[2]), Point::midpoint(v[3], v[4])],
        color,
    )
}

/// Centroids of the two list triangles {v1,v2,v3}, {v4,v5,v6}.
fn triangle_list_probes(color: [u8; 4]) -> Vec<Probe> {
    let v = &VERTEX_LOCATIONS;
    probes_at(
        [
            Point::centroid(v[0], v[1], v[2]),
            Point::centroid(v[3], v[4], v[5]),
        ],
        color,
    )
}

/// Centroids of the strip-only triangles {v2,v3,v4}, {v3,v4,v5}.
fn triangle_strip_probes(color: [u8; 4]) -> Vec<Probe> {
    let v = &VERTEX_LOCATIONS;
    probes_at(
        [
            Point::centroid(v[1], v[2], v[3]),
            Point::centroid(v[2], v[3], v[4]),
        ],
        color,
    )
}

fn invalidate_last(mut probes: Vec<Probe>) -> Vec<Probe> {
    if let Some(last) = probes.last_mut() {
        last.color = INVALID_PIXEL;
    }
    probes
}

/// Covered and uncovered probe locations for one drawn topology.
fn default_probes(
    topology: PrimitiveTopology,
    primitive_restart: bool,
    invalidate_last_in_list: bool,
) -> Vec<Probe> {
    let maybe_invalidate = |probes: Vec<Probe>| {
        if invalidate_last_in_list {
            invalidate_last(probes)
        } else {
            probes
        }
    };

    let mut probes = Vec::new();
    match topology {
        PrimitiveTopology::PointList => {
            probes.extend(point_probes(VALID_PIXEL));
            probes.extend(line_strip_probes(INVALID_PIXEL));
            probes.extend(triangle_list_probes(INVALID_PIXEL));
            probes.extend(triangle_strip_probes(INVALID_PIXEL));
        }
        PrimitiveTopology::LineList => {
            probes.extend(maybe_invalidate(line_probes(VALID_PIXEL)));
            probes.extend(line_strip_probes(INVALID_PIXEL));
            probes.extend(triangle_list_probes(INVALID_PIXEL));
            probes.extend(triangle_strip_probes(INVALID_PIXEL));
        }
        PrimitiveTopology::LineStrip => {
            if primitive_restart {
                probes.extend(restart_line_probes(VALID_PIXEL));
                // The restarted segment {v3, v4} must not be drawn.
                let v = &VERTEX_LOCATIONS;
                probes.extend(probes_at([Point::midpoint(v[2], v[3])], INVALID_PIXEL));
            } else {
                probes.extend(line_probes(VALID_PIXEL));
            }
            probes.extend(line_strip_probes(VALID_PIXEL));
            probes.extend(triangle_list_probes(INVALID_PIXEL));
            probes.extend(triangle_strip_probes(INVALID_PIXEL));
        }
        PrimitiveTopology::TriangleList => {
            probes.extend(maybe_invalidate(triangle_list_probes(VALID_PIXEL)));
            probes.extend(triangle_strip_probes(INVALID_PIXEL));
        }
        PrimitiveTopology::TriangleStrip => {
            probes.extend(triangle_list_probes(VALID_PIXEL));
            probes.extend(triangle_strip_probes(if primitive_restart {
                INVALID_PIXEL
            } else {
                VALID_PIXEL
            }));
        }
    }
    probes
}

// ---------------------------------------------------------------------------
// Test group
// ---------------------------------------------------------------------------

/// Build the primitive topology test group.
pub fn test_group() -> TestGroup {
    let mut g = TestGroup::new("primitive_topology");

    g.test("basic")
        .desc(
            "Draw 6 vertices under each topology and probe covered and\n\
             uncovered pixels. A covered probe reads solid green, an\n\
             uncovered one keeps the clear value. Primitive restart splits\n\
             strips between v3 and v4 and is always false for non-strip\n\
             topologies.\n\
             \n\
             Params:\n\
               - topology= {...all topologies}\n\
               - indirect= {true, false}\n\
               - primitiveRestart= {true, false}",
        )
        .cases(
            params()
                .combine(
                    "topology",
                    PrimitiveTopology::ALL.iter().map(|t| t.to_string()),
                )
                .toggle("indirect")
                .toggle("primitiveRestart")
                .unless(|p| {
                    let topology: PrimitiveTopology = p.str("topology")?.parse()?;
                    Ok(p.bool("primitiveRestart")? && !topology.is_strip())
                }),
        )
        .run(|t| {
            let topology: PrimitiveTopology = t.params().str("topology")?.parse()?;
            let indirect = t.params().bool("indirect")?;
            let primitive_restart = t.params().bool("primitiveRestart")?;
            let probes = default_probes(topology, primitive_restart, false);
            run_topology_case(
                t,
                topology,
                indirect,
                primitive_restart,
                DEFAULT_DRAW_COUNT,
                &probes,
            )
        });

    g.test("unaligned_vertex_count")
        .desc(
            "Drawing a vertex count that is not a multiple of the list\n\
             topology's primitive size is not an error; the trailing\n\
             partial primitive is simply not drawn.\n\
             \n\
             Params:\n\
               - topology= {line-list, triangle-list}\n\
               - indirect= {true, false}\n\
               - drawCount - one smaller for line-list, one or two smaller\n\
                 for triangle-list",
        )
        .cases(
            params()
                .combine("topology", ["line-list", "triangle-list"])
                .toggle("indirect")
                .expand(|p| {
                    let counts: Vec<i64> = match p.str("topology")? {
                        "line-list" => vec![DEFAULT_DRAW_COUNT as i64 - 1],
                        _ => vec![DEFAULT_DRAW_COUNT as i64 - 1, DEFAULT_DRAW_COUNT as i64 - 2],
                    };
                    Ok(counts.into_iter().map(|count| -> Fragment {
                        vec![("drawCount".to_string(), ParamValue::Int(count))]
                    }))
                }),
        )
        .run(|t| {
            let topology: PrimitiveTopology = t.params().str("topology")?.parse()?;
            let indirect = t.params().bool("indirect")?;
            let draw_count = t.params().int("drawCount")? as u32;
            let probes = default_probes(topology, false, true);
            run_topology_case(t, topology, indirect, false, draw_count, &probes)
        });

    g
}

// ---------------------------------------------------------------------------
// Case body
// ---------------------------------------------------------------------------

fn run_topology_case(
    t: &mut Fixture,
    topology: PrimitiveTopology,
    indirect: bool,
    primitive_restart: bool,
    draw_count: u32,
    probes: &[Probe],
) -> Result<()> {
    let target = t.create_texture(&TextureDescriptor {
        format: TextureFormat::Rgba8Unorm,
        width: RT_SIZE,
        height: RT_SIZE,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
    })?;

    let pipeline = t.create_render_pipeline(RenderPipelineDescriptor {
        vertex: VertexState {
            module: ShaderModule {
                source: VERTEX_SHADER.to_string(),
                entry_point: "main".to_string(),
            },
        },
        fragment: FragmentState {
            module: ShaderModule {
                source: FRAGMENT_SHADER.to_string(),
                entry_point: "main".to_string(),
            },
            targets: vec![ColorTargetState {
                format: TextureFormat::Rgba8Unorm,
                blend: None,
            }],
        },
        primitive: PrimitiveState {
            topology,
            strip_index_format: topology.is_strip().then_some(IndexFormat::Uint32),
        },
    })?;

    let mut vertex_data = Vec::with_capacity(VERTEX_LOCATIONS.len() * 4);
    for location in VERTEX_LOCATIONS {
        let ndc = location.to_ndc();
        vertex_data.extend_from_slice(&[ndc[0] as f32, ndc[1] as f32, 0.0, 1.0]);
    }
    let vertex_buffer = t.create_buffer_with_f32(&vertex_data, BufferUsage::VERTEX)?;
    let uniform = t.create_buffer_with_f32(&[0.0, 1.0, 0.0, 1.0], BufferUsage::UNIFORM)?;

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_render_pass(RenderPassDescriptor {
        color_attachment: ColorAttachment {
            texture: target,
            clear: crate::oracle::Color::TRANSPARENT_BLACK,
        },
    });
    pass.set_pipeline(pipeline);
    pass.set_vertex_buffer(vertex_buffer);
    pass.set_uniform_buffer(uniform);

    if primitive_restart {
        // Restart the strip between [v3, <restart>, v4].
        let index_buffer = t.create_buffer_with_u32(
            &[0, 1, 2, u32::MAX, 3, 4, 5],
            BufferUsage::INDEX,
        )?;
        pass.set_index_buffer(index_buffer, IndexFormat::Uint32);
        if indirect {
            let args = t.create_buffer_with_u32(
                &[draw_count + 1, 1, 0, 0, 0],
                BufferUsage::INDIRECT,
            )?;
            pass.draw_indexed_indirect(args, 0);
        } else {
            pass.draw_indexed(draw_count + 1); // extra index for restart
        }
    } else if indirect {
        let args = t.create_buffer_with_u32(&[draw_count, 1, 0, 0], BufferUsage::INDIRECT)?;
        pass.draw_indirect(args, 0);
    } else {
        pass.draw(draw_count);
    }
    pass.end();
    t.submit(encoder)?;

    for probe in probes {
        t.expect_single_pixel(
            target,
            probe.location.x.floor() as u32,
            probe.location.y.floor() as u32,
            &probe.color,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_case_enumeration() {
        // 5 topologies x 2 x 2 minus restart on the three non-strips.
        let g = test_group();
        let ids: Vec<String> = g
            .enumerate()
            .unwrap()
            .into_iter()
            .filter(|c| c.test == "basic")
            .map(|c| c.id)
            .collect();
        assert_eq!(ids.len(), 5 * 2 * 2 - 3 * 2);
        assert!(ids.contains(&"topology=line-strip;indirect=true;primitiveRestart=true".to_string()));
        assert!(!ids.contains(&"topology=point-list;indirect=false;primitiveRestart=true".to_string()));
    }

    #[test]
    fn test_unaligned_counts_depend_on_topology() {
        let g = test_group();
        let cases: Vec<_> = g
            .enumerate()
            .unwrap()
            .into_iter()
            .filter(|c| c.test == "unaligned_vertex_count")
            .collect();
        // line-list: one count x 2 indirect; triangle-list: two counts x 2.
        assert_eq!(cases.len(), 2 + 4);
        for case in &cases {
            let count = case.params.int("drawCount").unwrap();
            match case.params.str("topology").unwrap() {
                "line-list" => assert_eq!(count, 5),
                _ => assert!(count == 5 || count == 4),
            }
        }
    }

    #[test]
    fn test_probe_sets_are_disjoint_by_color() {
        // A strip draw with restart must not cover the restarted segment.
        let probes = default_probes(PrimitiveTopology::LineStrip, true, false);
        let invalid: Vec<_> = probes.iter().filter(|p| p.color == INVALID_PIXEL).collect();
        assert!(!invalid.is_empty());
        // Without restart every line probe is valid.
        let probes = default_probes(PrimitiveTopology::LineStrip, false, false);
        let line_probe_count = probes.iter().filter(|p| p.color == VALID_PIXEL).count();
        assert_eq!(line_probe_count, 5);
    }
}

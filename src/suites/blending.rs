//! Blending conformance suite.
//!
//! Renders a single pixel through every combination of blend component,
//! source factor, destination factor, and operation, then checks the
//! device's result against the reference oracle within a small tolerance.
//! The rgba32float target avoids clamping behavior, which the placeholder
//! tests below leave for later.

use crate::device::{
    BlendComponent, BlendState, BufferUsage, ColorAttachment, ColorTargetState, CommandEncoder,
    FragmentState, PrimitiveState, PrimitiveTopology, RenderPassDescriptor,
    RenderPipelineDescriptor, ShaderModule, TextureDescriptor, TextureFormat, TextureUsage,
    VertexState,
};
use crate::error::{Error, Result};
use crate::fixture::Fixture;
use crate::group::TestGroup;
use crate::oracle::{
    compute_blend_factor, compute_blend_operation, BlendFactor, BlendOperation, Color,
};
use crate::params::{params, ParamValue};

const TOLERANCE: f64 = 0.0001;

const VERTEX_SHADER: &str = r#"
@vertex fn main() -> @builtin(position) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}
"#;

const FRAGMENT_SHADER: &str = r#"
struct Uniform { color: vec4<f32> };
@group(0) @binding(0) var<uniform> u : Uniform;

@fragment fn main() -> @location(0) vec4<f32> {
    return u.color;
}
"#;

/// Build the blending test group.
pub fn test_group() -> TestGroup {
    let mut g = TestGroup::new("blending");

    g.test("blend_component")
        .desc(
            "Test all combinations of parameters for one blend component.\n\
             \n\
             Blends a single pixel and checks the result against the\n\
             reference computation. The component under test (color or\n\
             alpha) gets the case's factors and operation; the other\n\
             component keeps the passthrough default.\n\
             \n\
             Params:\n\
               - component= {color, alpha}\n\
               - srcFactor= {...all blend factors}\n\
               - dstFactor= {...all blend factors}\n\
               - operation= {...all blend operations}",
        )
        .cases(
            params()
                .combine("component", ["color", "alpha"])
                .combine("srcFactor", BlendFactor::ALL.iter().map(|f| f.to_string()))
                .combine("dstFactor", BlendFactor::ALL.iter().map(|f| f.to_string()))
                .combine("operation", BlendOperation::ALL.iter().map(|o| o.to_string()))
                .subcases(|p| {
                    let src: BlendFactor = p.str("srcFactor")?.parse()?;
                    let dst: BlendFactor = p.str("dstFactor")?.parse()?;
                    let constants: Vec<ParamValue> = if src.uses_constant() || dst.uses_constant()
                    {
                        vec![Color::new(0.91, 0.82, 0.73, 0.64).into()]
                    } else {
                        vec![ParamValue::Absent]
                    };
                    Ok(params()
                        .combine("srcColor", [Color::new(0.11, 0.61, 0.81, 0.44)])
                        .combine(
                            "dstColor",
                            [
                                Color::new(0.51, 0.22, 0.71, 0.33),
                                Color::new(0.09, 0.73, 0.93, 0.81),
                            ],
                        )
                        .combine("blendConstant", constants))
                }),
        )
        .run(blend_component_case);

    g.test("formats")
        .desc(
            "Test that blending applies for every format that supports it and\n\
             is not applied for formats that do not, in linear space for srgb.",
        )
        .unimplemented();

    g.test("multiple_color_attachments")
        .desc("Test that with multiple color attachments, 'src-color' refers to attachment 0.")
        .unimplemented();

    g.test("clamping")
        .desc(
            "For fixed-point formats, test that the blend factor, blend\n\
             constant, and blend result are clamped in the blend equation.",
        )
        .unimplemented();

    g
}

fn blend_component_case(t: &mut Fixture) -> Result<()> {
    let component = t.params().str("component")?.to_string();
    let src_factor: BlendFactor = t.params().str("srcFactor")?.parse()?;
    let dst_factor: BlendFactor = t.params().str("dstFactor")?.parse()?;
    let operation: BlendOperation = t.params().str("operation")?.parse()?;
    let src_color = t.params().color("srcColor")?;
    let dst_color = t.params().color("dstColor")?;
    let blend_constant = t.params().opt_color("blendConstant")?;

    // Ground truth from the oracle. The untested component passes the
    // source value through, so expected alpha (or rgb) comes from src.
    let sf = compute_blend_factor(src_color, dst_color, blend_constant, src_factor)?;
    let df = compute_blend_factor(src_color, dst_color, blend_constant, dst_factor)?;
    let mut expected = compute_blend_operation(src_color, sf, dst_color, df, operation);
    match component.as_str() {
        "color" => expected.a = src_color.a,
        "alpha" => {
            expected.r = src_color.r;
            expected.g = src_color.g;
            expected.b = src_color.b;
        }
        other => return Err(Error::usage(format!("unknown blend component '{}'", other))),
    }

    let tested = BlendComponent {
        src_factor,
        dst_factor,
        operation,
    };
    let blend = match component.as_str() {
        "color" => BlendState {
            color: tested,
            alpha: BlendComponent::default(),
        },
        _ => BlendState {
            color: BlendComponent::default(),
            alpha: tested,
        },
    };

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
                format: TextureFormat::Rgba32Float,
                blend: Some(blend),
            }],
        },
        primitive: PrimitiveState {
            topology: PrimitiveTopology::PointList,
            strip_index_format: None,
        },
    })?;

    let target = t.create_texture(&TextureDescriptor {
        format: TextureFormat::Rgba32Float,
        width: 1,
        height: 1,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
    })?;
    let uniform = t.create_buffer_with_f32(&src_color.to_f32_array(), BufferUsage::UNIFORM)?;

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_render_pass(RenderPassDescriptor {
        color_attachment: ColorAttachment {
            texture: target,
            clear: dst_color,
        },
    });
    pass.set_pipeline(pipeline);
    pass.set_uniform_buffer(uniform);
    if let Some(constant) = blend_constant {
        pass.set_blend_constant(constant);
    }
    pass.draw(1);
    pass.end();
    t.submit(encoder)?;

    let low = expected.map(|v| v - TOLERANCE).to_array();
    let high = expected.map(|v| v + TOLERANCE).to_array();
    t.expect_pixel_in_range(target, 0, 0, &low, &high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_count() {
        // 2 components x 13 x 13 factors x 5 operations, each with one
        // src color and two dst colors.
        let g = test_group();
        let cases = g.enumerate().unwrap();
        assert_eq!(cases.len(), 2 * 13 * 13 * 5 * 2);
    }

    #[test]
    fn test_constant_color_cases_carry_a_constant() {
        let g = test_group();
        for case in g.enumerate().unwrap() {
            let src: BlendFactor = case.params.str("srcFactor").unwrap().parse().unwrap();
            let dst: BlendFactor = case.params.str("dstFactor").unwrap().parse().unwrap();
            let constant = case.params.opt_color("blendConstant").unwrap();
            assert_eq!(
                constant.is_some(),
                src.uses_constant() || dst.uses_constant(),
                "case {}",
                case.id
            );
        }
    }
}

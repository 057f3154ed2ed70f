use bytemuck::{Pod, Zeroable};
use mapview_core::DrawQuad;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

impl QuadVertex {
    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: 8,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Four vertices per quad, in draw order. Quad `i` starts at vertex `4 * i`.
pub fn quad_vertices<T>(quads: &[DrawQuad<'_, T>]) -> Vec<QuadVertex> {
    quads
        .iter()
        .flat_map(|quad| quad.corners())
        .map(|corner| QuadVertex {
            position: corner.position.to_array(),
            uv: corner.uv.to_array(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapview_core::{ClipRect, QuadSource, UvRect};

    #[test]
    fn vertices_follow_quad_order() {
        let texture = ();
        let quads = [
            DrawQuad {
                texture: &texture,
                source: QuadSource::Preview,
                clip: ClipRect::FULL,
                uv: UvRect::new(0.1, 0.2, 0.3, 0.4),
            },
            DrawQuad {
                texture: &texture,
                source: QuadSource::Preview,
                clip: ClipRect::new(0.0, 0.5, 0.5, 0.0),
                uv: UvRect::FULL,
            },
        ];
        let vertices = quad_vertices(&quads);
        assert_eq!(vertices.len(), 8);
        let preview_top_left = QuadVertex {
            position: [-1.0, 1.0],
            uv: [0.1, 0.2],
        };
        let tile_bottom_right = QuadVertex {
            position: [0.5, 0.0],
            uv: [1.0, 1.0],
        };
        assert_eq!(vertices[0], preview_top_left);
        assert_eq!(vertices[6], tile_bottom_right);
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 8 * 16);
    }
}

use std::f32::consts::{FRAC_1_PI, PI};

use glam::Vec3;
use image::ImageFormat;

use crate::error::{ViewerError, ViewerResult};

/// Decoded equirectangular radiance map, row 0 at the top (+Y).
#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl EnvironmentMap {
    /// Decode a Radiance `.hdr` file.
    pub fn decode_hdr(bytes: &[u8]) -> ViewerResult<Self> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Hdr)?;
        let rgba = image.to_rgba32f();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(ViewerError::EnvironmentDecode("empty image".to_string()));
        }
        let texels = rgba.pixels().map(|p| p.0).collect();
        Ok(Self { width, height, texels })
    }

    /// Texel coordinates for a world direction. Must agree with `equirect_uv`
    /// in the shader.
    pub fn texel_for_direction(&self, direction: Vec3) -> (u32, u32) {
        let d = direction.normalize_or_zero();
        let u = d.z.atan2(d.x) * (0.5 * FRAC_1_PI) + 0.5;
        let v = d.y.clamp(-1.0, 1.0).asin() * FRAC_1_PI + 0.5;
        let x = (u * self.width as f32).floor().clamp(0.0, (self.width - 1) as f32) as u32;
        let y = ((1.0 - v) * self.height as f32).floor().clamp(0.0, (self.height - 1) as f32) as u32;
        (x, y)
    }

    pub fn sample(&self, direction: Vec3) -> Vec3 {
        let (x, y) = self.texel_for_direction(direction);
        let t = self.texels[(y * self.width + x) as usize];
        Vec3::new(t[0], t[1], t[2])
    }

    /// Solid-angle weighted mean radiance. Used as the diffuse ambient term.
    pub fn average_radiance(&self) -> Vec3 {
        let mut sum = Vec3::ZERO;
        let mut weight = 0.0;
        for y in 0..self.height {
            let latitude = ((y as f32 + 0.5) / self.height as f32 - 0.5) * PI;
            let w = latitude.cos();
            let row = &self.texels[(y * self.width) as usize..((y + 1) * self.width) as usize];
            for t in row {
                sum += Vec3::new(t[0], t[1], t[2]) * w;
            }
            weight += w * self.width as f32;
        }
        if weight > 0.0 {
            sum / weight
        } else {
            Vec3::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::hdr::HdrEncoder;
    use image::Rgb;

    fn encode(width: usize, height: usize, f: impl Fn(usize, usize) -> [f32; 3]) -> Vec<u8> {
        let pixels: Vec<Rgb<f32>> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| Rgb(f(x, y)))
            .collect();
        let mut bytes = Vec::new();
        HdrEncoder::new(&mut bytes).encode(&pixels, width, height).unwrap();
        bytes
    }

    #[test]
    fn decodes_dimensions_and_values() {
        let bytes = encode(8, 4, |_, y| if y < 2 { [4.0, 2.0, 1.0] } else { [0.5, 0.5, 0.5] });
        let map = EnvironmentMap::decode_hdr(&bytes).unwrap();
        assert_eq!((map.width, map.height), (8, 4));
        assert_eq!(map.texels.len(), 32);
        assert!((map.texels[0][0] - 4.0).abs() < 0.05);
        assert_eq!(map.texels[0][3], 1.0);
    }

    #[test]
    fn up_samples_top_row_and_down_samples_bottom_row() {
        let bytes = encode(8, 4, |_, y| if y < 2 { [4.0, 2.0, 1.0] } else { [0.5, 0.5, 0.5] });
        let map = EnvironmentMap::decode_hdr(&bytes).unwrap();
        assert!(map.sample(Vec3::Y).x > 3.0);
        assert!(map.sample(Vec3::NEG_Y).x < 1.0);
        assert_eq!(map.texel_for_direction(Vec3::X), (4, 2));
        assert_eq!(map.texel_for_direction(Vec3::NEG_X).0, 7);
    }

    #[test]
    fn uniform_map_average_equals_value() {
        let bytes = encode(16, 8, |_, _| [1.0, 1.0, 1.0]);
        let map = EnvironmentMap::decode_hdr(&bytes).unwrap();
        assert!((map.average_radiance() - Vec3::ONE).length() < 1e-3);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = EnvironmentMap::decode_hdr(b"definitely not radiance").unwrap_err();
        assert!(matches!(err, ViewerError::EnvironmentDecode(_)));
    }
}

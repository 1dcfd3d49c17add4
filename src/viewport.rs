/// CSS-pixel viewport plus the device pixel ratio used for the backing store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub css_width: f64,
    pub css_height: f64,
    device_pixel_ratio: f64,
    max_pixel_ratio: f64,
}

impl Viewport {
    pub fn new(css_width: f64, css_height: f64, device_pixel_ratio: f64, max_pixel_ratio: f64) -> Self {
        Self { css_width, css_height, device_pixel_ratio, max_pixel_ratio }
    }

    pub fn resize(&mut self, css_width: f64, css_height: f64, device_pixel_ratio: f64) {
        self.css_width = css_width;
        self.css_height = css_height;
        self.device_pixel_ratio = device_pixel_ratio;
    }

    /// Device pixel ratio capped to keep fill rate bounded on dense displays.
    pub fn pixel_ratio(&self) -> f64 {
        if self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio.min(self.max_pixel_ratio)
        } else {
            1.0
        }
    }

    /// Backing-store size in physical pixels, at least 1x1.
    pub fn physical_size(&self) -> (u32, u32) {
        let scale = |css: f64| ((css.max(0.0) * self.pixel_ratio()).floor() as u32).max(1);
        (scale(self.css_width), scale(self.css_height))
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.css_width > 0.0 && self.css_height > 0.0)
    }

    pub fn width(&self) -> f32 {
        self.css_width as f32
    }

    pub fn height(&self) -> f32 {
        self.css_height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_ratio_is_capped() {
        let v = Viewport::new(800.0, 600.0, 3.0, 2.0);
        assert_eq!(v.pixel_ratio(), 2.0);
        assert_eq!(v.physical_size(), (1600, 1200));
    }

    #[test]
    fn low_density_passes_through() {
        let v = Viewport::new(801.0, 601.0, 1.5, 2.0);
        assert_eq!(v.physical_size(), (1201, 901));
    }

    #[test]
    fn zero_size_is_degenerate_but_backing_store_stays_valid() {
        let mut v = Viewport::new(800.0, 600.0, 1.0, 2.0);
        v.resize(0.0, 600.0, 1.0);
        assert!(v.is_degenerate());
        assert_eq!(v.physical_size(), (1, 600));
    }

    #[test]
    fn bogus_device_ratio_falls_back_to_one() {
        let v = Viewport::new(100.0, 100.0, f64::NAN, 2.0);
        assert_eq!(v.pixel_ratio(), 1.0);
    }
}

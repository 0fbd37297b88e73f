/// Borrowed row-major 8-bit grayscale buffer.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // len = width * height
}

impl GrayImageView<'_> {
    #[inline]
    fn at_clamped(&self, x: i64, y: i64) -> f32 {
        let xi = x.clamp(0, self.width as i64 - 1) as usize;
        let yi = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[yi * self.width + xi] as f32
    }
}

/// Borrow an `image::GrayImage` as a [`GrayImageView`].
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Bilinear intensity at a sub-pixel location. Coordinates outside the
/// image replicate the nearest border pixel; an empty view samples as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    if src.width == 0 || src.height == 0 {
        return 0.0;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (xi, yi) = (x0 as i64, y0 as i64);

    let p00 = src.at_clamped(xi, yi);
    let p10 = src.at_clamped(xi + 1, yi);
    let p01 = src.at_clamped(xi, yi + 1);
    let p11 = src.at_clamped(xi + 1, yi + 1);

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_between_pixels() {
        let data = [0u8, 100, 200, 50];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(sample_bilinear(&view, 0.0, 0.0), 0.0);
        assert_eq!(sample_bilinear(&view, 0.5, 0.0), 50.0);
        assert_eq!(sample_bilinear(&view, 0.5, 0.5), 87.5);
    }

    #[test]
    fn replicates_borders() {
        let data = [10u8, 20, 30, 40];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(sample_bilinear(&view, -3.0, -3.0), 10.0);
        assert_eq!(sample_bilinear(&view, 5.0, 5.0), 40.0);
    }

    #[test]
    fn view_of_image_buffer() {
        let img = ::image::GrayImage::from_pixel(3, 2, ::image::Luma([7]));
        let view = gray_view(&img);
        assert_eq!((view.width, view.height, view.data.len()), (3, 2, 6));
    }
}

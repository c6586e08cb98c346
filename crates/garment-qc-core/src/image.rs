#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height],
        }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.width + x] = v;
    }
}

impl GrayImageView<'_> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Copy a sub-rectangle into an owned image. The rectangle is clamped to
    /// the source bounds; returns `None` when the clamped region is empty.
    pub fn crop(&self, x0: i32, y0: i32, w: usize, h: usize) -> Option<GrayImage> {
        let x0 = x0.max(0) as usize;
        let y0 = y0.max(0) as usize;
        let x1 = (x0 + w).min(self.width);
        let y1 = (y0 + h).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let (cw, ch) = (x1 - x0, y1 - y0);
        let mut out = GrayImage::new(cw, ch);
        for y in 0..ch {
            let src = (y0 + y) * self.width + x0;
            out.data[y * cw..(y + 1) * cw].copy_from_slice(&self.data[src..src + cw]);
        }
        Some(out)
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}

/// Factor that brings the longer image side down to `cap` pixels, or 1.0 when
/// the image already fits.
pub fn downscale_factor_to_cap(width: usize, height: usize, cap: usize) -> f32 {
    let longer = width.max(height);
    if longer <= cap || longer == 0 {
        1.0
    } else {
        cap as f32 / longer as f32
    }
}

/// Resample by an arbitrary factor with bilinear interpolation.
///
/// Factors below 1 shrink the image. Output dimensions are rounded and kept
/// at least 1x1.
pub fn resample_bilinear(src: &GrayImageView<'_>, factor: f32) -> GrayImage {
    let out_w = ((src.width as f32 * factor).round() as usize).max(1);
    let out_h = ((src.height as f32 * factor).round() as usize).max(1);
    let inv = 1.0 / factor;
    let mut out = GrayImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let sx = (x as f32 + 0.5) * inv - 0.5;
            let sy = (y as f32 + 0.5) * inv - 0.5;
            out.data[y * out_w + x] = sample_bilinear_u8(src, sx, sy);
        }
    }
    out
}

/// Summed-area table; `sums[(y+1)*(w+1) + (x+1)]` holds the inclusive prefix
/// sum over the rectangle (0,0)..=(x,y).
#[derive(Clone, Debug)]
pub struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub fn build(src: &GrayImageView<'_>) -> Self {
        let (w, h) = (src.width, src.height);
        let mut sums = vec![0u64; (w + 1) * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += src.data[y * w + x] as u64;
                sums[(y + 1) * (w + 1) + (x + 1)] = sums[y * (w + 1) + (x + 1)] + row;
            }
        }
        Self {
            width: w,
            height: h,
            sums,
        }
    }

    /// Sum of pixels over the half-open rectangle [x0,x1) x [y0,y1), clamped
    /// to image bounds.
    pub fn rect_sum(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> u64 {
        let x0 = x0.clamp(0, self.width as i32) as usize;
        let y0 = y0.clamp(0, self.height as i32) as usize;
        let x1 = x1.clamp(0, self.width as i32) as usize;
        let y1 = y1.clamp(0, self.height as i32) as usize;
        if x1 <= x0 || y1 <= y0 {
            return 0;
        }
        let w1 = self.width + 1;
        self.sums[y1 * w1 + x1] + self.sums[y0 * w1 + x0]
            - self.sums[y0 * w1 + x1]
            - self.sums[y1 * w1 + x0]
    }

    /// Mean intensity over the half-open rectangle, or 0 for empty regions.
    pub fn rect_mean(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> f32 {
        let x0c = x0.clamp(0, self.width as i32);
        let y0c = y0.clamp(0, self.height as i32);
        let x1c = x1.clamp(0, self.width as i32);
        let y1c = y1.clamp(0, self.height as i32);
        let area = ((x1c - x0c).max(0) * (y1c - y0c).max(0)) as f32;
        if area == 0.0 {
            return 0.0;
        }
        self.rect_sum(x0, y0, x1, y1) as f32 / area
    }
}

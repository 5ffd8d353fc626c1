/// Owned CPU-side RGBA8 pixel buffer. All drawing and filter passes operate
/// on these; the final one is blitted to the window surface.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self, color: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }
    }

    pub fn sample(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let index = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[index],
            self.pixels[index + 1],
            self.pixels[index + 2],
            self.pixels[index + 3],
        ]
    }

    pub fn put(&mut self, x: u32, y: u32, color: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = ((y * self.width + x) * 4) as usize;
        self.pixels[index..index + 4].copy_from_slice(&color);
    }

    /// Source-over blend of `color` onto the pixel at (x, y).
    pub fn blend(&mut self, x: u32, y: u32, color: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let alpha = color[3] as u32;
        if alpha == 0 {
            return;
        }
        if alpha == 255 {
            self.put(x, y, color);
            return;
        }
        let index = ((y * self.width + x) * 4) as usize;
        let inverse = 255 - alpha;
        for channel in 0..3 {
            let src = color[channel] as u32;
            let dst = self.pixels[index + channel] as u32;
            self.pixels[index + channel] = ((src * alpha + dst * inverse + 127) / 255) as u8;
        }
        let dst_alpha = self.pixels[index + 3] as u32;
        self.pixels[index + 3] = (alpha + (dst_alpha * inverse + 127) / 255).min(255) as u8;
    }
}

use crate::app::rendering::target::RenderTarget;

/// Frame-level parameters a filter pass may consult.
#[derive(Debug, Clone, Copy)]
pub struct FrameSetup {
    pub width: u32,
    pub height: u32,
}

/// Full-frame post-processing step. Multi-pass filters read the previous
/// pass's output; passes ping-pong between two targets so no pass reads its
/// own destination. The setup is shared down the chain; a pass may shrink
/// its dimensions and later passes see the change.
pub trait Filter: Send {
    fn pass_count(&self) -> u32 {
        1
    }

    fn apply_pass(
        &self,
        pass: u32,
        src: &RenderTarget,
        dst: &mut RenderTarget,
        setup: &mut FrameSetup,
    );
}

/// Luma-weighted grayscale, single pass.
pub struct GrayscaleFilter;

impl Filter for GrayscaleFilter {
    fn apply_pass(
        &self,
        _pass: u32,
        src: &RenderTarget,
        dst: &mut RenderTarget,
        setup: &mut FrameSetup,
    ) {
        for y in 0..setup.height {
            for x in 0..setup.width {
                let [r, g, b, a] = src.sample(x, y);
                let luma =
                    (r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8;
                let luma = luma.min(255) as u8;
                dst.put(x, y, [luma, luma, luma, a]);
            }
        }
    }
}

/// Separable box blur: pass 0 horizontal, pass 1 vertical.
pub struct BoxBlurFilter {
    radius: u32,
}

impl BoxBlurFilter {
    pub fn new(radius: u32) -> Self {
        Self {
            radius: radius.max(1),
        }
    }
}

impl Filter for BoxBlurFilter {
    fn pass_count(&self) -> u32 {
        2
    }

    fn apply_pass(
        &self,
        pass: u32,
        src: &RenderTarget,
        dst: &mut RenderTarget,
        setup: &mut FrameSetup,
    ) {
        let radius = self.radius as i64;
        for y in 0..setup.height {
            for x in 0..setup.width {
                let mut sum = [0u32; 4];
                let mut count = 0u32;
                for offset in -radius..=radius {
                    let (sx, sy) = if pass == 0 {
                        (x as i64 + offset, y as i64)
                    } else {
                        (x as i64, y as i64 + offset)
                    };
                    if sx < 0 || sy < 0 || sx >= setup.width as i64 || sy >= setup.height as i64 {
                        continue;
                    }
                    let texel = src.sample(sx as u32, sy as u32);
                    for channel in 0..4 {
                        sum[channel] += texel[channel] as u32;
                    }
                    count += 1;
                }
                let averaged = [
                    (sum[0] / count) as u8,
                    (sum[1] / count) as u8,
                    (sum[2] / count) as u8,
                    (sum[3] / count) as u8,
                ];
                dst.put(x, y, averaged);
            }
        }
    }
}

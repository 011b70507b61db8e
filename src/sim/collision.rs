// user-painted static obstacles, one bit per window pixel
use glam::IVec2;

/// Packed 1-bpp bitmap. Rows are stored bottom-up so that row 0 is the
/// lowest world row, matching how the integration pass samples it.
#[derive(Clone, Debug)]
pub struct CollisionMap {
    width: u32,
    height: u32,
    bits: Vec<u8>,
    dirty: bool,
}

impl CollisionMap {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = Self::stride_for(width);
        Self {
            width,
            height,
            bits: vec![0; stride * height as usize],
            dirty: true,
        }
    }

    #[inline]
    fn stride_for(width: u32) -> usize {
        (width as usize + 7) / 8
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per bitmap row.
    pub fn stride(&self) -> usize {
        Self::stride_for(self.width)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Reallocates cleared when the size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        *self = Self::new(width, height);
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.dirty = true;
    }

    // (x, row) in bitmap space, row 0 at the bottom
    pub fn set_pixel(&mut self, x: u32, row: u32, solid: bool) {
        if x >= self.width || row >= self.height {
            return;
        }
        let flat = row as usize * self.stride() + (x / 8) as usize;
        let mask = 1u8 << (x & 7);
        if solid {
            self.bits[flat] |= mask;
        } else {
            self.bits[flat] &= !mask;
        }
        self.dirty = true;
    }

    pub fn pixel(&self, x: u32, row: u32) -> bool {
        if x >= self.width || row >= self.height {
            return false;
        }
        let flat = row as usize * self.stride() + (x / 8) as usize;
        self.bits[flat] & (1u8 << (x & 7)) != 0
    }

    /// Fills (or clears) a `size` rectangle centred on `center`, given in
    /// window pixels with y pointing down. Clipped to the map.
    pub fn paint_rect(&mut self, center: IVec2, size: IVec2, solid: bool) {
        let min = center - size / 2;
        let max = min + size;

        let x0 = min.x.clamp(0, self.width as i32);
        let x1 = max.x.clamp(0, self.width as i32);
        let y0 = min.y.clamp(0, self.height as i32);
        let y1 = max.y.clamp(0, self.height as i32);

        for y in y0..y1 {
            // flip into bitmap rows
            let row = self.height - 1 - y as u32;
            for x in x0..x1 {
                self.set_pixel(x as u32, row, solid);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// The bitmap packed into little-endian words for the device copy, if
    /// it changed since the last call.
    pub fn take_upload(&mut self) -> Option<Vec<u32>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.words())
    }

    pub fn words(&self) -> Vec<u32> {
        // at least one word so the device binding is never empty
        let mut words = vec![0u32; self.bits.len().div_ceil(4).max(1)];
        for (i, byte) in self.bits.iter().enumerate() {
            words[i / 4] |= (*byte as u32) << ((i % 4) * 8);
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_packing_is_row_major_lsb_first() {
        let mut map = CollisionMap::new(20, 4);
        assert_eq!(map.stride(), 3);
        map.set_pixel(9, 2, true);
        assert_eq!(map.bytes()[2 * 3 + 1], 0b10);
        assert!(map.pixel(9, 2));
        map.set_pixel(9, 2, false);
        assert!(!map.pixel(9, 2));
    }

    #[test]
    fn paint_flips_rows() {
        let mut map = CollisionMap::new(16, 10);
        // one pixel at the top-left of the window
        map.paint_rect(IVec2::new(0, 0), IVec2::new(1, 1), true);
        assert!(map.pixel(0, 9));
        assert!(!map.pixel(0, 0));
    }

    #[test]
    fn paint_clips_at_every_edge() {
        let mut map = CollisionMap::new(8, 8);
        map.paint_rect(IVec2::new(0, 0), IVec2::new(4, 4), true);
        map.paint_rect(IVec2::new(8, 8), IVec2::new(4, 4), true);
        let solid: usize = (0..8)
            .flat_map(|x| (0..8).map(move |y| (x, y)))
            .filter(|&(x, y)| map.pixel(x, y))
            .count();
        // two 2x2 corners survive
        assert_eq!(solid, 8);
        assert!(map.pixel(0, 7) && map.pixel(1, 6));
        assert!(map.pixel(7, 0) && map.pixel(6, 1));
    }

    #[test]
    fn erase_clears_painted_pixels() {
        let mut map = CollisionMap::new(32, 32);
        map.paint_rect(IVec2::new(16, 16), IVec2::new(10, 10), true);
        map.paint_rect(IVec2::new(16, 16), IVec2::new(10, 10), false);
        assert!(map.bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn upload_only_when_dirty() {
        let mut map = CollisionMap::new(9, 2);
        assert_eq!(map.take_upload().map(|w| w.len()), Some(1));
        assert!(map.take_upload().is_none());
        map.set_pixel(8, 1, true);
        let words = map.take_upload().unwrap();
        // byte 3 (row 1, second byte), bit 0
        assert_eq!(words, vec![1 << 24]);
    }
}

//! Rectangles on the reference grid and the partitions that tile them (B.2 to B.7).

/// Half-open integer rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Region {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// The key cell of a regular tiling: the cell with index `(0, 0)` starts at
/// `(x0, y0)` and every cell is `width` by `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
}

/// Something that occupies a rectangle on the grid of its level.
pub trait GridRegion {
    fn region(&self) -> Region;

    /// The region with `ancestor`'s origin as `(0, 0)`.
    fn region_relative_to(&self, ancestor: &Region) -> Region {
        let region = self.region();
        Region {
            x0: region.x0.saturating_sub(ancestor.x0),
            y0: region.y0.saturating_sub(ancestor.y0),
            x1: region.x1.saturating_sub(ancestor.x0),
            y1: region.y1.saturating_sub(ancestor.y0),
        }
    }
}

impl GridRegion for Region {
    fn region(&self) -> Region {
        *self
    }
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

// Ceiling division that also rounds negative numerators towards +inf
fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator.div_euclid(denominator);
    if numerator.rem_euclid(denominator) == 0 {
        quotient
    } else {
        quotient + 1
    }
}

impl Region {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Region {
        Region { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// The overlap of both regions. Disjoint regions give an empty region
    /// anchored at the clamped corner.
    pub fn intersect(&self, other: &Region) -> Region {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        Region {
            x0,
            y0,
            x1: self.x1.min(other.x1).max(x0),
            y1: self.y1.min(other.y1).max(y0),
        }
    }

    pub fn intersects(&self, other: &Region) -> bool {
        !self.intersect(other).is_empty()
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.is_empty()
            || (other.x0 >= self.x0
                && other.y0 >= self.y0
                && other.x1 <= self.x1
                && other.y1 <= self.y1)
    }

    /// B-12: `ceil(x / dx)` on every edge, as used for component subsampling.
    pub fn scale_ceil(&self, dx: u32, dy: u32) -> Region {
        Region {
            x0: self.x0.div_ceil(dx),
            y0: self.y0.div_ceil(dy),
            x1: self.x1.div_ceil(dx),
            y1: self.y1.div_ceil(dy),
        }
    }

    /// B-14: `ceil(x / 2^n)` on every edge.
    pub fn scale_pow2_ceil(&self, n: u8) -> Region {
        if n == 0 {
            return *self;
        }
        let divisor = 1i64 << n.min(62);
        Region {
            x0: clamp_u32(ceil_div(self.x0 as i64, divisor)),
            y0: clamp_u32(ceil_div(self.y0 as i64, divisor)),
            x1: clamp_u32(ceil_div(self.x1 as i64, divisor)),
            y1: clamp_u32(ceil_div(self.y1 as i64, divisor)),
        }
    }

    /// Index of the partition cell holding the top left sample.
    pub fn first_child_idx(&self, partition: &Partition) -> (u32, u32) {
        let x = (self.x0 as i64 - partition.x0 as i64).div_euclid(partition.width as i64);
        let y = (self.y0 as i64 - partition.y0 as i64).div_euclid(partition.height as i64);
        (clamp_u32(x), clamp_u32(y))
    }

    /// Index of the partition cell holding the bottom right sample.
    pub fn last_child_idx(&self, partition: &Partition) -> (u32, u32) {
        let x = ceil_div(self.x1 as i64 - partition.x0 as i64, partition.width as i64) - 1;
        let y = ceil_div(self.y1 as i64 - partition.y0 as i64, partition.height as i64) - 1;
        (clamp_u32(x), clamp_u32(y))
    }

    /// Number of partition cells along each axis the region touches.
    pub fn num_children(&self, partition: &Partition) -> (u32, u32) {
        if self.is_empty() {
            return (0, 0);
        }
        let (fx, fy) = self.first_child_idx(partition);
        let (lx, ly) = self.last_child_idx(partition);
        (lx - fx + 1, ly - fy + 1)
    }

    /// Number of partition cells the region touches.
    pub fn num_elements(&self, partition: &Partition) -> u64 {
        let (w, h) = self.num_children(partition);
        w as u64 * h as u64
    }
}

impl Partition {
    pub fn new(x0: u32, y0: u32, width: u32, height: u32) -> Partition {
        debug_assert!(width > 0 && height > 0);
        Partition {
            x0,
            y0,
            width,
            height,
        }
    }

    /// A grid anchored at the origin with cells of `2^xe` by `2^ye`.
    pub fn pow2(xe: u8, ye: u8) -> Partition {
        Partition::new(0, 0, 1 << xe.min(31), 1 << ye.min(31))
    }
}

/// The `(x, y)`-th cell of `partition`, clipped to `bound` when given.
pub fn replicate(partition: &Partition, x: u32, y: u32, bound: Option<&Region>) -> Region {
    let x0 = partition.x0 as u64 + x as u64 * partition.width as u64;
    let y0 = partition.y0 as u64 + y as u64 * partition.height as u64;
    let cell = Region {
        x0: x0.min(u32::MAX as u64) as u32,
        y0: y0.min(u32::MAX as u64) as u32,
        x1: (x0 + partition.width as u64).min(u32::MAX as u64) as u32,
        y1: (y0 + partition.height as u64).min(u32::MAX as u64) as u32,
    };

    match bound {
        Some(bound) => cell.intersect(bound),
        None => cell,
    }
}

/// Sub-band orientation (B.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BandKind {
    LL,
    HL,
    LH,
    HH,
}

impl BandKind {
    /// `(xob, yob)` of equation B-15.
    pub fn offsets(&self) -> (u32, u32) {
        match self {
            BandKind::LL => (0, 0),
            BandKind::HL => (1, 0),
            BandKind::LH => (0, 1),
            BandKind::HH => (1, 1),
        }
    }

    /// log2 of the nominal gain of the band (Table E.1).
    pub fn gain(&self) -> u8 {
        match self {
            BandKind::LL => 0,
            BandKind::HL | BandKind::LH => 1,
            BandKind::HH => 2,
        }
    }
}

/// B-15: the region of band `kind` at decomposition level `nb` of a
/// tile-component region.
pub fn band_region(tile_component: &Region, kind: BandKind, nb: u8) -> Region {
    if nb == 0 {
        return *tile_component;
    }
    let (xob, yob) = kind.offsets();
    let divisor = 1i64 << nb.min(62);
    let half = divisor / 2;
    let edge = |value: u32, offset: u32| {
        clamp_u32(ceil_div(value as i64 - half * offset as i64, divisor))
    };

    Region {
        x0: edge(tile_component.x0, xob),
        y0: edge(tile_component.y0, yob),
        x1: edge(tile_component.x1, xob),
        y1: edge(tile_component.y1, yob),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_clamps_to_bound() {
        let tiles = Partition::new(10, 20, 100, 50);
        let canvas = Region::new(15, 25, 230, 90);
        assert_eq!(
            replicate(&tiles, 0, 0, Some(&canvas)),
            Region::new(15, 25, 110, 70)
        );
        assert_eq!(
            replicate(&tiles, 2, 1, Some(&canvas)),
            Region::new(210, 70, 230, 90)
        );
        assert_eq!(replicate(&tiles, 1, 0, None), Region::new(110, 20, 210, 70));
        assert_eq!(canvas.num_children(&tiles), (3, 2));
    }

    #[test]
    fn test_child_index_round_trip() {
        let partition = Partition::new(3, 5, 7, 4);
        let bound = Region::new(4, 6, 40, 30);
        let (fx, fy) = bound.first_child_idx(&partition);
        let (lx, ly) = bound.last_child_idx(&partition);

        let mut intersecting = 0;
        for y in 0..10 {
            for x in 0..10 {
                let cell = replicate(&partition, x, y, Some(&bound));
                if !cell.is_empty() {
                    intersecting += 1;
                    assert!(x >= fx && x <= lx && y >= fy && y <= ly);
                    assert_eq!(cell.first_child_idx(&partition), (x, y));
                    assert_eq!(cell.last_child_idx(&partition), (x, y));
                }
            }
        }
        assert_eq!(bound.num_elements(&partition), intersecting);
    }

    #[test]
    fn test_empty_region_has_no_elements() {
        let partition = Partition::pow2(2, 2);
        assert_eq!(Region::new(4, 4, 4, 9).num_elements(&partition), 0);
        assert!(Region::new(0, 0, 3, 3).intersect(&Region::new(5, 5, 9, 9)).is_empty());
    }

    #[test]
    fn test_scale_ceil() {
        let region = Region::new(1, 3, 7, 10);
        assert_eq!(region.scale_ceil(2, 3), Region::new(1, 1, 4, 4));
        assert_eq!(region.scale_pow2_ceil(1), Region::new(1, 2, 4, 5));
        assert_eq!(region.scale_pow2_ceil(0), region);
    }

    #[test]
    fn test_band_regions() {
        // Odd origin: HL starts one sample earlier than LL
        let tile_component = Region::new(3, 0, 10, 8);
        assert_eq!(
            band_region(&tile_component, BandKind::LL, 1),
            Region::new(2, 0, 5, 4)
        );
        assert_eq!(
            band_region(&tile_component, BandKind::HL, 1),
            Region::new(1, 0, 5, 4)
        );
        assert_eq!(
            band_region(&tile_component, BandKind::LH, 1),
            Region::new(2, 0, 5, 4)
        );
        assert_eq!(
            band_region(&tile_component, BandKind::HH, 2),
            Region::new(1, 0, 2, 2)
        );
        assert_eq!(
            band_region(&tile_component, BandKind::LL, 0),
            tile_component
        );
    }

    #[test]
    fn test_region_relative_to() {
        let band = Region::new(8, 4, 16, 12);
        let block = Region::new(12, 4, 16, 8);
        assert_eq!(block.region_relative_to(&band), Region::new(4, 0, 8, 4));
    }
}

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::{DigitItem, HEIGHT, NUM_CLASSES, WIDTH};

/// Side of the box glyphs are scaled into, as in MNIST where digits fit a 20x20 box.
const GLYPH_BOX: f32 = 20.0;
const CENTER: f32 = 14.0;
const LOOP_SEGMENTS: usize = 20;

type Point = (f32, f32);

/// A pen stroke in unit glyph coordinates, `y` pointing down.
enum Stroke {
    Path(&'static [Point]),
    Loop { center: Point, radii: Point },
}

impl Stroke {
    fn segments(&self) -> Vec<(Point, Point)> {
        match self {
            Stroke::Path(points) => points.windows(2).map(|w| (w[0], w[1])).collect(),
            Stroke::Loop { center, radii } => {
                let point = |i: usize| {
                    let angle = i as f32 / LOOP_SEGMENTS as f32 * std::f32::consts::TAU;
                    (
                        center.0 + radii.0 * angle.cos(),
                        center.1 + radii.1 * angle.sin(),
                    )
                };
                (0..LOOP_SEGMENTS).map(|i| (point(i), point(i + 1))).collect()
            }
        }
    }
}

const GLYPHS: [&[Stroke]; NUM_CLASSES] = [
    &[Stroke::Loop {
        center: (0.5, 0.5),
        radii: (0.3, 0.42),
    }],
    &[Stroke::Path(&[(0.35, 0.25), (0.55, 0.08), (0.55, 0.92)])],
    &[Stroke::Path(&[
        (0.22, 0.28),
        (0.32, 0.12),
        (0.5, 0.07),
        (0.68, 0.12),
        (0.76, 0.28),
        (0.7, 0.45),
        (0.22, 0.92),
        (0.8, 0.92),
    ])],
    &[Stroke::Path(&[
        (0.22, 0.12),
        (0.75, 0.12),
        (0.45, 0.45),
        (0.68, 0.52),
        (0.78, 0.7),
        (0.68, 0.88),
        (0.45, 0.93),
        (0.22, 0.85),
    ])],
    &[Stroke::Path(&[(0.65, 0.92), (0.65, 0.08), (0.18, 0.65), (0.85, 0.65)])],
    &[Stroke::Path(&[
        (0.75, 0.08),
        (0.3, 0.08),
        (0.27, 0.45),
        (0.5, 0.4),
        (0.7, 0.5),
        (0.76, 0.7),
        (0.66, 0.88),
        (0.45, 0.93),
        (0.23, 0.86),
    ])],
    &[Stroke::Path(&[
        (0.7, 0.1),
        (0.45, 0.25),
        (0.28, 0.5),
        (0.25, 0.72),
        (0.35, 0.9),
        (0.55, 0.93),
        (0.72, 0.82),
        (0.74, 0.63),
        (0.6, 0.52),
        (0.4, 0.53),
        (0.27, 0.65),
    ])],
    &[Stroke::Path(&[(0.2, 0.08), (0.8, 0.08), (0.42, 0.92)])],
    &[
        Stroke::Loop {
            center: (0.5, 0.28),
            radii: (0.2, 0.2),
        },
        Stroke::Loop {
            center: (0.5, 0.7),
            radii: (0.25, 0.22),
        },
    ],
    &[
        Stroke::Loop {
            center: (0.5, 0.32),
            radii: (0.22, 0.22),
        },
        Stroke::Path(&[(0.72, 0.32), (0.68, 0.65), (0.55, 0.92)]),
    ],
];

/// Procedurally rendered digits.
///
/// Every item is drawn on demand from a fixed stroke skeleton with its own random rotation,
/// shear, scale, offset, stroke width and ink intensity. Item `i` only depends on the seed and
/// its position in the generator stream, so a dataset is reproducible and cheap to hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticDigits {
    len: usize,
    seed: u64,
    offset: usize,
}

impl SyntheticDigits {
    /// A dataset of `len` digits starting at the beginning of the `seed` stream.
    pub fn new(len: usize, seed: u64) -> Self {
        Self {
            len,
            seed,
            offset: 0,
        }
    }

    /// Train and test partitions taken from consecutive, non-overlapping ranges of the same
    /// generator stream.
    pub fn splits(train_len: usize, test_len: usize, seed: u64) -> (Self, Self) {
        let train = Self::new(train_len, seed);
        let test = Self {
            len: test_len,
            seed,
            offset: train_len,
        };

        (train, test)
    }

    /// The generator of item `index`, keyed by the dataset seed and the stream position.
    fn rng(&self, index: usize) -> StdRng {
        let position = (self.offset + index) as u64;
        let mut key = <StdRng as SeedableRng>::Seed::default();
        key[..8].copy_from_slice(&self.seed.to_le_bytes());
        key[8..16].copy_from_slice(&position.to_le_bytes());

        StdRng::from_seed(key)
    }
}

impl Dataset<DigitItem> for SyntheticDigits {
    fn get(&self, index: usize) -> Option<DigitItem> {
        if index >= self.len {
            return None;
        }

        let mut rng = self.rng(index);
        let label = rng.random_range(0..NUM_CLASSES as u8);
        let image = render(label, &mut rng);

        Some(DigitItem { image, label })
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn render(label: u8, rng: &mut StdRng) -> [[f32; WIDTH]; HEIGHT] {
    let (sin, cos) = rng.random_range(-0.26f32..0.26).sin_cos();
    let shear = rng.random_range(-0.25f32..0.25);
    let scale_x = rng.random_range(0.75f32..1.05) * GLYPH_BOX;
    let scale_y = rng.random_range(0.85f32..1.05) * GLYPH_BOX;
    let shift_x = rng.random_range(-2.0f32..2.0);
    let shift_y = rng.random_range(-2.0f32..2.0);
    let half_width = rng.random_range(0.9f32..1.7);
    let ink = rng.random_range(0.85f32..1.0);

    let place = |(x, y): Point| {
        let (x, y) = (x - 0.5 + shear * (y - 0.5), y - 0.5);
        let (x, y) = (x * cos - y * sin, x * sin + y * cos);
        (CENTER + shift_x + x * scale_x, CENTER + shift_y + y * scale_y)
    };

    let segments: Vec<(Point, Point)> = GLYPHS[label as usize]
        .iter()
        .flat_map(Stroke::segments)
        .map(|(a, b)| (place(a), place(b)))
        .collect();

    let mut image = [[0f32; WIDTH]; HEIGHT];
    for (y, row) in image.iter_mut().enumerate() {
        for (x, pixel) in row.iter_mut().enumerate() {
            let center = (x as f32 + 0.5, y as f32 + 0.5);
            let distance = segments
                .iter()
                .map(|(a, b)| segment_distance(center, *a, *b))
                .fold(f32::INFINITY, f32::min);

            let coverage = (half_width + 0.5 - distance).clamp(0.0, 1.0);
            if coverage > 0.0 {
                let grain = rng.random_range(0.9f32..1.0);
                *pixel = (coverage * ink * grain).clamp(0.0, 1.0);
            }
        }
    }

    image
}

fn segment_distance(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);

    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

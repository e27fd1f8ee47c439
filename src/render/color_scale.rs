use std::collections::HashMap;

pub type Rgba = [u8; 4];

const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// Piecewise-linear color ramp over the normalized range [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct ColorScale {
    /// Sorted `(position, color)` stops
    stops: Vec<(f64, Rgba)>,
    /// Color for values outside the domain when clamping is off
    out_of_range: Rgba,
}

impl ColorScale {
    /// Build a scale from stops. Positions are clamped to [0, 1] and sorted.
    pub fn new(mut stops: Vec<(f64, Rgba)>) -> Self {
        for stop in &mut stops {
            stop.0 = stop.0.clamp(0.0, 1.0);
        }
        stops.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            stops,
            out_of_range: TRANSPARENT,
        }
    }

    /// Evenly spaced stops.
    pub fn uniform(colors: &[Rgba]) -> Self {
        let last = colors.len().saturating_sub(1).max(1) as f64;
        Self::new(
            colors
                .iter()
                .enumerate()
                .map(|(i, &color)| (i as f64 / last, color))
                .collect(),
        )
    }

    pub fn with_out_of_range(mut self, color: Rgba) -> Self {
        self.out_of_range = color;
        self
    }

    pub fn out_of_range(&self) -> Rgba {
        self.out_of_range
    }

    /// Color at normalized position `t`, clamped to [0, 1].
    pub fn sample(&self, t: f64) -> Rgba {
        let Some(first) = self.stops.first() else {
            return TRANSPARENT;
        };
        let t = t.clamp(0.0, 1.0);
        if t <= first.0 {
            return first.1;
        }

        for pair in self.stops.windows(2) {
            let (p0, c0) = pair[0];
            let (p1, c1) = pair[1];
            if t <= p1 {
                let span = p1 - p0;
                let f = if span > 0.0 { (t - p0) / span } else { 1.0 };
                return lerp(c0, c1, f);
            }
        }

        self.stops[self.stops.len() - 1].1
    }
}

fn lerp(a: Rgba, b: Rgba, f: f64) -> Rgba {
    let mut out = [0u8; 4];
    for i in 0..4 {
        let v = a[i] as f64 + (b[i] as f64 - a[i] as f64) * f;
        out[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Named color scales available to the renderer.
#[derive(Clone, Debug)]
pub struct ColorScaleCatalog {
    scales: HashMap<String, ColorScale>,
}

impl Default for ColorScaleCatalog {
    fn default() -> Self {
        let mut scales = HashMap::new();
        scales.insert(
            "gray".to_string(),
            ColorScale::uniform(&[[0, 0, 0, 255], [255, 255, 255, 255]]),
        );
        scales.insert(
            "viridis".to_string(),
            ColorScale::uniform(&[
                [68, 1, 84, 255],
                [59, 82, 139, 255],
                [33, 145, 140, 255],
                [94, 201, 98, 255],
                [253, 231, 37, 255],
            ]),
        );
        scales.insert(
            "inferno".to_string(),
            ColorScale::uniform(&[
                [0, 0, 4, 255],
                [87, 16, 110, 255],
                [188, 55, 84, 255],
                [249, 142, 9, 255],
                [252, 255, 164, 255],
            ]),
        );
        scales.insert(
            "jet".to_string(),
            ColorScale::new(vec![
                (0.0, [0, 0, 131, 255]),
                (0.125, [0, 60, 170, 255]),
                (0.375, [5, 255, 255, 255]),
                (0.625, [255, 255, 0, 255]),
                (0.875, [250, 0, 0, 255]),
                (1.0, [128, 0, 0, 255]),
            ]),
        );
        Self { scales }
    }
}

impl ColorScaleCatalog {
    /// Catalog without any scales.
    pub fn empty() -> Self {
        Self {
            scales: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColorScale> {
        self.scales.get(name)
    }

    /// Add or replace a named scale.
    pub fn insert(&mut self, name: impl Into<String>, scale: ColorScale) {
        self.scales.insert(name.into(), scale);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scales.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

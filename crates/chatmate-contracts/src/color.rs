use anyhow::{bail, Result};

/// 24-bit RGB color parsed from or formatted as a `#rrggbb` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let digits = value.trim().strip_prefix('#').unwrap_or(value.trim());
        if digits.len() != 6 || !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
            bail!("invalid hex color: {value}");
        }
        let bytes = hex::decode(digits)?;
        Ok(Self {
            r: bytes[0],
            g: bytes[1],
            b: bytes[2],
        })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Anchor point for piecewise-linear rating interpolation. Stop ratings in a
/// ramp are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorStop {
    pub rating: i64,
    pub color: Rgb,
}

const fn stop(rating: i64, r: u8, g: u8, b: u8) -> ColorStop {
    ColorStop {
        rating,
        color: Rgb::new(r, g, b),
    }
}

/// The game-rating ramp, deep red at the floor through green into the
/// washed-out top tiers.
pub const RATING_COLOR_STOPS: [ColorStop; 11] = [
    stop(100, 0x6c, 0x04, 0x0d),
    stop(300, 0xfa, 0x41, 0x2d),
    stop(500, 0xff, 0x77, 0x69),
    stop(700, 0xff, 0xa4, 0x59),
    stop(900, 0xf7, 0xc6, 0x31),
    stop(1100, 0x95, 0xb7, 0x76),
    stop(1400, 0x81, 0xb6, 0x4c),
    stop(1600, 0x74, 0x9b, 0xbf),
    stop(1800, 0x26, 0xc2, 0xa3),
    stop(2000, 0xe2, 0x73, 0xe7),
    stop(2200, 0x72, 0x2f, 0x2c),
];

/// Interpolates `value` along `stops`. Values outside the stop range clamp to
/// the end stops; a value equal to a stop rating returns that stop's color
/// exactly.
pub fn color_at(stops: &[ColorStop], value: i64) -> Rgb {
    let first = stops[0];
    let last = stops[stops.len() - 1];
    let clamped = value.clamp(first.rating, last.rating);

    let end_index = stops
        .iter()
        .position(|stop| stop.rating >= clamped)
        .unwrap_or(stops.len() - 1);
    if end_index == 0 {
        return first.color;
    }

    let start = stops[end_index - 1];
    let end = stops[end_index];
    let range = end.rating - start.rating;
    let progress = if range == 0 {
        1.0
    } else {
        (clamped - start.rating) as f64 / range as f64
    };

    let lerp = |a: u8, b: u8| -> u8 {
        let mixed = a as f64 + (b as f64 - a as f64) * progress;
        mixed.round() as u8
    };
    Rgb::new(
        lerp(start.color.r, end.color.r),
        lerp(start.color.g, end.color.g),
        lerp(start.color.b, end.color.b),
    )
}

/// Interpolates along the default rating ramp.
pub fn rating_color(value: i64) -> Rgb {
    color_at(&RATING_COLOR_STOPS, value)
}

/// Per-side bubble and text colors handed to the renderer. Callers apply the
/// documented fallbacks (gray bubbles, white text) before invoking a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTheme {
    pub bubble_left: Rgb,
    pub bubble_right: Rgb,
    pub text_left: Rgb,
    pub text_right: Rgb,
}

pub const DEFAULT_BUBBLE_COLOR: Rgb = Rgb::new(0x80, 0x80, 0x80);
pub const DEFAULT_TEXT_COLOR: Rgb = Rgb::new(0xff, 0xff, 0xff);

impl Default for RenderTheme {
    fn default() -> Self {
        Self {
            bubble_left: DEFAULT_BUBBLE_COLOR,
            bubble_right: DEFAULT_BUBBLE_COLOR,
            text_left: DEFAULT_TEXT_COLOR,
            text_right: DEFAULT_TEXT_COLOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{color_at, rating_color, ColorStop, Rgb, RATING_COLOR_STOPS};

    #[test]
    fn hex_roundtrip() {
        let color = Rgb::from_hex("#6c040d").unwrap();
        assert_eq!(color, Rgb::new(0x6c, 0x04, 0x0d));
        assert_eq!(color.to_hex(), "#6c040d");

        let bare = Rgb::from_hex("FFA459").unwrap();
        assert_eq!(bare, Rgb::new(0xff, 0xa4, 0x59));
    }

    #[test]
    fn hex_rejects_malformed_input() {
        assert!(Rgb::from_hex("#fff").is_err());
        assert!(Rgb::from_hex("#gggggg").is_err());
        assert!(Rgb::from_hex("").is_err());
        assert!(Rgb::from_hex("#12345").is_err());
    }

    #[test]
    fn clamps_below_and_above_stop_range() {
        assert_eq!(rating_color(-500), RATING_COLOR_STOPS[0].color);
        assert_eq!(rating_color(100), RATING_COLOR_STOPS[0].color);
        assert_eq!(rating_color(9000), RATING_COLOR_STOPS[10].color);
        assert_eq!(rating_color(2200), RATING_COLOR_STOPS[10].color);
    }

    #[test]
    fn every_stop_rating_returns_its_color_exactly() {
        for stop in RATING_COLOR_STOPS {
            assert_eq!(rating_color(stop.rating), stop.color);
        }
    }

    #[test]
    fn interior_value_lies_strictly_between_neighbor_stops() {
        let at_300 = rating_color(300);
        let at_500 = rating_color(500);
        let mixed = rating_color(400);

        let between = |value: u8, a: u8, b: u8| {
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            value > low && value < high
        };
        assert!(between(mixed.r, at_300.r, at_500.r));
        assert!(between(mixed.g, at_300.g, at_500.g));
        assert!(between(mixed.b, at_300.b, at_500.b));
    }

    #[test]
    fn zero_width_segment_returns_matched_stop() {
        let stops = [
            ColorStop {
                rating: 10,
                color: Rgb::new(0, 0, 0),
            },
            ColorStop {
                rating: 10,
                color: Rgb::new(255, 255, 255),
            },
        ];
        assert_eq!(color_at(&stops, 10), Rgb::new(0, 0, 0));
        assert_eq!(color_at(&stops, 11), Rgb::new(0, 0, 0));
    }

    #[test]
    fn midpoint_interpolates_channelwise() {
        let stops = [
            ColorStop {
                rating: 0,
                color: Rgb::new(0, 100, 200),
            },
            ColorStop {
                rating: 100,
                color: Rgb::new(100, 0, 250),
            },
        ];
        assert_eq!(color_at(&stops, 50), Rgb::new(50, 50, 225));
    }
}

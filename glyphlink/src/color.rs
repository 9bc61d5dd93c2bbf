//! 8-bit RGBA colors.

use serde::{Deserialize, Serialize};

/// RGBA color with 8-bit channels.
///
/// Hashable so it can be part of a glyph cache key. Serialized as an
/// `rrggbbaa` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Self = Self::rgba8(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgb8(0, 0, 0);
    pub const WHITE: Self = Self::rgb8(255, 255, 255);
    pub const RED: Self = Self::rgb8(255, 0, 0);
    pub const GREEN: Self = Self::rgb8(0, 255, 0);
    pub const BLUE: Self = Self::rgb8(0, 0, 255);
    pub const BROWN: Self = Self::rgb8(153, 102, 51);
    pub const ORANGE: Self = Self::rgb8(255, 128, 0);
    pub const CYAN: Self = Self::rgb8(0, 255, 255);
    pub const MAGENTA: Self = Self::rgb8(255, 0, 255);
    pub const PURPLE: Self = Self::rgb8(128, 0, 128);
    pub const YELLOW: Self = Self::rgb8(255, 255, 0);
    pub const PINK: Self = Self::rgb8(255, 192, 203);
    pub const TEAL: Self = Self::rgb8(0, 128, 128);
    pub const GRAY: Self = Self::rgb8(128, 128, 128);

    /// Foregrounds used for the sample atlas.
    pub const SAMPLE_PALETTE: [Self; 12] = [
        Self::RED,
        Self::GREEN,
        Self::BLUE,
        Self::BROWN,
        Self::ORANGE,
        Self::CYAN,
        Self::MAGENTA,
        Self::PURPLE,
        Self::YELLOW,
        Self::PINK,
        Self::TEAL,
        Self::GRAY,
    ];

    #[inline]
    pub const fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[inline]
    pub const fn rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Pack into a u32 (RGBA8 format: R in lowest byte).
    #[inline]
    pub fn pack(self) -> u32 {
        u32::from_le_bytes([self.r, self.g, self.b, self.a])
    }

    /// Inverse of [`Color::pack`].
    #[inline]
    pub fn from_packed(packed: u32) -> Self {
        let [r, g, b, a] = packed.to_le_bytes();
        Self { r, g, b, a }
    }

    /// Components in 0.0-1.0 range, as the shader consumes them.
    #[inline]
    pub fn to_f32(self) -> [f32; 4] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        ]
    }

    #[inline]
    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Lowercase `rrggbbaa`.
    pub fn to_hex(self) -> String {
        format!("{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }

    /// Parse `rrggbbaa` or `rrggbb` (opaque), with an optional leading `#`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.is_ascii() || (hex.len() != 6 && hex.len() != 8) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Some(Self::rgba8(channel(0)?, channel(2)?, channel(4)?, a))
    }

    /// Source-over blend of `self` onto an opaque-or-not `background`.
    pub fn over(self, background: Color) -> Color {
        let fa = self.a as u32;
        let ba = background.a as u32;
        // out_a = fa + ba * (1 - fa), all in 0..=255 fixed point
        let out_a = fa + ba * (255 - fa) / 255;
        if out_a == 0 {
            return Color::TRANSPARENT;
        }
        let mix = |f: u8, b: u8| {
            let premul = f as u32 * fa + b as u32 * ba * (255 - fa) / 255;
            (premul / out_a).min(255) as u8
        };
        Color::rgba8(
            mix(self.r, background.r),
            mix(self.g, background.g),
            mix(self.b, background.b),
            out_a.min(255) as u8,
        )
    }

    /// Same color with alpha scaled by `coverage` (0-255).
    #[inline]
    pub fn with_coverage(self, coverage: u8) -> Color {
        Color::rgba8(
            self.r,
            self.g,
            self.b,
            ((self.a as u32 * coverage as u32 + 127) / 255) as u8,
        )
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color {value:?}, expected rrggbbaa"))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_puts_red_in_low_byte() {
        let c = Color::rgba8(0x11, 0x22, 0x33, 0x44);
        assert_eq!(c.pack(), 0x4433_2211);
        assert_eq!(Color::from_packed(c.pack()), c);
    }

    #[test]
    fn test_hex_forms() {
        assert_eq!(Color::RED.to_hex(), "ff0000ff");
        assert_eq!(Color::from_hex("#ff0000"), Some(Color::RED));
        assert_eq!(Color::from_hex("00000000"), Some(Color::TRANSPARENT));
        assert_eq!(Color::from_hex("xyz"), None);
        assert_eq!(Color::from_hex("gg0000ff"), None);
    }

    #[test]
    fn test_over_opaque_and_transparent() {
        assert_eq!(Color::RED.over(Color::BLACK), Color::RED);
        assert_eq!(Color::TRANSPARENT.over(Color::BLUE), Color::BLUE);
        assert_eq!(Color::TRANSPARENT.over(Color::TRANSPARENT), Color::TRANSPARENT);

        let half = Color::WHITE.with_coverage(128);
        let blended = half.over(Color::BLACK);
        assert_eq!(blended.a, 255);
        assert!((127..=129).contains(&blended.r));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&Color::TEAL).unwrap();
        assert_eq!(json, "\"008080ff\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::TEAL);
        assert!(serde_json::from_str::<Color>("\"nope\"").is_err());
    }
}

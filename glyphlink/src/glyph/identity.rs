//! Glyph identity: one grapheme in one color pair.

use std::fmt;

use unicode_segmentation::UnicodeSegmentation;

use crate::color::Color;
use crate::error::IdentityError;

/// Cache key for a rendered glyph.
///
/// Two identities are equal when text, foreground and background all match.
/// The text is always exactly one extended grapheme cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlyphIdentity {
    text: String,
    foreground: Color,
    background: Color,
}

impl GlyphIdentity {
    pub const DEFAULT_BACKGROUND: Color = Color::BLACK;

    pub fn new(
        text: impl Into<String>,
        foreground: Color,
        background: Color,
    ) -> Result<Self, IdentityError> {
        let text = text.into();
        let count = text.graphemes(true).count();
        match count {
            0 => Err(IdentityError::Empty),
            1 => Ok(Self {
                text,
                foreground,
                background,
            }),
            _ => Err(IdentityError::MultipleGraphemes { text, count }),
        }
    }

    /// Identity on the default (black) background.
    pub fn foreground(text: impl Into<String>, foreground: Color) -> Result<Self, IdentityError> {
        Self::new(text, foreground, Self::DEFAULT_BACKGROUND)
    }

    /// Identity for a single `char`. Always one grapheme, so this cannot fail.
    pub fn from_char(ch: char, foreground: Color, background: Color) -> Self {
        Self {
            text: ch.to_string(),
            foreground,
            background,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fg(&self) -> Color {
        self.foreground
    }

    pub fn bg(&self) -> Color {
        self.background
    }

    /// True when the grapheme draws nothing (space, tab, ...).
    pub fn is_whitespace(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }

    /// File-name form: `<hex utf8>_<fg rrggbbaa>_<bg rrggbbaa>`.
    pub fn persisted_name(&self) -> String {
        let mut name = String::with_capacity(self.text.len() * 2 + 18);
        for byte in self.text.as_bytes() {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push('_');
        name.push_str(&self.foreground.to_hex());
        name.push('_');
        name.push_str(&self.background.to_hex());
        name
    }

    /// Parse a name produced by [`GlyphIdentity::persisted_name`].
    pub fn from_persisted_name(name: &str) -> Result<Self, IdentityError> {
        let malformed = || IdentityError::MalformedName(name.to_string());

        let mut parts = name.split('_');
        let (Some(hex_text), Some(fg), Some(bg), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        if hex_text.len() % 2 != 0 || !hex_text.is_ascii() {
            return Err(malformed());
        }
        let bytes = (0..hex_text.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex_text[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| malformed())?;
        let text = String::from_utf8(bytes).map_err(|_| malformed())?;

        let foreground = Color::from_hex(fg).filter(|_| fg.len() == 8).ok_or_else(malformed)?;
        let background = Color::from_hex(bg).filter(|_| bg.len() == 8).ok_or_else(malformed)?;

        Self::new(text, foreground, background)
    }
}

impl fmt::Display for GlyphIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (fg #{}, bg #{})",
            self.text,
            self.foreground.to_hex(),
            self.background.to_hex()
        )
    }
}

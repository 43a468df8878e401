//! Pipeline stages.

use std::fmt;

/// Pipeline stage of an entry function. The discriminant order is the
/// order in which a linker generates code: pixel first, vertex last.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum ShaderStage {
    None = 0,
    Pixel = 1,
    Geometry = 2,
    Domain = 3,
    Hull = 4,
    Vertex = 5,
    Compute = 6,
}

impl ShaderStage {
    /// Number of stage slots, including `None`.
    pub const COUNT: usize = 7;

    /// Every real stage, in generation order.
    pub const ALL: [ShaderStage; 6] = [
        Self::Pixel,
        Self::Geometry,
        Self::Domain,
        Self::Hull,
        Self::Vertex,
        Self::Compute,
    ];

    /// Parses the stage keyword used by `export` blocks.
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "pixel" | "fragment" => Self::Pixel,
            "geometry" => Self::Geometry,
            "domain" => Self::Domain,
            "hull" => Self::Hull,
            "vertex" => Self::Vertex,
            "compute" => Self::Compute,
            _ => return None,
        })
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Pixel,
            2 => Self::Geometry,
            3 => Self::Domain,
            4 => Self::Hull,
            5 => Self::Vertex,
            6 => Self::Compute,
            _ => return None,
        })
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Pixel => "pixel",
            Self::Geometry => "geometry",
            Self::Domain => "domain",
            Self::Hull => "hull",
            Self::Vertex => "vertex",
            Self::Compute => "compute",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_order_starts_with_pixel() {
        assert_eq!(ShaderStage::ALL[0], ShaderStage::Pixel);
        assert!(ShaderStage::Pixel < ShaderStage::Vertex);
        for stage in ShaderStage::ALL {
            assert_eq!(ShaderStage::from_raw(stage as u8), Some(stage));
            assert_eq!(ShaderStage::from_keyword(&stage.to_string()), Some(stage));
        }
    }
}

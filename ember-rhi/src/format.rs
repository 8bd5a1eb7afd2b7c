//! Image format enumeration and the per-format layout table used by copies,
//! staging regions, and barrier aspect inference.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,

    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,
    Rg8Unorm,
    Rg8Uint,

    R16Float,
    R16Unorm,
    R16Uint,
    R16Sint,
    Rg16Float,
    Rg16Unorm,
    Rg16Uint,

    R32Float,
    R32Uint,
    R32Sint,

    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Bgra8UnormSrgb,

    Rgb10a2Unorm,
    Rg11b10Float,

    Rgba16Float,
    Rgba16Unorm,
    Rgba16Uint,
    Rg32Float,
    Rg32Uint,

    Rgb32Float,
    Rgb32Uint,

    Rgba32Float,
    Rgba32Uint,
    Rgba32Sint,

    D16Unorm,
    D24UnormS8Uint,
    D32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Float,
    Normalized,
    Integer,
    DepthStencil,
}

/// Layout facts about one format. `block_size` is the texel-block edge in
/// pixels; all formats in this table are uncompressed so it is always 1, but
/// the copy math honors it throughout.
#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub format: Format,
    pub kind: FormatKind,
    pub bytes_per_block: u8,
    pub block_size: u8,
    pub has_depth: bool,
    pub has_stencil: bool,
}

macro_rules! fmt {
    ($format:ident, $kind:ident, $bytes:expr) => {
        FormatInfo {
            format: Format::$format,
            kind: FormatKind::$kind,
            bytes_per_block: $bytes,
            block_size: 1,
            has_depth: false,
            has_stencil: false,
        }
    };
    ($format:ident, $bytes:expr, depth: $depth:expr, stencil: $stencil:expr) => {
        FormatInfo {
            format: Format::$format,
            kind: FormatKind::DepthStencil,
            bytes_per_block: $bytes,
            block_size: 1,
            has_depth: $depth,
            has_stencil: $stencil,
        }
    };
}

const FORMAT_INFO: &[FormatInfo] = &[
    fmt!(Unknown, Integer, 0),
    fmt!(R8Unorm, Normalized, 1),
    fmt!(R8Snorm, Normalized, 1),
    fmt!(R8Uint, Integer, 1),
    fmt!(R8Sint, Integer, 1),
    fmt!(Rg8Unorm, Normalized, 2),
    fmt!(Rg8Uint, Integer, 2),
    fmt!(R16Float, Float, 2),
    fmt!(R16Unorm, Normalized, 2),
    fmt!(R16Uint, Integer, 2),
    fmt!(R16Sint, Integer, 2),
    fmt!(Rg16Float, Float, 4),
    fmt!(Rg16Unorm, Normalized, 4),
    fmt!(Rg16Uint, Integer, 4),
    fmt!(R32Float, Float, 4),
    fmt!(R32Uint, Integer, 4),
    fmt!(R32Sint, Integer, 4),
    fmt!(Rgba8Unorm, Normalized, 4),
    fmt!(Rgba8UnormSrgb, Normalized, 4),
    fmt!(Rgba8Snorm, Normalized, 4),
    fmt!(Rgba8Uint, Integer, 4),
    fmt!(Rgba8Sint, Integer, 4),
    fmt!(Bgra8Unorm, Normalized, 4),
    fmt!(Bgra8UnormSrgb, Normalized, 4),
    fmt!(Rgb10a2Unorm, Normalized, 4),
    fmt!(Rg11b10Float, Float, 4),
    fmt!(Rgba16Float, Float, 8),
    fmt!(Rgba16Unorm, Normalized, 8),
    fmt!(Rgba16Uint, Integer, 8),
    fmt!(Rg32Float, Float, 8),
    fmt!(Rg32Uint, Integer, 8),
    fmt!(Rgb32Float, Float, 12),
    fmt!(Rgb32Uint, Integer, 12),
    fmt!(Rgba32Float, Float, 16),
    fmt!(Rgba32Uint, Integer, 16),
    fmt!(Rgba32Sint, Integer, 16),
    fmt!(D16Unorm, 2, depth: true, stencil: false),
    fmt!(D24UnormS8Uint, 4, depth: true, stencil: true),
    fmt!(D32Float, 4, depth: true, stencil: false),
];

impl Format {
    pub fn info(self) -> &'static FormatInfo {
        // The table is ordered to match the enum; fall back to a scan if a
        // variant is ever reordered.
        let index = self as usize;
        if index < FORMAT_INFO.len() && FORMAT_INFO[index].format == self {
            return &FORMAT_INFO[index];
        }
        FORMAT_INFO
            .iter()
            .find(|info| info.format == self)
            .unwrap_or(&FORMAT_INFO[0])
    }

    pub fn has_depth(self) -> bool {
        self.info().has_depth
    }

    pub fn has_stencil(self) -> bool {
        self.info().has_stencil
    }

    pub fn is_depth_stencil(self) -> bool {
        let info = self.info();
        info.has_depth || info.has_stencil
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_enum_order() {
        for info in FORMAT_INFO {
            assert_eq!(info.format.info().format, info.format);
        }
    }

    #[test]
    fn depth_flags() {
        assert!(Format::D32Float.has_depth());
        assert!(!Format::D32Float.has_stencil());
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(!Format::Rgba8Unorm.is_depth_stencil());
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(Format::Rgba8Unorm.info().bytes_per_block, 4);
        assert_eq!(Format::Rgba32Float.info().bytes_per_block, 16);
        assert_eq!(Format::R8Unorm.info().bytes_per_block, 1);
        assert_eq!(Format::Rgba16Float.info().bytes_per_block, 8);
    }
}

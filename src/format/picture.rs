use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{AvError, AvResult};

/// Pack four bytes into a little-endian 32 bit FourCC word.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// Encode a four character ASCII string as a FourCC word.
pub fn fourcc_encode(code: &str) -> AvResult<u32> {
    let bytes: [u8; 4] = code
        .as_bytes()
        .try_into()
        .map_err(|_| AvError::format_unsupported(format!("FourCC must be 4 characters: {code:?}")))?;
    if !bytes.is_ascii() {
        return Err(AvError::format_unsupported(format!(
            "FourCC must be ASCII: {code:?}"
        )));
    }
    Ok(fourcc(&bytes))
}

/// Decode a FourCC word into its four characters, byte for byte.
///
/// Every byte is mapped to exactly one `char`, so non-printable codes survive
/// a round trip through [`fourcc_encode`].
pub fn fourcc_decode(value: u32) -> String {
    value.to_le_bytes().iter().map(|&b| b as char).collect()
}

/// Pixel layouts identified by their FourCC code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8 bit RGB-3-3-2
    RGB332,
    /// 16 bit RGB-5-5-5
    RGB555,
    /// 16 bit RGB-5-6-5
    RGB565,
    /// 24 bit BGR-8-8-8
    BGR24,
    /// 24 bit RGB-8-8-8
    RGB24,
    /// 32 bit BGR-8-8-8-8
    BGR32,
    /// 32 bit RGB-8-8-8-8
    RGB32,
    /// 8 bit greyscale
    GREY,
    /// 4:2:2 packed
    YUY2,
    /// 4:2:0 planar
    YV12,
    /// 9 bit YVU 4:1:0
    YVU410,
    /// 9 bit YUV 4:1:0
    YUV410,
    /// 12 bit YVU 4:2:0
    YVU420,
    /// 12 bit YUV 4:2:0
    I420,
    /// 16 bit YUV 4:2:2
    YUYV,
    /// 16 bit YUV 4:2:2
    UYVY,
    /// 16 bit YUV 4:2:2 planar
    YUV422P,
    /// 16 bit YUV 4:1:1 planar
    YUV411P,
    /// 12 bit YUV 4:1:1
    Y41P,
    /// 12 bit Y/CbCr 4:2:0
    NV12,
    /// 12 bit Y/CrCb 4:2:0
    NV21,
    /// 8 bit color
    HI240,
    /// JFIF JPEG
    JPEG,
    /// MPEG
    MPEG,
    /// Motion-JPEG
    MJPG,
    /// 1394
    DV,
    /// Winnov hardware compression
    WNVA,
    UNKNOWN,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 28] = [
        PixelFormat::RGB332,
        PixelFormat::RGB555,
        PixelFormat::RGB565,
        PixelFormat::BGR24,
        PixelFormat::RGB24,
        PixelFormat::BGR32,
        PixelFormat::RGB32,
        PixelFormat::GREY,
        PixelFormat::YUY2,
        PixelFormat::YV12,
        PixelFormat::YVU410,
        PixelFormat::YUV410,
        PixelFormat::YVU420,
        PixelFormat::I420,
        PixelFormat::YUYV,
        PixelFormat::UYVY,
        PixelFormat::YUV422P,
        PixelFormat::YUV411P,
        PixelFormat::Y41P,
        PixelFormat::NV12,
        PixelFormat::NV21,
        PixelFormat::HI240,
        PixelFormat::JPEG,
        PixelFormat::MPEG,
        PixelFormat::MJPG,
        PixelFormat::DV,
        PixelFormat::WNVA,
        PixelFormat::UNKNOWN,
    ];

    /// FourCC code of this layout.
    pub const fn id(self) -> u32 {
        match self {
            PixelFormat::RGB332 => fourcc(b"RGB8"),
            PixelFormat::RGB555 => fourcc(b"R555"),
            PixelFormat::RGB565 => fourcc(b"R565"),
            PixelFormat::BGR24 => fourcc(b"BGR3"),
            PixelFormat::RGB24 => fourcc(b"RGB3"),
            PixelFormat::BGR32 => fourcc(b"BGR4"),
            PixelFormat::RGB32 => fourcc(b"RGB4"),
            PixelFormat::GREY => fourcc(b"GREY"),
            PixelFormat::YUY2 => fourcc(b"YUY2"),
            PixelFormat::YV12 => fourcc(b"YV12"),
            PixelFormat::YVU410 => fourcc(b"YVU1"),
            PixelFormat::YUV410 => fourcc(b"YUV1"),
            PixelFormat::YVU420 => fourcc(b"YVU2"),
            PixelFormat::I420 => fourcc(b"I420"),
            PixelFormat::YUYV => fourcc(b"YUYV"),
            PixelFormat::UYVY => fourcc(b"UYVY"),
            PixelFormat::YUV422P => fourcc(b"I422"),
            PixelFormat::YUV411P => fourcc(b"I411"),
            PixelFormat::Y41P => fourcc(b"Y41P"),
            PixelFormat::NV12 => fourcc(b"NV12"),
            PixelFormat::NV21 => fourcc(b"NV21"),
            PixelFormat::HI240 => fourcc(b"HI24"),
            PixelFormat::JPEG => fourcc(b"JPEG"),
            PixelFormat::MPEG => fourcc(b"MPEG"),
            PixelFormat::MJPG => fourcc(b"MJPG"),
            PixelFormat::DV => fourcc(b"DV  "),
            PixelFormat::WNVA => fourcc(b"WNVA"),
            PixelFormat::UNKNOWN => fourcc(b"UNKN"),
        }
    }

    /// The four character code, e.g. `"RGB3"` for [`PixelFormat::RGB24`].
    pub fn fourcc(self) -> String {
        fourcc_decode(self.id())
    }

    /// Average bits per pixel for uncompressed layouts.
    pub fn bits_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::RGB332 | PixelFormat::GREY | PixelFormat::HI240 => Some(8),
            PixelFormat::YVU410 | PixelFormat::YUV410 => Some(9),
            PixelFormat::YV12
            | PixelFormat::YVU420
            | PixelFormat::I420
            | PixelFormat::Y41P
            | PixelFormat::NV12
            | PixelFormat::NV21 => Some(12),
            PixelFormat::RGB555
            | PixelFormat::RGB565
            | PixelFormat::YUY2
            | PixelFormat::YUYV
            | PixelFormat::UYVY
            | PixelFormat::YUV422P
            | PixelFormat::YUV411P => Some(16),
            PixelFormat::BGR24 | PixelFormat::RGB24 => Some(24),
            PixelFormat::BGR32 | PixelFormat::RGB32 => Some(32),
            PixelFormat::JPEG
            | PixelFormat::MPEG
            | PixelFormat::MJPG
            | PixelFormat::DV
            | PixelFormat::WNVA
            | PixelFormat::UNKNOWN => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self.bits_per_pixel().is_none()
    }
}

lazy_static! {
    static ref PIXEL_FORMATS_BY_ID: HashMap<u32, PixelFormat> =
        PixelFormat::ALL.iter().map(|f| (f.id(), *f)).collect();
}

/// Exact lookup of a known pixel format by FourCC id.
///
/// Unknown ids are an error; they are never mapped to [`PixelFormat::UNKNOWN`].
pub fn pixel_format_by_id(id: u32) -> AvResult<PixelFormat> {
    PIXEL_FORMATS_BY_ID
        .get(&id)
        .copied()
        .ok_or_else(|| AvError::not_found("pixel format", format!("{id:#010x} ({:?})", fourcc_decode(id))))
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fourcc())
    }
}

impl FromStr for PixelFormat {
    type Err = AvError;

    /// Accepts either the FourCC (`"YUYV"`, `"RGB3"`) or the variant name (`"RGB24"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = fourcc_encode(s) {
            if let Ok(format) = pixel_format_by_id(id) {
                return Ok(format);
            }
        }
        PixelFormat::ALL
            .into_iter()
            .find(|f| format!("{f:?}").eq_ignore_ascii_case(s))
            .ok_or_else(|| AvError::not_found("pixel format", s))
    }
}

/// Immutable picture format: pixel layout and frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPictureFormat")]
pub struct PictureFormat {
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct RawPictureFormat {
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
}

impl TryFrom<RawPictureFormat> for PictureFormat {
    type Error = AvError;

    fn try_from(raw: RawPictureFormat) -> AvResult<Self> {
        Self::new(raw.pixel_format, raw.width, raw.height)
    }
}

impl PictureFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> AvResult<Self> {
        if width == 0 || height == 0 {
            return Err(AvError::format_unsupported(format!(
                "picture dimensions must be positive: {width}x{height}"
            )));
        }
        Ok(Self {
            pixel_format,
            width,
            height,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes of one uncompressed frame, `None` for compressed layouts.
    pub fn frame_size(&self) -> Option<usize> {
        self.pixel_format
            .bits_per_pixel()
            .map(|bpp| (self.width as usize * self.height as usize * bpp as usize).div_ceil(8))
    }
}

impl fmt::Display for PictureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}x{}", self.pixel_format.fourcc(), self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb24_fourcc() {
        let format = PictureFormat::new(PixelFormat::RGB24, 640, 480).unwrap();
        assert_eq!(fourcc_decode(format.pixel_format().id()), "RGB3");
        assert_eq!(format.to_string(), "RGB3 - 640x480");
    }

    #[test]
    fn test_encode_is_little_endian() {
        assert_eq!(fourcc_encode("ABCD").unwrap(), 0x4443_4241);
        assert_eq!(fourcc_decode(0x4443_4241), "ABCD");
    }

    #[test]
    fn test_encode_rejects_bad_length() {
        assert!(fourcc_encode("RGB").is_err());
        assert!(fourcc_encode("RGB33").is_err());
        assert!(fourcc_encode("RGé").is_err());
    }

    #[test]
    fn test_non_printable_round_trip() {
        let code = "\u{0}\u{1}\u{7f} ";
        assert_eq!(fourcc_decode(fourcc_encode(code).unwrap()), code);
    }

    #[test]
    fn test_catalog_ids_are_unique() {
        assert_eq!(PIXEL_FORMATS_BY_ID.len(), PixelFormat::ALL.len());
        for format in PixelFormat::ALL {
            assert_eq!(pixel_format_by_id(format.id()).unwrap(), format);
        }
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let err = pixel_format_by_id(fourcc(b"ZZZZ")).unwrap_err();
        assert_eq!(err.kind, crate::errors::AvErrorKind::NotFound);
    }

    #[test]
    fn test_frame_size() {
        let yuyv = PictureFormat::new(PixelFormat::YUYV, 640, 480).unwrap();
        assert_eq!(yuyv.frame_size(), Some(640 * 480 * 2));
        let i420 = PictureFormat::new(PixelFormat::I420, 4, 2).unwrap();
        assert_eq!(i420.frame_size(), Some(12));
        let mjpg = PictureFormat::new(PixelFormat::MJPG, 640, 480).unwrap();
        assert_eq!(mjpg.frame_size(), None);
    }

    #[test]
    fn test_parse_by_fourcc_or_name() {
        assert_eq!("RGB3".parse::<PixelFormat>().unwrap(), PixelFormat::RGB24);
        assert_eq!("rgb24".parse::<PixelFormat>().unwrap(), PixelFormat::RGB24);
        assert_eq!("DV  ".parse::<PixelFormat>().unwrap(), PixelFormat::DV);
        assert!("nope".parse::<PixelFormat>().is_err());
    }
}

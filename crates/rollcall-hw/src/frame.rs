//! Frame type and pixel-format conversion to 8-bit grayscale.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Convert a raw driver buffer in `format` to one byte per pixel.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }

    let gray = match format {
        PixelFormat::Grey => buf[..pixels].to_vec(),
        // YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
        PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
        // Keep the high byte of each little-endian sample.
        PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
    };
    Ok(gray)
}

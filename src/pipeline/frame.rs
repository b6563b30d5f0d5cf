//! Turning request payloads into upright RGBA frames.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use image::{RgbaImage, imageops};
use thiserror::Error;

use crate::types::Frame;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("data URL parse error: {0}")]
    DataUrl(String),
    #[error("image payload is empty")]
    Empty,
}

/// Clockwise rotation applied before mirroring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Capture-pipeline calibration: how incoming frames are turned to match the
/// camera convention the classifier was trained on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Orientation {
    pub rotation: Rotation,
    pub mirror: bool,
}

impl Orientation {
    /// Front camera on the mobile client: frames arrive rotated a quarter turn
    /// counter-clockwise and unmirrored.
    pub fn mobile_front_camera() -> Self {
        Self {
            rotation: Rotation::Cw90,
            mirror: true,
        }
    }

    pub fn apply(&self, image: RgbaImage) -> RgbaImage {
        let rotated = match self.rotation {
            Rotation::None => image,
            Rotation::Cw90 => imageops::rotate90(&image),
            Rotation::Cw180 => imageops::rotate180(&image),
            Rotation::Cw270 => imageops::rotate270(&image),
        };
        if self.mirror {
            imageops::flip_horizontal(&rotated)
        } else {
            rotated
        }
    }
}

/// Decodes plain base64 or a `data:<mime>;base64,<payload>` URL into raw bytes.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, FrameError> {
    let payload = payload.trim();
    let data = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (metadata, data) = rest
                .split_once(',')
                .ok_or_else(|| FrameError::DataUrl("missing comma in data url".into()))?;
            if !metadata.ends_with(";base64") {
                return Err(FrameError::DataUrl(
                    "only base64 encoded data URLs are supported".into(),
                ));
            }
            data.trim()
        }
        None => payload,
    };
    // Line-wrapped encoders insert breaks inside the payload.
    let data: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if data.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(BASE64_STANDARD.decode(data)?)
}

/// Decodes a PNG/JPEG payload (gray, RGB or RGBA) and applies `orientation`.
pub fn decode_frame(payload: &str, orientation: Orientation) -> Result<Frame, FrameError> {
    let bytes = decode_base64_payload(payload)?;
    let image = image::load_from_memory(&bytes)?.to_rgba8();
    Ok(Frame::from_rgba_image(orientation.apply(image)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba};

    use super::*;

    fn marked_image() -> RgbaImage {
        // 3x2, red marker in the top-left corner.
        let mut img = RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img
    }

    fn encode(image: DynamicImage, format: ImageFormat) -> String {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        BASE64_STANDARD.encode(buf.into_inner())
    }

    fn red_at(frame: &Frame, x: u32, y: u32) -> bool {
        let idx = ((y * frame.width + x) * 4) as usize;
        frame.rgba[idx] == 255 && frame.rgba[idx + 1] == 0
    }

    #[test]
    fn decodes_png_without_correction() {
        let payload = encode(DynamicImage::ImageRgba8(marked_image()), ImageFormat::Png);
        let frame = decode_frame(&payload, Orientation::default()).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.rgba.len(), 3 * 2 * 4);
        assert!(red_at(&frame, 0, 0));
    }

    #[test]
    fn mobile_correction_rotates_then_mirrors() {
        let payload = encode(DynamicImage::ImageRgba8(marked_image()), ImageFormat::Png);
        let frame = decode_frame(&payload, Orientation::mobile_front_camera()).unwrap();

        // Rotating 90 degrees clockwise moves top-left to top-right; the mirror
        // brings it back to top-left of the 2x3 result.
        assert_eq!((frame.width, frame.height), (2, 3));
        assert!(red_at(&frame, 0, 0));

        let rotated_only = Orientation {
            rotation: Rotation::Cw90,
            mirror: false,
        };
        let frame = decode_frame(&payload, rotated_only).unwrap();
        assert!(red_at(&frame, 1, 0));
    }

    #[test]
    fn grayscale_images_become_rgba() {
        let gray = GrayImage::from_pixel(4, 4, Luma([128]));
        let payload = encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png);
        let frame = decode_frame(&payload, Orientation::default()).unwrap();
        assert_eq!(&frame.rgba[..4], &[128, 128, 128, 255]);
    }

    #[test]
    fn accepts_data_urls() {
        let payload = encode(DynamicImage::ImageRgba8(marked_image()), ImageFormat::Png);
        let url = format!("data:image/png;base64,{payload}");
        assert!(decode_frame(&url, Orientation::default()).is_ok());

        let not_base64 = format!("data:image/png,{payload}");
        assert!(matches!(
            decode_base64_payload(&not_base64),
            Err(FrameError::DataUrl(_))
        ));
    }

    #[test]
    fn ignores_line_breaks_inside_payload() {
        let bytes: Vec<u8> = (0..120u8).collect();
        let encoded = BASE64_STANDARD.encode(&bytes);
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));
        assert_eq!(decode_base64_payload(&wrapped).unwrap(), bytes);

        let url = format!("data:image/png;base64,{}", wrapped.replace("\r\n", "\n "));
        assert_eq!(decode_base64_payload(&url).unwrap(), bytes);
    }

    #[test]
    fn reports_bad_payloads() {
        assert!(matches!(
            decode_base64_payload("!!not base64!!"),
            Err(FrameError::Base64(_))
        ));
        assert!(matches!(decode_base64_payload("   "), Err(FrameError::Empty)));

        let garbage = BASE64_STANDARD.encode(b"definitely not an image");
        assert!(matches!(
            decode_frame(&garbage, Orientation::default()),
            Err(FrameError::Image(_))
        ));
    }

    #[test]
    fn rotation_degrees_round_trip() {
        for degrees in [0, 90, 180, 270] {
            assert_eq!(Rotation::from_degrees(degrees).unwrap().degrees(), degrees);
        }
        assert_eq!(Rotation::from_degrees(45), None);
    }
}

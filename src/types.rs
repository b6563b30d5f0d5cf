use serde::Serialize;

/// Decoded camera frame, tightly packed RGBA8.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            rgba: image.into_raw(),
            width,
            height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Best label plus the ranked top-k list from a single model run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classification {
    pub best: Prediction,
    pub top: Vec<Prediction>,
}

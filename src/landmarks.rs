//! Hand landmark vectors and the wrist-relative normalization applied before
//! classification.

use crate::error::LandmarkError;

pub const NUM_LANDMARKS: usize = 21;
pub const LANDMARK_VALUES: usize = NUM_LANDMARKS * 3;

/// 21 hand points flattened as `[x0, y0, z0, x1, y1, z1, ...]`. Point 0 is the wrist.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkVector([f32; LANDMARK_VALUES]);

impl LandmarkVector {
    pub fn from_slice(values: &[f32]) -> Result<Self, LandmarkError> {
        let array: [f32; LANDMARK_VALUES] =
            values.try_into().map_err(|_| LandmarkError::Length {
                expected: LANDMARK_VALUES,
                actual: values.len(),
            })?;
        Ok(Self(array))
    }

    pub fn from_points(points: &[[f32; 3]]) -> Result<Self, LandmarkError> {
        if points.len() != NUM_LANDMARKS {
            return Err(LandmarkError::Length {
                expected: LANDMARK_VALUES,
                actual: points.len() * 3,
            });
        }
        let mut values = [0.0; LANDMARK_VALUES];
        for (dst, src) in values.chunks_exact_mut(3).zip(points) {
            dst.copy_from_slice(src);
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn point(&self, index: usize) -> Option<[f32; 3]> {
        let base = index.checked_mul(3)?;
        let p = self.0.get(base..base + 3)?;
        Some([p[0], p[1], p[2]])
    }

    pub fn wrist(&self) -> [f32; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Re-expresses every point relative to the wrist. The wrist itself becomes
    /// exactly `(0, 0, 0)`; rotation and scale are left untouched.
    pub fn normalized(&self) -> Self {
        let [wx, wy, wz] = self.wrist();
        let mut out = self.0;
        for point in out.chunks_exact_mut(3) {
            point[0] -= wx;
            point[1] -= wy;
            point[2] -= wz;
        }
        Self(out)
    }
}

impl AsRef<[f32]> for LandmarkVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

impl TryFrom<&[f32]> for LandmarkVector {
    type Error = LandmarkError;

    fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
        Self::from_slice(values)
    }
}

/// Validates a raw 63-value vector and makes it wrist-relative.
pub fn normalize(raw: &[f32]) -> Result<LandmarkVector, LandmarkError> {
    Ok(LandmarkVector::from_slice(raw)?.normalized())
}

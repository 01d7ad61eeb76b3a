use crate::error::{ClassificationError, Result};

/// `width * height * channels` as a buffer length, or `InvalidInput` if it overflows.
pub(crate) fn checked_len(width: u32, height: u32, channels: u32, context: &str) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels as usize))
        .ok_or_else(|| {
            ClassificationError::InvalidInput(format!("{context} dimensions {width}x{height}x{channels} overflow"))
        })
}

/// Flattened row-major spatial grid of feature vectors.
///
/// Position `(row, col)` holds `channels` consecutive values starting at
/// `(row * width + col) * channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureFeatureMap {
    pub features: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl TextureFeatureMap {
    pub fn new(features: Vec<f32>, width: u32, height: u32, channels: u32) -> Result<Self> {
        let expected = checked_len(width, height, channels, "texture feature map")?;
        if features.len() != expected {
            return Err(ClassificationError::DimensionMismatch {
                context: "texture feature map".to_string(),
                expected,
                actual: features.len(),
            });
        }
        Ok(Self {
            features,
            width,
            height,
            channels,
        })
    }

    pub fn zeros(width: u32, height: u32, channels: u32) -> Self {
        Self {
            features: vec![0.0; width as usize * height as usize * channels as usize],
            width,
            height,
            channels,
        }
    }

    /// Number of spatial positions
    pub fn sequence_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature vector at a spatial position
    pub fn position(&self, index: usize) -> &[f32] {
        let c = self.channels as usize;
        &self.features[index * c..(index + 1) * c]
    }

    /// Halve the spatial resolution by averaging 2x2 blocks, channel by channel.
    ///
    /// A dimension of 1 is kept as is; odd trailing rows/columns are folded into the
    /// last block.
    pub fn downsample(&self) -> Self {
        if self.sequence_len() == 0 {
            return self.clone();
        }
        let new_width = (self.width / 2).max(1);
        let new_height = (self.height / 2).max(1);
        if new_width == self.width && new_height == self.height {
            return self.clone();
        }

        let channels = self.channels as usize;
        let mut features = vec![0.0f32; new_width as usize * new_height as usize * channels];
        let mut counts = vec![0u32; new_width as usize * new_height as usize];

        for y in 0..self.height {
            let ny = (y * new_height / self.height).min(new_height - 1);
            for x in 0..self.width {
                let nx = (x * new_width / self.width).min(new_width - 1);
                let src = (y * self.width + x) as usize * channels;
                let dst_pos = (ny * new_width + nx) as usize;
                let dst = dst_pos * channels;
                for c in 0..channels {
                    features[dst + c] += self.features[src + c];
                }
                counts[dst_pos] += 1;
            }
        }

        for (pos, &count) in counts.iter().enumerate() {
            if count > 1 {
                for value in &mut features[pos * channels..(pos + 1) * channels] {
                    *value /= count as f32;
                }
            }
        }

        Self {
            features,
            width: new_width,
            height: new_height,
            channels: self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        let result = TextureFeatureMap::new(vec![0.0; 5], 2, 2, 1);
        assert!(matches!(result, Err(ClassificationError::DimensionMismatch { expected: 4, actual: 5, .. })));
    }

    #[test]
    fn overflowing_shape_is_invalid_input() {
        let result = TextureFeatureMap::new(Vec::new(), u32::MAX, u32::MAX, 16);
        assert!(matches!(result, Err(ClassificationError::InvalidInput(_))));
        assert_eq!(checked_len(70_000, 70_000, 3, "grid").unwrap(), 14_700_000_000);
    }

    #[test]
    fn downsample_averages_blocks() {
        // 4x2 grid, one channel
        let map = TextureFeatureMap::new(vec![1.0, 3.0, 5.0, 7.0, 1.0, 3.0, 5.0, 7.0], 4, 2, 1).unwrap();
        let half = map.downsample();
        assert_eq!((half.width, half.height), (2, 1));
        assert_eq!(half.features, vec![2.0, 6.0]);
    }

    #[test]
    fn downsample_keeps_single_pixel() {
        let map = TextureFeatureMap::new(vec![0.5, 0.25], 1, 1, 2).unwrap();
        assert_eq!(map.downsample(), map);
    }
}

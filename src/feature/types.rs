use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::{EdgeError, EdgeResult};
use crate::native::NativeType;
use crate::tensor::{shape, DType};

/// Specialisation of a feature type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Array,
    Image,
    Audio { sample_rate: u32 },
    Text,
}

/// Image layout derived from a rank-4 shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// `(1, H, W, C)` when true, `(1, C, H, W)` otherwise
    pub interleaved: bool,
}

/// Audio layout derived from a `(1, C, F)` shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLayout {
    pub sample_rate: u32,
    pub channel_count: usize,
    pub frame_count: usize,
}

/// Name, data type and shape of a feature, independent of any buffer.
///
/// Shapes use `-1` for one dynamic axis. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureType {
    name: Option<String>,
    dtype: DType,
    shape: Option<Vec<isize>>,
    kind: FeatureKind,
}

impl FeatureType {
    pub fn array(name: Option<String>, dtype: DType, shape: Option<Vec<isize>>) -> Self {
        Self {
            name,
            dtype,
            shape,
            kind: FeatureKind::Array,
        }
    }

    /// Planar RGB `u8` image, shape `(1, 3, height, width)`
    pub fn image(width: usize, height: usize) -> Self {
        Self {
            name: None,
            dtype: DType::U8,
            shape: Some(vec![1, 3, height as isize, width as isize]),
            kind: FeatureKind::Image,
        }
    }

    pub fn image_with_shape(name: Option<String>, dtype: DType, shape: Vec<isize>) -> EdgeResult<Self> {
        if shape.len() != 4 {
            return Err(EdgeError::shape_error(&shape, "image features need a rank 4 shape"));
        }
        shape::dynamic_axis(&shape)?;
        Ok(Self {
            name,
            dtype,
            shape: Some(shape),
            kind: FeatureKind::Image,
        })
    }

    /// Planar `f32` audio, shape `(1, channel_count, frame_count)`
    pub fn audio(sample_rate: u32, channel_count: usize, frame_count: usize) -> Self {
        Self {
            name: None,
            dtype: DType::F32,
            shape: Some(vec![1, channel_count as isize, frame_count as isize]),
            kind: FeatureKind::Audio { sample_rate },
        }
    }

    /// UTF-8 text of `length` bytes
    pub fn text(length: usize) -> Self {
        Self {
            name: None,
            dtype: DType::String,
            shape: Some(vec![length as isize]),
            kind: FeatureKind::Text,
        }
    }

    /// Raw string array of `length` bytes
    pub fn string(length: usize) -> Self {
        Self::array(None, DType::String, Some(vec![length as isize]))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Interpret an engine-reported type.
    ///
    /// Sequence, dictionary and undefined types have no feature representation.
    pub fn from_native(native: &NativeType) -> Option<Self> {
        let shape: Vec<isize> = native.shape.iter().map(|&d| d as isize).collect();
        let kind = match native.dtype {
            DType::Undefined | DType::Sequence | DType::Dictionary => return None,
            DType::String => FeatureKind::Text,
            DType::Image => FeatureKind::Image,
            dtype if dtype.is_tensor() && shape.len() == 4 => FeatureKind::Image,
            _ => FeatureKind::Array,
        };
        Some(Self {
            name: native.name.clone(),
            dtype: native.dtype,
            shape: Some(shape),
            kind,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> Option<&[isize]> {
        self.shape.as_deref()
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn rank(&self) -> usize {
        self.shape.as_ref().map_or(0, Vec::len)
    }

    /// Check the shape has at most one dynamic axis and no zero or negative sizes
    pub fn validate(&self) -> EdgeResult<()> {
        match &self.shape {
            Some(shape) => shape::dynamic_axis(shape).map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn is_fully_specified(&self) -> bool {
        self.shape.as_deref().is_some_and(shape::is_fully_specified)
    }

    /// Element count of a fully specified shape
    pub fn element_count(&self) -> Option<usize> {
        let shape = self.shape.as_deref().filter(|s| shape::is_fully_specified(s))?;
        Some(shape.iter().map(|&d| d as usize).product())
    }

    /// Image layout for rank-4 image types
    pub fn image_layout(&self) -> Option<ImageLayout> {
        if self.kind != FeatureKind::Image {
            return None;
        }
        let shape = self.shape.as_deref().filter(|s| s.len() == 4)?;
        let interleaved = shape[1] > shape[3];
        let (height, width, channels) = if interleaved {
            (shape[1], shape[2], shape[3])
        } else {
            (shape[2], shape[3], shape[1])
        };
        Some(ImageLayout {
            width: width.max(0) as usize,
            height: height.max(0) as usize,
            channels: channels.max(0) as usize,
            interleaved,
        })
    }

    /// Audio layout for audio types
    pub fn audio_layout(&self) -> Option<AudioLayout> {
        let FeatureKind::Audio { sample_rate } = self.kind else {
            return None;
        };
        let shape = self.shape.as_deref().filter(|s| s.len() == 3)?;
        Some(AudioLayout {
            sample_rate,
            channel_count: shape[1].max(0) as usize,
            frame_count: shape[2].max(0) as usize,
        })
    }

    /// Byte length of text types
    pub fn text_length(&self) -> Option<usize> {
        if self.dtype != DType::String {
            return None;
        }
        self.element_count()
    }
}

impl Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}: ", name)?;
        }
        match &self.shape {
            Some(shape) => {
                let dims: Vec<String> = shape.iter().map(isize::to_string).collect();
                write!(f, "({}) {}", dims.join(", "), self.dtype)
            }
            None => write!(f, "<shapeless> {}", self.dtype),
        }
    }
}

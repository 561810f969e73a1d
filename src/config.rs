//! Layer configuration.
//!
//! Each core layer is described by a plain struct that can be built in code
//! or deserialised from JSON. Optional fields take serde defaults (padding
//! `0`, stride `1`, a per-layer default activation).
//!
//! # Example
//!
//! ```json
//! {
//!   "input_height": 4,
//!   "input_width": 4,
//!   "input_channels": 1,
//!   "kernel_size": 3,
//!   "filters": 2,
//!   "padding": 1
//! }
//! ```
//!
//! Configurations are validated eagerly: constructors and [`load_config`]
//! both call [`LayerConfig::validate`], so a layer that exists always has
//! positive output dimensions.

use crate::activations::Activation;
use crate::error::{LayerError, LayerResult};
use crate::ops::conv::Conv2dGeometry;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Common validation hook for layer configurations.
pub trait LayerConfig {
    /// Checks every invariant the layer constructor relies on.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] describing the first violated invariant.
    fn validate(&self) -> LayerResult<()>;
}

const fn default_stride() -> usize {
    1
}

const fn default_tanh() -> Activation {
    Activation::Tanh
}

fn spatial_output(
    height: usize,
    width: usize,
    kernel_size: usize,
    geometry: Conv2dGeometry,
) -> LayerResult<(usize, usize)> {
    match (
        geometry.output_extent(height, kernel_size),
        geometry.output_extent(width, kernel_size),
    ) {
        (Some(h), Some(w)) => Ok((h, w)),
        _ => Err(LayerError::config(format!(
            "kernel {kernel_size} with padding {} and stride {} leaves no output for a {height}x{width} input",
            geometry.padding, geometry.stride
        ))),
    }
}

fn require_positive(fields: &[(&str, usize)]) -> LayerResult<()> {
    for &(name, value) in fields {
        if value == 0 {
            return Err(LayerError::config(format!("{name} must be positive")));
        }
    }
    Ok(())
}

/// Configuration of a [`ConvolutionalLayer`](crate::layers::ConvolutionalLayer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConvConfig {
    /// Height of the input feature map.
    pub input_height: usize,
    /// Width of the input feature map.
    pub input_width: usize,
    /// Channels of the input feature map.
    pub input_depth: usize,
    /// Side of the square kernel.
    pub kernel_size: usize,
    /// Number of output channels.
    pub filters: usize,
    /// Symmetric zero padding.
    #[serde(default)]
    pub padding: usize,
    /// Convolution stride.
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// Activation applied after the bias.
    #[serde(default)]
    pub activation: Activation,
}

impl ConvConfig {
    /// A stride-1, unpadded, linear convolution.
    #[must_use]
    pub const fn new(
        input_height: usize,
        input_width: usize,
        input_depth: usize,
        kernel_size: usize,
        filters: usize,
    ) -> Self {
        Self {
            input_height,
            input_width,
            input_depth,
            kernel_size,
            filters,
            padding: 0,
            stride: 1,
            activation: Activation::Identity,
        }
    }

    /// Sets the padding.
    #[must_use]
    pub const fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the stride.
    #[must_use]
    pub const fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Sets the activation.
    #[must_use]
    pub const fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Padding and stride as a [`Conv2dGeometry`].
    #[must_use]
    pub const fn geometry(&self) -> Conv2dGeometry {
        Conv2dGeometry::new(self.padding, self.stride)
    }

    /// `(out_height, out_width)`.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the output would be empty.
    pub fn output_hw(&self) -> LayerResult<(usize, usize)> {
        spatial_output(
            self.input_height,
            self.input_width,
            self.kernel_size,
            self.geometry(),
        )
    }
}

impl LayerConfig for ConvConfig {
    fn validate(&self) -> LayerResult<()> {
        require_positive(&[
            ("input_height", self.input_height),
            ("input_width", self.input_width),
            ("input_depth", self.input_depth),
            ("kernel_size", self.kernel_size),
            ("filters", self.filters),
            ("stride", self.stride),
        ])?;
        self.output_hw().map(|_| ())
    }
}

/// Configuration of a [`ConvLstmLayer`](crate::layers::ConvLstmLayer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConvLstmConfig {
    /// Height of each input frame.
    pub input_height: usize,
    /// Width of each input frame.
    pub input_width: usize,
    /// Channels of each input frame.
    pub input_channels: usize,
    /// Side of the square gate kernels. Must be odd so the hidden-state
    /// convolutions can keep the spatial shape.
    pub kernel_size: usize,
    /// Channels of the hidden and cell state.
    pub filters: usize,
    /// Padding of the input-side convolutions.
    #[serde(default)]
    pub padding: usize,
    /// Stride of the input-side convolutions.
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// Candidate and cell-squashing activation. Gates always use sigmoid.
    #[serde(default = "default_tanh")]
    pub activation: Activation,
}

impl ConvLstmConfig {
    /// A stride-1, unpadded cell with tanh activation.
    #[must_use]
    pub const fn new(
        input_height: usize,
        input_width: usize,
        input_channels: usize,
        kernel_size: usize,
        filters: usize,
    ) -> Self {
        Self {
            input_height,
            input_width,
            input_channels,
            kernel_size,
            filters,
            padding: 0,
            stride: 1,
            activation: Activation::Tanh,
        }
    }

    /// Sets the input-side padding.
    #[must_use]
    pub const fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the input-side stride.
    #[must_use]
    pub const fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Sets the candidate activation.
    #[must_use]
    pub const fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Geometry of the input-side convolutions.
    #[must_use]
    pub const fn input_geometry(&self) -> Conv2dGeometry {
        Conv2dGeometry::new(self.padding, self.stride)
    }

    /// Geometry of the hidden-side convolutions: stride 1, "same" padding.
    #[must_use]
    pub const fn hidden_geometry(&self) -> Conv2dGeometry {
        Conv2dGeometry::new(self.kernel_size / 2, 1)
    }

    /// `(out_height, out_width)` of every hidden state.
    ///
    /// # Errors
    /// [`LayerError::Configuration`] if the output would be empty.
    pub fn output_hw(&self) -> LayerResult<(usize, usize)> {
        spatial_output(
            self.input_height,
            self.input_width,
            self.kernel_size,
            self.input_geometry(),
        )
    }
}

impl LayerConfig for ConvLstmConfig {
    fn validate(&self) -> LayerResult<()> {
        require_positive(&[
            ("input_height", self.input_height),
            ("input_width", self.input_width),
            ("input_channels", self.input_channels),
            ("kernel_size", self.kernel_size),
            ("filters", self.filters),
            ("stride", self.stride),
        ])?;
        if self.kernel_size % 2 == 0 {
            return Err(LayerError::config(format!(
                "kernel_size {} must be odd",
                self.kernel_size
            )));
        }
        if !self.activation.is_elementwise() {
            return Err(LayerError::config(
                "the ConvLSTM candidate activation must be elementwise",
            ));
        }
        self.output_hw().map(|_| ())
    }
}

/// Configuration of a [`MemoryReadLayer`](crate::layers::MemoryReadLayer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryReadConfig {
    /// Width of each query row.
    pub input_dimension: usize,
    /// Width of each memory slot.
    pub memory_dimension: usize,
    /// Width of each output row.
    pub output_dimension: usize,
    /// Activation applied to the projected read.
    #[serde(default)]
    pub activation: Activation,
}

impl MemoryReadConfig {
    /// A linear memory read.
    #[must_use]
    pub const fn new(input_dimension: usize, memory_dimension: usize, output_dimension: usize) -> Self {
        Self {
            input_dimension,
            memory_dimension,
            output_dimension,
            activation: Activation::Identity,
        }
    }

    /// Sets the output activation.
    #[must_use]
    pub const fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

impl LayerConfig for MemoryReadConfig {
    fn validate(&self) -> LayerResult<()> {
        require_positive(&[
            ("input_dimension", self.input_dimension),
            ("memory_dimension", self.memory_dimension),
            ("output_dimension", self.output_dimension),
        ])
    }
}

/// Parses and validates a configuration from a JSON string.
///
/// # Errors
/// - [`LayerError::Config`] if the JSON is malformed
/// - [`LayerError::Configuration`] if the parsed values are invalid
pub fn parse_config<C: DeserializeOwned + LayerConfig>(json: &str) -> LayerResult<C> {
    let config: C = serde_json::from_str(json).map_err(|e| LayerError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates a configuration from a JSON file.
///
/// # Errors
/// - [`LayerError::Config`] if the file cannot be read or parsed
/// - [`LayerError::Configuration`] if the parsed values are invalid
pub fn load_config<C: DeserializeOwned + LayerConfig>(path: impl AsRef<Path>) -> LayerResult<C> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| LayerError::Config(format!("{}: {e}", path.display())))?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_applied() {
        let cfg: ConvLstmConfig = parse_config(
            r#"{"input_height":4,"input_width":4,"input_channels":1,"kernel_size":3,"filters":2,"padding":1}"#,
        )
        .unwrap();
        assert_eq!(cfg.stride, 1);
        assert_eq!(cfg.activation, Activation::Tanh);
        assert_eq!(cfg.output_hw().unwrap(), (4, 4));
    }

    #[test]
    fn test_memory_read_default_activation() {
        let cfg: MemoryReadConfig = parse_config(
            r#"{"input_dimension":4,"memory_dimension":4,"output_dimension":2}"#,
        )
        .unwrap();
        assert_eq!(cfg.activation, Activation::Identity);
    }

    #[test]
    fn test_kernel_larger_than_input_is_rejected() {
        let cfg = ConvConfig::new(2, 2, 1, 3, 1);
        assert!(matches!(cfg.validate(), Err(LayerError::Configuration(_))));
    }

    #[test]
    fn test_even_lstm_kernel_is_rejected() {
        let cfg = ConvLstmConfig::new(4, 4, 1, 2, 1);
        assert!(matches!(cfg.validate(), Err(LayerError::Configuration(_))));
    }

    #[test]
    fn test_zero_stride_is_rejected() {
        let cfg = ConvConfig::new(4, 4, 1, 1, 1).with_stride(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overflowing_padding_is_rejected() {
        let padding = usize::MAX / 2 + 1;
        let conv = format!(
            r#"{{"input_height":4,"input_width":4,"input_depth":1,"kernel_size":3,"filters":1,"padding":{padding}}}"#
        );
        assert!(matches!(
            parse_config::<ConvConfig>(&conv),
            Err(LayerError::Configuration(_))
        ));
        let lstm = format!(
            r#"{{"input_height":4,"input_width":4,"input_channels":1,"kernel_size":3,"filters":1,"padding":{padding}}}"#
        );
        assert!(matches!(
            parse_config::<ConvLstmConfig>(&lstm),
            Err(LayerError::Configuration(_))
        ));
    }

    #[test]
    fn test_malformed_json_reports_config_error() {
        let err = parse_config::<ConvConfig>("{").unwrap_err();
        assert!(matches!(err, LayerError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config::<ConvConfig>("does/not/exist.json").unwrap_err();
        assert!(matches!(err, LayerError::Config(_)));
    }
}

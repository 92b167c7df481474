//! Neural network configuration types.

use burn::config::Config;
use cascade_core::FusionLevels;

/// Configuration for a point-wise shared MLP.
#[derive(Config, Debug)]
pub struct SharedMlpConfig {
    /// Input channel width.
    pub input_dim: usize,

    /// Output width of each layer. Empty means identity.
    #[config(default = "vec![]")]
    pub widths: Vec<usize>,
}

impl SharedMlpConfig {
    /// Output channel width.
    pub fn output_dim(&self) -> usize {
        self.widths.last().copied().unwrap_or(self.input_dim)
    }
}

/// Configuration for feature fusion between two pyramid levels.
///
/// The dense `low_level` features are gathered at the points of the coarse
/// `high_level`, each side goes through its own MLP, and the concatenation
/// is compressed.
#[derive(Config, Debug)]
pub struct FusionConfig {
    /// Dense level whose features are recovered through the index chain.
    pub low_level: usize,

    /// Coarse level fused with the recovered features.
    pub high_level: usize,

    /// MLP applied to the high-level features.
    #[config(default = "vec![]")]
    pub high_mlp: Vec<usize>,

    /// MLP applied to the recovered low-level features.
    #[config(default = "vec![]")]
    pub low_mlp: Vec<usize>,

    /// MLP applied to the concatenation.
    #[config(default = "vec![]")]
    pub compress_mlp: Vec<usize>,
}

impl FusionConfig {
    /// The joined level pair.
    pub fn levels(&self) -> FusionLevels {
        FusionLevels::new(self.low_level, self.high_level)
    }

    /// Width after the high-level MLP.
    pub fn high_output(&self, high_channels: usize) -> usize {
        self.high_mlp.last().copied().unwrap_or(high_channels)
    }

    /// Width after the low-level MLP.
    pub fn low_output(&self, low_channels: usize) -> usize {
        self.low_mlp.last().copied().unwrap_or(low_channels)
    }

    /// Fused output width.
    pub fn output_channels(&self, high_channels: usize, low_channels: usize) -> usize {
        let concat = self.high_output(high_channels) + self.low_output(low_channels);
        self.compress_mlp.last().copied().unwrap_or(concat)
    }
}

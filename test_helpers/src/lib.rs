//! Test helpers for the strip alignment workspace
//!
//! Provides reproducible residual samples and a shared directory for test
//! artifacts such as diagnostic images.

use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::env;
use std::path::{Path, PathBuf};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Shape of synthetic residuals: Gaussian in X, flat in Y
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualShape {
    /// Center of the X Gaussian
    pub offset_x: f64,
    /// Center of the Y plateau
    pub offset_y: f64,
    /// Width of the X Gaussian
    pub sigma_x: f64,
    /// Half width of the Y plateau
    pub half_width_y: f64,
}

impl ResidualShape {
    /// Draw `count` residual pairs with a fixed seed.
    ///
    /// # Arguments
    /// * `count` - Number of pairs to draw
    /// * `seed` - RNG seed, equal seeds give equal samples
    pub fn sample(&self, count: usize, seed: u64) -> Vec<(f64, f64)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        // A non-positive width gives a degenerate distribution at the offset
        let normal = Normal::new(self.offset_x, self.sigma_x.max(0.0))
            .unwrap_or_else(|_| panic!("invalid sigma_x {}", self.sigma_x));
        let low = self.offset_y - self.half_width_y;
        let high = self.offset_y + self.half_width_y;
        (0..count)
            .map(|_| {
                let y = if high > low { rng.gen_range(low..high) } else { low };
                (normal.sample(&mut rng), y)
            })
            .collect()
    }
}

/// Returns the path to the project root directory.
///
/// This function searches for the project root by looking for the Cargo.toml file
/// that defines the workspace. It starts from the current directory and moves up
/// until it finds the workspace root.
///
/// # Returns
/// * Ok(PathBuf) - The path to the project root
/// * Err(TestHelperError) - If the project root could not be found
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {e}"))
            })?;

            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

/// Lazily initialized project root path
static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// Returns the directory for test artifacts, creating it if needed.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }

    output_dir
}

/// Returns a path within the output directory.
///
/// # Arguments
/// * `path` - The relative path within the output directory
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

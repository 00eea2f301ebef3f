//! Mono resampling using rubato

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::AnalysisError;

/// Resample a mono signal to `output_rate`
///
/// Returns a copy when the rates already match.
pub fn resample_mono(
    input: &[f32],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>, AnalysisError> {
    if input_rate == output_rate || input.is_empty() {
        return Ok(input.to_vec());
    }
    if input_rate == 0 || output_rate == 0 {
        return Err(AnalysisError::Decode(format!(
            "Invalid sample rate conversion {} -> {}",
            input_rate, output_rate
        )));
    }

    debug!("Resampling from {}Hz to {}Hz", input_rate, output_rate);

    let mut resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        input.len(),
        1,
    )
    .map_err(|e| AnalysisError::Pipeline(format!("Failed to create resampler: {}", e)))?;

    let planar_input = vec![input.to_vec()];
    let mut planar_output = resampler
        .process(&planar_input, None)
        .map_err(|e| AnalysisError::Pipeline(format!("Resampling failed: {}", e)))?;

    let output = planar_output.pop().unwrap_or_default();
    debug!(
        "Resampled {} input frames to {} output frames",
        input.len(),
        output.len()
    );
    Ok(output)
}

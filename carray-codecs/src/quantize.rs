//! Lossy rounding of float buffers to a fixed number of significant decimal
//! digits, applied before compression (spec §4.2).

use crate::params::{FloatWidth, QuantizeSpec};

fn round_to_digits(v: f64, digits: u32) -> f64 {
    if v == 0.0 || !v.is_finite() {
        return v;
    }
    let exponent = v.abs().log10().floor();
    let factor = 10f64.powf(digits as f64 - 1.0 - exponent);
    if !factor.is_finite() || factor == 0.0 {
        return v;
    }
    (v * factor).round() / factor
}

/// Quantize `buf` in place, interpreting it as packed `f32`/`f64` values.
pub fn quantize(buf: &mut [u8], spec: QuantizeSpec) {
    match spec.width {
        FloatWidth::F32 => {
            for chunk in buf.chunks_exact_mut(4) {
                let bytes: [u8; 4] = chunk.try_into().unwrap();
                let v = f32::from_le_bytes(bytes);
                let rounded = round_to_digits(v as f64, spec.digits) as f32;
                chunk.copy_from_slice(&rounded.to_le_bytes());
            }
        }
        FloatWidth::F64 => {
            for chunk in buf.chunks_exact_mut(8) {
                let bytes: [u8; 8] = chunk.try_into().unwrap();
                let v = f64::from_le_bytes(bytes);
                let rounded = round_to_digits(v, spec.digits);
                chunk.copy_from_slice(&rounded.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_f64_reduces_precision() {
        let v = std::f64::consts::PI;
        let mut buf = v.to_le_bytes().to_vec();
        quantize(
            &mut buf,
            QuantizeSpec {
                digits: 3,
                width: FloatWidth::F64,
            },
        );
        let rounded = f64::from_le_bytes(buf.try_into().unwrap());
        assert_eq!(rounded, 3.14);
    }

    #[test]
    fn quantize_preserves_zero() {
        let mut buf = 0f64.to_le_bytes().to_vec();
        quantize(
            &mut buf,
            QuantizeSpec {
                digits: 2,
                width: FloatWidth::F64,
            },
        );
        assert_eq!(f64::from_le_bytes(buf.try_into().unwrap()), 0.0);
    }

    #[test]
    fn quantize_whole_buffer_of_values() {
        let values = [1.23456f64, 9.87654, 0.0, -42.0];
        let mut buf = bytemuck::cast_slice(&values).to_vec();
        quantize(
            &mut buf,
            QuantizeSpec {
                digits: 3,
                width: FloatWidth::F64,
            },
        );
        let rounded: &[f64] = bytemuck::cast_slice(&buf);
        assert_eq!(rounded, [1.23, 9.88, 0.0, -42.0]);
    }
}

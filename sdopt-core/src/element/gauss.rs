//! Gauss-Legendre quadrature on lines, quadrilaterals and hexahedra.
//!
//! ```
//! use sdopt_core::element::gauss::{gauss_1d, gauss_hex};
//!
//! // ∫_{-1}^{1} x² dx = 2/3
//! let integral: f64 = gauss_1d(2).iter().map(|&(x, w)| x * x * w).sum();
//! assert!((integral - 2.0 / 3.0).abs() < 1e-14);
//! assert_eq!(gauss_hex(2).len(), 8);
//! ```

/// A quadrature point in natural coordinates with its weight.
#[derive(Debug, Clone, Copy)]
pub struct GaussPoint {
    /// Natural coordinates [ξ, η, ζ] in [-1, 1]³; unused axes are zero.
    pub coords: [f64; 3],
    pub weight: f64,
}

impl GaussPoint {
    pub fn new(coords: [f64; 3], weight: f64) -> Self {
        Self { coords, weight }
    }

    #[inline]
    pub fn xi(&self) -> f64 {
        self.coords[0]
    }

    #[inline]
    pub fn eta(&self) -> f64 {
        self.coords[1]
    }

    #[inline]
    pub fn zeta(&self) -> f64 {
        self.coords[2]
    }
}

/// 1D Gauss-Legendre points and weights on [-1, 1].
///
/// `n` points integrate polynomials of degree `2n - 1` exactly. Orders above
/// three are served by the 3-point rule.
pub fn gauss_1d(n: usize) -> Vec<(f64, f64)> {
    match n {
        0 | 1 => vec![(0.0, 2.0)],
        2 => {
            let p = 1.0 / 3.0_f64.sqrt();
            vec![(-p, 1.0), (p, 1.0)]
        }
        _ => {
            let p = (3.0 / 5.0_f64).sqrt();
            vec![(-p, 5.0 / 9.0), (0.0, 8.0 / 9.0), (p, 5.0 / 9.0)]
        }
    }
}

/// Tensor-product rule on the reference square, ξ outermost.
pub fn gauss_quad(n: usize) -> Vec<GaussPoint> {
    let rule = gauss_1d(n);
    let mut points = Vec::with_capacity(rule.len() * rule.len());
    for &(xi, w_xi) in &rule {
        for &(eta, w_eta) in &rule {
            points.push(GaussPoint::new([xi, eta, 0.0], w_xi * w_eta));
        }
    }
    points
}

/// Tensor-product rule on the reference cube.
pub fn gauss_hex(n: usize) -> Vec<GaussPoint> {
    let rule = gauss_1d(n);
    let mut points = Vec::with_capacity(rule.len().pow(3));
    for &(xi, w_xi) in &rule {
        for &(eta, w_eta) in &rule {
            for &(zeta, w_zeta) in &rule {
                points.push(GaussPoint::new([xi, eta, zeta], w_xi * w_eta * w_zeta));
            }
        }
    }
    points
}

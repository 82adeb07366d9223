use ndarray::{s, Array1, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

/// Quadratic state value `½xᵀV x + vᵀx + v0` per step.
///
/// `v0_softmax` is the constant of the soft (log-partition) value used by
/// the GPS dual; the iLQR recursion leaves it and `v0` at zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuadraticStateValue {
    pub nb_xdim: usize,
    pub nb_steps: usize,
    pub vxx: Array3<f64>,
    pub vx: Array2<f64>,
    pub v0: Array1<f64>,
    pub v0_softmax: Array1<f64>,
}

impl QuadraticStateValue {
    pub fn new(nb_xdim: usize, nb_steps: usize) -> Self {
        QuadraticStateValue {
            nb_xdim,
            nb_steps,
            vxx: Array3::zeros((nb_steps, nb_xdim, nb_xdim)),
            vx: Array2::zeros((nb_steps, nb_xdim)),
            v0: Array1::zeros(nb_steps),
            v0_softmax: Array1::zeros(nb_steps),
        }
    }

    pub fn vxx_at(&self, t: usize) -> ArrayView2<f64> {
        self.vxx.slice(s![t, .., ..])
    }
}

/// Quadratic state-action value per step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuadraticStateActionValue {
    pub nb_xdim: usize,
    pub nb_udim: usize,
    pub nb_steps: usize,
    pub qxx: Array3<f64>,
    /// Shape `(nb_steps, du, dx)`
    pub qux: Array3<f64>,
    pub quu: Array3<f64>,
    pub qx: Array2<f64>,
    pub qu: Array2<f64>,
    pub q0: Array1<f64>,
    pub q0_softmax: Array1<f64>,
}

impl QuadraticStateActionValue {
    pub fn new(nb_xdim: usize, nb_udim: usize, nb_steps: usize) -> Self {
        QuadraticStateActionValue {
            nb_xdim,
            nb_udim,
            nb_steps,
            qxx: Array3::zeros((nb_steps, nb_xdim, nb_xdim)),
            qux: Array3::zeros((nb_steps, nb_udim, nb_xdim)),
            quu: Array3::zeros((nb_steps, nb_udim, nb_udim)),
            qx: Array2::zeros((nb_steps, nb_xdim)),
            qu: Array2::zeros((nb_steps, nb_udim)),
            q0: Array1::zeros(nb_steps),
            q0_softmax: Array1::zeros(nb_steps),
        }
    }
}

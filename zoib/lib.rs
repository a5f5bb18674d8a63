#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod density;
pub mod dual;
pub mod estimate;
pub mod faer_ndarray;
pub mod gradient;
pub mod laplace;
pub mod matrix;
pub mod model;
pub mod objective;
pub mod params;
pub mod priors;
pub mod scalar;
pub mod transforms;

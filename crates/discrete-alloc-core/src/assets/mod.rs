pub mod data;

pub use data::{AssetData, CovarianceSpectrum};

//! Export of DES supernova light curves and image metadata.
//!
//! The programs under `src/bin` select candidates from the supernova
//! database, query their photometry or overlapping images, keep the latest
//! processing run of every exposure and write the result as delimited text,
//! JSON, SALT2 or a multi-candidate FITS file.
pub mod cli;
pub mod lightcurve;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod reduce;
pub mod transform;
pub mod utils;
pub mod writer;

pub use dessn_config as conf;
pub use dessn_db as db;

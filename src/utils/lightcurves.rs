use std::fmt;
use std::str::FromStr;

/// Fixed zero point of the forced photometry fluxes
pub const SNFORCE_ZP: f64 = 31.4;
/// Photometric system label attached to every photometry row
pub const MAG_SYS: &str = "ab";

/// Zero point implied by a magnitude and the flux it was computed from.
///
/// Returns `None` when the flux is not positive (the logarithm is undefined)
/// or either input is not finite.
pub fn zero_point_from_mag(mag: f64, flux: f64) -> Option<f64> {
    if !(flux > 0.0) || !mag.is_finite() || !flux.is_finite() {
        return None;
    }
    Some(mag + 2.5 * flux.log10())
}

/// DECam filters used by the supernova fields.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash, PartialOrd, Ord)]
pub enum Band {
    G,
    R,
    I,
    Z,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::G, Band::R, Band::I, Band::Z];

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::G => "g",
            Band::R => "r",
            Band::I => "i",
            Band::Z => "z",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Band::G => 0,
            Band::R => 1,
            Band::I => 2,
            Band::Z => 3,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown band code {0:?}")]
pub struct UnknownBand(pub String);

impl FromStr for Band {
    type Err = UnknownBand;

    /// The database stores single-letter codes, sometimes space padded
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "g" => Ok(Band::G),
            "r" => Ok(Band::R),
            "i" => Ok(Band::I),
            "z" => Ok(Band::Z),
            other => Err(UnknownBand(other.to_string())),
        }
    }
}

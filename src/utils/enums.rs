use std::fmt;

use dessn_config::TablesConfig;

/// Source of the photometry rows.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhotometryTable {
    /// Search photometry from the difference-imaging pipeline
    Snobs,
    /// Forced photometry at the candidate position
    Snforce,
}

impl PhotometryTable {
    pub fn as_str(&self) -> &str {
        match self {
            PhotometryTable::Snobs => "SNOBS",
            PhotometryTable::Snforce => "SNFORCE",
        }
    }

    /// Physical table name, as configured
    pub fn table_name<'a>(&self, tables: &'a TablesConfig) -> &'a str {
        match self {
            PhotometryTable::Snobs => &tables.snobs,
            PhotometryTable::Snforce => &tables.snforce,
        }
    }

    /// Forced photometry is measured on every chip overlapping the candidate,
    /// so one exposure can carry several CCD rows that must stay distinct.
    pub fn grouping(&self) -> Grouping {
        match self {
            PhotometryTable::Snobs => Grouping::Exposure,
            PhotometryTable::Snforce => Grouping::ExposureCcd,
        }
    }
}

impl fmt::Display for PhotometryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keys a result set is grouped by before latest-run reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grouping {
    Exposure,
    ExposureCcd,
}

/// How candidates carrying a fake (injected) supernova are treated.
#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum FakePolicy {
    #[default]
    Exclude,
    Include,
    Only,
}

impl FakePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FakePolicy::Exclude => "exclude",
            FakePolicy::Include => "include",
            FakePolicy::Only => "only",
        }
    }
}

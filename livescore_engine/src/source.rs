//! Writer sources and their conflict-resolution priorities.
//!
//! The table is fixed for the lifetime of the process. Changing a priority is a deploy, not a runtime switch.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// Manual corrections from the admin tool.
    Admin,
    /// The stuck-match watchdog.
    Watchdog,
    /// The live-score ingestion feed.
    Api,
    /// Periodic reconciliation against the data provider.
    Sync,
    /// Values derived locally, such as the match minute.
    Computed,
    /// Bulk data refreshes.
    DataUpdate,
    Unknown,
}

impl Source {
    pub const ALL: [Source; 7] =
        [Source::Admin, Source::Watchdog, Source::Api, Source::Sync, Source::Computed, Source::DataUpdate, Source::Unknown];

    pub fn priority(&self) -> u8 {
        match self {
            Source::Admin => 10,
            Source::Watchdog => 3,
            Source::Api => 2,
            Source::Sync => 2,
            Source::Computed => 1,
            Source::DataUpdate => 1,
            Source::Unknown => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Admin => "admin",
            Source::Watchdog => "watchdog",
            Source::Api => "api",
            Source::Sync => "sync",
            Source::Computed => "computed",
            Source::DataUpdate => "dataUpdate",
            Source::Unknown => "unknown",
        }
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing never fails. Anything unrecognised is treated as [`Source::Unknown`], which has the lowest priority and
/// so can never clobber a known writer.
impl FromStr for Source {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = Source::ALL.iter().find(|src| src.as_str().eq_ignore_ascii_case(s.trim())).copied();
        Ok(source.unwrap_or(Source::Unknown))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn priority_order() {
        use Source::*;
        assert!(Admin.priority() > Watchdog.priority());
        assert!(Watchdog.priority() > Api.priority());
        assert_eq!(Api.priority(), Sync.priority());
        assert!(Sync.priority() > Computed.priority());
        assert_eq!(Computed.priority(), DataUpdate.priority());
        assert!(DataUpdate.priority() > Unknown.priority());
        assert_eq!(Unknown.priority(), 0);
    }

    #[test]
    fn parse_sources() {
        assert_eq!("admin".parse::<Source>().unwrap(), Source::Admin);
        assert_eq!("dataUpdate".parse::<Source>().unwrap(), Source::DataUpdate);
        assert_eq!("DATAUPDATE".parse::<Source>().unwrap(), Source::DataUpdate);
        assert_eq!("scraper".parse::<Source>().unwrap(), Source::Unknown);
        assert_eq!("".parse::<Source>().unwrap(), Source::Unknown);
    }
}

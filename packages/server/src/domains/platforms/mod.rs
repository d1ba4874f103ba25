//! Storefront platform identities and configuration.

pub mod config;
pub mod fetch;

pub use config::{ExclusionPolicy, PlatformCatalog, PlatformConfig, SchedulerSettings};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

/// How a platform's live snapshot is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// HTTP or GraphQL API.
    Api,
    /// Headless-browser scrape.
    Browser,
    /// Internal queues with no storefront behind them.
    None,
}

/// The six storefronts, plus the internal queues sharing the job substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Hwahae,
    Oliveyoung,
    Musinsa,
    Ably,
    Zigzag,
    Kurly,
    /// Watcher check queue.
    Alert,
    /// Ad-hoc jobs submitted through the control surface.
    Default,
}

impl Platform {
    pub const STOREFRONTS: [Platform; 6] = [
        Platform::Hwahae,
        Platform::Oliveyoung,
        Platform::Musinsa,
        Platform::Ably,
        Platform::Zigzag,
        Platform::Kurly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Hwahae => "hwahae",
            Platform::Oliveyoung => "oliveyoung",
            Platform::Musinsa => "musinsa",
            Platform::Ably => "ably",
            Platform::Zigzag => "zigzag",
            Platform::Kurly => "kurly",
            Platform::Alert => "alert",
            Platform::Default => "default",
        }
    }

    pub fn fetch_kind(&self) -> FetchKind {
        match self {
            Platform::Hwahae | Platform::Oliveyoung | Platform::Musinsa => FetchKind::Api,
            Platform::Ably | Platform::Zigzag | Platform::Kurly => FetchKind::Browser,
            Platform::Alert | Platform::Default => FetchKind::None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hwahae" => Ok(Platform::Hwahae),
            "oliveyoung" => Ok(Platform::Oliveyoung),
            "musinsa" => Ok(Platform::Musinsa),
            "ably" => Ok(Platform::Ably),
            "zigzag" => Ok(Platform::Zigzag),
            "kurly" => Ok(Platform::Kurly),
            "alert" => Ok(Platform::Alert),
            "default" => Ok(Platform::Default),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storefronts_split_between_api_and_browser() {
        let api = Platform::STOREFRONTS
            .iter()
            .filter(|p| p.fetch_kind() == FetchKind::Api)
            .count();
        let browser = Platform::STOREFRONTS
            .iter()
            .filter(|p| p.fetch_kind() == FetchKind::Browser)
            .count();
        assert_eq!(api, 3);
        assert_eq!(browser, 3);
    }

    #[test]
    fn round_trips_through_strings() {
        for platform in Platform::STOREFRONTS {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn rejects_unknown_tags() {
        assert!("gmarket".parse::<Platform>().is_err());
    }
}

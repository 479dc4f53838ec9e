use regex::Regex;

use crate::{Result, SnowcheckError};

/// Pieces of a `wasb[s]://container@account.endpoint/path` blob URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureLocation {
    pub container: String,
    pub account: String,
    pub endpoint: String,
    pub path: String,
}

impl AzureLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let pattern = Regex::new(r"^wasbs?://([^@]+)@([^.]+)\.([^/]+)/(.*)$")
            .map_err(|e| SnowcheckError::InvalidArgument(e.to_string()))?;

        let caps = pattern.captures(url).ok_or_else(|| {
            SnowcheckError::InvalidArgument(format!("Invalid Azure URL: {}", url))
        })?;

        Ok(Self {
            container: caps[1].to_string(),
            account: caps[2].to_string(),
            endpoint: caps[3].to_string(),
            path: caps[4].to_string(),
        })
    }

    /// Hadoop configuration key holding the SAS token for this container.
    pub fn sas_key(&self) -> String {
        format!(
            "fs.azure.sas.{}.{}.{}",
            self.container, self.account, self.endpoint
        )
    }
}

pub fn azure_sas_key(url: &str) -> Result<String> {
    AzureLocation::parse(url).map(|location| location.sas_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sas_key_from_wasbs_url() {
        let key = azure_sas_key("wasbs://stage@myaccount.blob.core.windows.net/unload/2024/").unwrap();
        assert_eq!(key, "fs.azure.sas.stage.myaccount.blob.core.windows.net");
    }

    #[test]
    fn test_sas_key_from_wasb_url() {
        let key = azure_sas_key("wasb://c1@acct.blob.core.windows.net/").unwrap();
        assert_eq!(key, "fs.azure.sas.c1.acct.blob.core.windows.net");
    }

    #[test]
    fn test_location_parts() {
        let location =
            AzureLocation::parse("wasbs://data@acct.blob.core.windows.net/a/b/c.csv").unwrap();
        assert_eq!(location.container, "data");
        assert_eq!(location.account, "acct");
        assert_eq!(location.endpoint, "blob.core.windows.net");
        assert_eq!(location.path, "a/b/c.csv");
    }

    #[test]
    fn test_invalid_urls() {
        for url in [
            "",
            "s3://bucket/key",
            "wasbs://no-account-separator.blob.core.windows.net/x",
            "wasbs://c@acct.blob.core.windows.net",
            "https://c@acct.blob.core.windows.net/x",
        ] {
            let err = azure_sas_key(url).unwrap_err();
            assert!(
                matches!(err, SnowcheckError::InvalidArgument(ref msg) if msg.contains(url)),
                "expected InvalidArgument for {:?}, got {:?}",
                url,
                err
            );
        }
    }
}

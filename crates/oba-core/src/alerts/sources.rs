//! The seams between the store and the network services.

use std::sync::Arc;

use oba_network::{
    AgencyAlert, AgencyWithCoverage, ApiClient, ObacoService, Operation, RestApiService,
};

use crate::config::Config;
use crate::error::Result;

/// Resolves the agencies served by the current region.
pub trait AgencyLookup: Send + Sync {
    fn agencies_with_coverage(&self) -> Operation<Vec<AgencyWithCoverage>>;
}

/// One alert provider. The store issues every configured source once the
/// agency list is known and merges whatever each one returns.
pub trait AlertSource: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &'static str;

    fn alerts(
        &self,
        agencies: &[AgencyWithCoverage],
        include_test_alerts: bool,
    ) -> Operation<Vec<AgencyAlert>>;
}

impl AgencyLookup for RestApiService {
    fn agencies_with_coverage(&self) -> Operation<Vec<AgencyWithCoverage>> {
        RestApiService::agencies_with_coverage(self)
    }
}

impl AlertSource for RestApiService {
    fn name(&self) -> &'static str {
        "regional"
    }

    /// The REST API has no notion of test alerts.
    fn alerts(&self, agencies: &[AgencyWithCoverage], _: bool) -> Operation<Vec<AgencyAlert>> {
        self.regional_alerts(agencies)
    }
}

impl AlertSource for ObacoService {
    fn name(&self) -> &'static str {
        "obaco"
    }

    fn alerts(
        &self,
        agencies: &[AgencyWithCoverage],
        include_test_alerts: bool,
    ) -> Operation<Vec<AgencyAlert>> {
        ObacoService::alerts(self, agencies, include_test_alerts)
    }
}

/// The services a configured region talks to.
pub struct RegionServices {
    pub rest: Arc<RestApiService>,
    pub obaco: Option<Arc<ObacoService>>,
}

impl RegionServices {
    /// Build one [`ApiClient`] per configured server.
    pub fn from_config(config: &Config) -> Result<Self> {
        let opts = config.client_options();
        let rest = RestApiService::new(ApiClient::new(&config.region.rest_base_url, &opts)?);
        let obaco = match &config.region.obaco_base_url {
            Some(base) => Some(Arc::new(ObacoService::new(
                ApiClient::new(base, &opts)?,
                config.region.region_id.clone(),
            ))),
            None => None,
        };
        Ok(Self {
            rest: Arc::new(rest),
            obaco,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn services_follow_region_config() {
        let mut cfg = Config::new("Test", "https://api.example.test");
        let services = RegionServices::from_config(&cfg).unwrap();
        assert!(services.obaco.is_none());
        assert_eq!(AlertSource::name(services.rest.as_ref()), "regional");

        cfg.region.obaco_base_url = Some("https://obaco.example.test".into());
        cfg.region.region_id = "7".into();
        let services = RegionServices::from_config(&cfg).unwrap();
        let obaco = services.obaco.unwrap();
        assert_eq!(obaco.region_id(), "7");
        assert_eq!(AlertSource::name(obaco.as_ref()), "obaco");
    }

    #[test]
    fn bad_base_url_is_an_error() {
        let cfg = Config::new("Test", "not a url");
        assert!(RegionServices::from_config(&cfg).is_err());
    }
}

use std::collections::HashSet;

use tracing::debug;

use crate::client::ApiClient;
use crate::operation::Operation;
use crate::types::{AgencyAlert, AgencyWithCoverage, ObacoAlertWire};

/// The Obaco companion service, scoped to one region.
#[derive(Debug, Clone)]
pub struct ObacoService {
    client: ApiClient,
    region_id: String,
}

impl ObacoService {
    pub fn new(client: ApiClient, region_id: impl Into<String>) -> Self {
        Self {
            client,
            region_id: region_id.into(),
        }
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    /// `/api/v1/regions/{regionId}/alerts.json`, restricted to `agencies`.
    ///
    /// With `include_test_alerts` the region's test alerts are requested too.
    pub fn alerts(
        &self,
        agencies: &[AgencyWithCoverage],
        include_test_alerts: bool,
    ) -> Operation<Vec<AgencyAlert>> {
        const LABEL: &str = "obaco-alerts";
        let mut params = Vec::new();
        if include_test_alerts {
            params.push(("test", "1".to_string()));
        }
        let url = match self.client.build_url(
            &["api", "v1", "regions", &self.region_id, "alerts.json"],
            &params,
        ) {
            Ok(url) => url,
            Err(e) => return Operation::spawn(LABEL, async move { Err(e) }),
        };

        let known: HashSet<String> = agencies.iter().map(|a| a.agency_id.clone()).collect();
        self.client
            .get_json(LABEL, url, move |wire: Vec<ObacoAlertWire>, _| {
                let total = wire.len();
                let alerts: Vec<AgencyAlert> = wire
                    .into_iter()
                    .map(AgencyAlert::from)
                    .filter(|a| {
                        a.agency_id
                            .as_ref()
                            .map(|id| known.contains(id))
                            .unwrap_or(false)
                    })
                    .collect();
                debug!(total, kept = alerts.len(), "obaco alerts filtered to known agencies");
                Ok(alerts)
            })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

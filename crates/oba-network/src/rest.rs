use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use reqwest::Url;
use tracing::debug;

use crate::client::{display_url, ApiClient};
use crate::operation::Operation;
use crate::types::{
    AgencyAlert, AgencyCoverageWire, AgencyWithCoverage, ListData, RestEnvelope, SituationWire,
};
use crate::{NetworkError, Result};

/// The OneBusAway REST API (`/api/where/...`).
#[derive(Debug, Clone)]
pub struct RestApiService {
    client: ApiClient,
}

impl RestApiService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// `/api/where/agencies-with-coverage.json`
    pub fn agencies_with_coverage(&self) -> Operation<Vec<AgencyWithCoverage>> {
        const LABEL: &str = "agencies-with-coverage";
        let url = match self
            .client
            .build_url(&["api", "where", "agencies-with-coverage.json"], &[])
        {
            Ok(url) => url,
            Err(e) => return Operation::spawn(LABEL, async move { Err(e) }),
        };

        self.client.get_json(
            LABEL,
            url,
            |envelope: RestEnvelope<ListData<AgencyCoverageWire>>, shown| {
                let data = unwrap_envelope(envelope, shown)?;
                let references = data.references;
                Ok(data
                    .list
                    .into_iter()
                    .map(|wire| wire.into_agency(&references))
                    .collect())
            },
        )
    }

    /// Alerts for every agency in `agencies`, one request per agency.
    ///
    /// The requests share the client's lanes and run concurrently. The
    /// operation fails as a whole if any agency's request fails.
    pub fn regional_alerts(&self, agencies: &[AgencyWithCoverage]) -> Operation<Vec<AgencyAlert>> {
        const LABEL: &str = "regional-alerts";
        let requests: Result<Vec<(String, Url)>> = agencies
            .iter()
            .map(|agency| {
                let file = format!("{}.json", agency.agency_id);
                self.client
                    .build_url(&["api", "where", "alerts-for-agency", &file], &[])
                    .map(|url| (agency.agency_id.clone(), url))
            })
            .collect();

        let client = self.client.clone();
        Operation::spawn(LABEL, async move {
            let requests = requests?;
            let fetches = requests.iter().map(|(agency_id, url)| {
                let client = &client;
                async move {
                    let envelope: RestEnvelope<ListData<SituationWire>> =
                        client.fetch_json(url).await?;
                    let data = unwrap_envelope(envelope, &display_url(url))?;
                    Ok::<_, NetworkError>(
                        data.list
                            .into_iter()
                            .map(|s| s.into_alert(agency_id))
                            .collect::<Vec<_>>(),
                    )
                }
            });
            let per_agency = try_join_all(fetches).await?;
            let alerts: Vec<AgencyAlert> = per_agency.into_iter().flatten().collect();
            debug!(agencies = requests.len(), alerts = alerts.len(), "regional alerts fetched");
            Ok(alerts)
        })
    }

    /// URL for `/api/where/arrival-and-departure-for-stop/{stopId}.json`.
    ///
    /// `stopSequence` is only sent when positive.
    pub fn arrival_departure_url(
        &self,
        stop_id: &str,
        trip_id: &str,
        service_date: DateTime<Utc>,
        vehicle_id: Option<&str>,
        stop_sequence: i64,
    ) -> Result<Url> {
        let mut params = vec![
            ("serviceDate", service_date.timestamp_millis().to_string()),
            ("tripId", trip_id.to_string()),
        ];
        if let Some(vehicle_id) = vehicle_id {
            params.push(("vehicleId", vehicle_id.to_string()));
        }
        if stop_sequence > 0 {
            params.push(("stopSequence", stop_sequence.to_string()));
        }
        let file = format!("{stop_id}.json");
        self.client.build_url(
            &["api", "where", "arrival-and-departure-for-stop", &file],
            &params,
        )
    }
}

/// Check the in-body status code and pull out `data`.
fn unwrap_envelope<D>(envelope: RestEnvelope<D>, url: &str) -> Result<D> {
    if !(200..300).contains(&envelope.code) {
        return Err(NetworkError::Status {
            url: url.to_string(),
            status: envelope.code,
        });
    }
    envelope
        .data
        .ok_or_else(|| NetworkError::parse(url, "response has no data"))
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::types::Severity;
    use mockito::Matcher;

    fn service(base: &str) -> RestApiService {
        let opts = ClientOptions {
            api_key: "k".into(),
            ..Default::default()
        };
        RestApiService::new(ApiClient::new(base, &opts).unwrap())
    }

    fn agency(id: &str) -> AgencyWithCoverage {
        AgencyWithCoverage {
            agency_id: id.into(),
            name: None,
            lat: 0.0,
            lon: 0.0,
            lat_span: 0.0,
            lon_span: 0.0,
        }
    }

    const AGENCIES_BODY: &str = r#"{
        "code": 200,
        "currentTime": 1700000000000,
        "text": "OK",
        "version": 2,
        "data": {
            "limitExceeded": false,
            "list": [
                {"agencyId": "1", "lat": 47.53, "latSpan": 0.70, "lon": -122.26, "lonSpan": 0.84},
                {"agencyId": "40", "lat": 47.51, "latSpan": 0.99, "lon": -122.41, "lonSpan": 1.01}
            ],
            "references": {
                "agencies": [
                    {"id": "1", "name": "Metro Transit"},
                    {"id": "40", "name": "Sound Transit"}
                ]
            }
        }
    }"#;

    #[test]
    fn arrival_departure_url_matches_api_shape() {
        let svc = service("https://api.example.test");
        let date = DateTime::from_timestamp_millis(1_343_631_600_000).unwrap();
        let url = svc
            .arrival_departure_url("1_75403", "1_18196913", date, Some("1_1234"), 0)
            .unwrap();
        assert_eq!(url.path(), "/api/where/arrival-and-departure-for-stop/1_75403.json");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("serviceDate".into(), "1343631600000".into())));
        assert!(pairs.contains(&("tripId".into(), "1_18196913".into())));
        assert!(pairs.contains(&("vehicleId".into(), "1_1234".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "stopSequence"));
    }

    #[test]
    fn arrival_departure_url_sends_positive_stop_sequence() {
        let svc = service("https://api.example.test");
        let url = svc
            .arrival_departure_url("s", "t", Utc::now(), None, 4)
            .unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "stopSequence" && v == "4"));
        assert!(!url.query_pairs().any(|(k, _)| k == "vehicleId"));
    }

    #[tokio::test]
    async fn agencies_with_coverage_joins_reference_names() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/where/agencies-with-coverage.json")
            .match_query(Matcher::UrlEncoded("key".into(), "k".into()))
            .with_status(200)
            .with_body(AGENCIES_BODY)
            .create_async()
            .await;

        let op = service(&server.url()).agencies_with_coverage();
        let result = op.wait().await.unwrap();
        let agencies = result.as_ref().as_ref().unwrap();
        assert_eq!(agencies.len(), 2);
        assert_eq!(agencies[0].agency_id, "1");
        assert_eq!(agencies[0].name.as_deref(), Some("Metro Transit"));
        assert!((agencies[1].lon_span - 1.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn envelope_error_code_is_a_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/where/agencies-with-coverage.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code": 401, "text": "permission denied"}"#)
            .create_async()
            .await;

        let op = service(&server.url()).agencies_with_coverage();
        let result = op.wait().await.unwrap();
        assert!(matches!(
            result.as_ref(),
            Err(NetworkError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn regional_alerts_fans_out_per_agency() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/api/where/alerts-for-agency/1.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"code":200,"data":{"list":[
                    {"id":"1_sit","severity":"SEVERE","summary":{"value":"Tunnel closed"},
                     "activeWindows":[{"from":1700000000000,"to":1700003600000}]}
                ]}}"#,
            )
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/api/where/alerts-for-agency/40.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"list":[]}}"#)
            .create_async()
            .await;

        let op = service(&server.url()).regional_alerts(&[agency("1"), agency("40")]);
        let result = op.wait().await.unwrap();
        let alerts = result.as_ref().as_ref().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, "1_sit");
        assert_eq!(alerts[0].agency_id.as_deref(), Some("1"));
        assert_eq!(alerts[0].severity, Severity::Severe);
        assert_eq!(alerts[0].title.as_deref(), Some("Tunnel closed"));
        assert_eq!(
            alerts[0].start_date,
            DateTime::from_timestamp_millis(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn regional_alerts_fails_when_one_agency_fails() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/api/where/alerts-for-agency/1.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"list":[]}}"#)
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/api/where/alerts-for-agency/40.json")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let op = service(&server.url()).regional_alerts(&[agency("1"), agency("40")]);
        let result = op.wait().await.unwrap();
        assert!(matches!(
            result.as_ref(),
            Err(NetworkError::Status { status: 502, .. })
        ));
    }
}

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    config::Settings,
    error::TorqueError,
    remote::{
        BlueprintSummary, RemoteService, Sandbox, SandboxFilter, SandboxRequest, ValidationReport,
    },
};

/// User agent sent with every request.
const USER_AGENT: &str = concat!("torque-cli/", env!("CARGO_PKG_VERSION"));

/// Source revision the service builds from.
#[derive(Debug, Serialize)]
struct SourcePayload<'a> {
    /// Branch name.
    branch: &'a str,
    /// Optional historic commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<&'a str>,
}

/// Body of a blueprint validation request.
#[derive(Debug, Serialize)]
struct ValidationPayload<'a> {
    /// Blueprint to validate.
    blueprint_name: &'a str,
    /// Where to find it.
    source: SourcePayload<'a>,
}

/// Body of a sandbox start request.
#[derive(Debug, Serialize)]
struct StartPayload<'a> {
    /// Sandbox display name.
    sandbox_name: &'a str,
    /// Blueprint to launch.
    blueprint_name: &'a str,
    /// ISO 8601 duration.
    duration: String,
    /// Blueprint input values.
    inputs: &'a BTreeMap<String, String>,
    /// Artifact paths per application.
    artifacts: &'a BTreeMap<String, String>,
    /// Where to find the blueprint.
    source: SourcePayload<'a>,
}

/// Response to a sandbox start request.
#[derive(Debug, Deserialize)]
struct StartResponse {
    /// Identifier of the new sandbox.
    id: String,
}

/// Error body returned by the service for failed requests.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    /// Individual errors.
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

/// One entry of an [`ErrorBody`].
#[derive(Debug, Deserialize)]
struct ErrorEntry {
    /// Error name.
    #[serde(default)]
    name: String,
    /// Error description.
    #[serde(default)]
    message: String,
}

/// [`RemoteService`] implementation talking to the Torque REST API.
#[derive(Debug, Clone)]
pub struct TorqueClient {
    /// Underlying HTTP client.
    http: Client,
    /// API root, ending in `/`.
    base_url: String,
    /// Service host, used for browser links.
    host: String,
    /// Space all requests are scoped to.
    space: String,
    /// Bearer token.
    token: String,
}

impl TorqueClient {
    /// Build a client for the host, space and token in `settings`.
    pub fn new(settings: &Settings) -> crate::Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TorqueError::Remote(format!("unable to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: format!("https://{}/api/", settings.host),
            host: settings.host.clone(),
            space: settings.space.clone(),
            token: settings.token.clone(),
        })
    }

    /// Full URL of an endpoint relative to the API root.
    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Endpoint scoped to the configured space.
    fn space_endpoint(&self, path: &str) -> String {
        self.url(&format!("spaces/{}/{path}", self.space))
    }

    /// Authenticate and send a request, turning error statuses into errors.
    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .context("unable to reach the Torque service")?;

        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "remote response");
        if status.as_u16() >= 400 {
            let body = response.text().unwrap_or_default();
            bail!("{}", error_message(status.as_u16(), &body));
        }
        Ok(response)
    }
}

impl TorqueClient {
    /// GET a space endpoint and decode its JSON body.
    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self.send(self.http.get(self.space_endpoint(path)).query(query))?;
        response
            .json()
            .with_context(|| format!("unexpected response from {path}"))
    }
}

/// Join the `errors[].name: message` entries of an error body, falling back to
/// the raw body or the status code.
fn error_message(status: u16, body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let joined = parsed
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.name, e.message))
        .collect::<Vec<_>>()
        .join(";");
    if !joined.is_empty() {
        joined
    } else if !body.trim().is_empty() {
        format!("HTTP {status}: {}", body.trim())
    } else {
        format!("HTTP {status}")
    }
}

/// ISO 8601 duration for a number of minutes.
fn iso_duration(minutes: u64) -> String {
    format!("PT{}H{}M", minutes / 60, minutes % 60)
}

impl RemoteService for TorqueClient {
    fn validate_blueprint(
        &self,
        blueprint: &str,
        branch: &str,
        commit: Option<&str>,
    ) -> Result<ValidationReport> {
        let payload = ValidationPayload {
            blueprint_name: blueprint,
            source: SourcePayload { branch, commit },
        };
        let response = self.send(
            self.http
                .post(self.space_endpoint("validations/blueprints"))
                .json(&payload),
        )?;
        response
            .json()
            .context("unexpected blueprint validation response")
    }

    fn start_sandbox(&self, request: &SandboxRequest) -> Result<String> {
        let payload = StartPayload {
            sandbox_name: &request.name,
            blueprint_name: &request.blueprint,
            duration: iso_duration(request.duration_minutes),
            inputs: &request.inputs,
            artifacts: &request.artifacts,
            source: SourcePayload {
                branch: &request.branch,
                commit: request.commit.as_deref(),
            },
        };
        let response = self.send(self.http.post(self.space_endpoint("sandbox")).json(&payload))?;
        let started: StartResponse = response
            .json()
            .context("unexpected sandbox start response")?;
        Ok(started.id)
    }

    fn sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        let response = self.send(
            self.http
                .get(self.space_endpoint(&format!("sandbox/{sandbox_id}"))),
        )?;
        response
            .json()
            .with_context(|| format!("unexpected response for sandbox {sandbox_id}"))
    }

    fn end_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.send(
            self.http
                .delete(self.space_endpoint(&format!("sandbox/{sandbox_id}"))),
        )?;
        Ok(())
    }

    fn sandbox_ui_link(&self, sandbox_id: &str) -> String {
        format!("https://{}/{}/sandboxes/{sandbox_id}", self.host, self.space)
    }

    fn list_blueprints(&self) -> Result<Vec<BlueprintSummary>> {
        self.get_json("blueprints", &[])
    }

    fn blueprint_detail(&self, name: &str) -> Result<serde_json::Value> {
        self.get_json(&format!("blueprints/{name}"), &[])
    }

    fn list_sandboxes(&self, filter: SandboxFilter, count: u32) -> Result<Vec<Sandbox>> {
        debug!(filter = filter.as_str(), count, "listing sandboxes");
        self.get_json(
            "sandbox",
            &[
                ("count", count.to_string()),
                ("filter", filter.as_str().to_string()),
            ],
        )
    }

    fn sandbox_detail(&self, sandbox_id: &str) -> Result<serde_json::Value> {
        self.get_json(&format!("sandbox/{sandbox_id}"), &[])
    }
}

use gale_http_client::prelude::HttpClientInstrumented;
use gale_runner::prelude::UserValuesConstraint;

/// Runner values for scenarios that target an HTTP API.
///
/// Populated by [crate::prelude::configure_http_client] in the setup hook. Both fields stay `None`
/// when no API URL was given, which entry functions treat as "nothing to do".
#[derive(Default, Debug)]
pub struct HttpRunnerContext {
    pub base_url: Option<String>,
    pub client: Option<HttpClientInstrumented>,
}

impl UserValuesConstraint for HttpRunnerContext {}

use crate::runner_context::HttpRunnerContext;
use anyhow::Context;
use gale_http_client::prelude::{HttpClientInstrumented, VuHttpClient};
use gale_runner::prelude::{HookResult, RunnerContext, UserValuesConstraint, VuContext};

/// Sets the `base_url` and `client` values in [HttpRunnerContext] from the `--api-url` option.
///
/// Call this from your setup hook:
/// ```rust
/// use gale_http_runner::prelude::{configure_http_client, HookResult, HttpRunnerContext, RunnerContext};
///
/// fn setup(ctx: &mut RunnerContext<HttpRunnerContext>) -> HookResult {
///     configure_http_client(ctx)?;
///     Ok(())
/// }
/// ```
///
/// If no URL was given a warning is logged and the context is left empty, so that entry functions
/// can return early. A URL that doesn't parse is an error.
pub fn configure_http_client(ctx: &mut RunnerContext<HttpRunnerContext>) -> HookResult {
    let Some(api_url) = ctx.api_url().map(|u| u.to_string()) else {
        log::warn!("No API URL was provided with --api-url or API_URL, entry functions will not send any requests");
        return Ok(());
    };

    let parsed = url::Url::parse(&api_url)
        .with_context(|| format!("Invalid API URL: {}", api_url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("API URL must use http or https, got: {}", api_url);
    }

    let client = HttpClientInstrumented::new(ctx.reporter())?;

    log::info!("Sending requests to {}", api_url);
    let values = ctx.get_mut();
    values.base_url = Some(api_url);
    values.client = Some(client);

    Ok(())
}

/// A client for the API under test, tagged with the scenario, VU and current group of `ctx`.
///
/// Returns `None` if [configure_http_client] didn't find an API URL. The tags are taken when this
/// is called, so call it inside a [VuContext::group] to have requests attributed to that group.
pub fn http_client<V: UserValuesConstraint>(
    ctx: &VuContext<HttpRunnerContext, V>,
) -> Option<VuHttpClient> {
    let values = ctx.runner_context().get();
    let base_url = values.base_url.as_deref()?;
    let client = values.client.clone()?;

    Some(VuHttpClient::new(client, base_url, ctx.tags()))
}

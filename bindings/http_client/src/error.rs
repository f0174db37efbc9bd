/// Why a response body could not be read as the type a scenario expected.
#[derive(Debug, thiserror::Error)]
pub enum HttpBodyError {
    #[error("Response with status {status} has no JSON body")]
    Missing { status: u16 },
    #[error("Response body does not have the expected shape: {0}")]
    Malformed(#[from] serde_json::Error),
}

mod client;
mod error;
mod params;
mod response;

pub mod prelude {
    pub use crate::client::{HttpClientInstrumented, VuHttpClient, DEFAULT_REQUEST_TIMEOUT};
    pub use crate::error::HttpBodyError;
    pub use crate::params::RequestParams;
    pub use crate::response::HttpResponse;

    // Re-exported so that scenarios don't need to depend on reqwest directly
    pub use reqwest::Method;
}

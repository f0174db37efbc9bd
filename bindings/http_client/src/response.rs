use crate::error::HttpBodyError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// A response, or the lack of one.
///
/// Requests never return an error. A request that got no response has a `status` of 0 and
/// `error` set, so that scenarios can check it like any other response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower case
    pub headers: HashMap<String, String>,
    /// The body parsed as JSON, if it was JSON
    pub body: Option<Value>,
    pub error: Option<String>,
}

impl HttpResponse {
    pub(crate) fn received(status: u16, headers: HashMap<String, String>, raw: &[u8]) -> Self {
        Self {
            status,
            headers,
            body: serde_json::from_slice(raw).ok(),
            error: None,
        }
    }

    pub(crate) fn not_received(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Deserialize the body into `T`.
    ///
    /// Fails if the body was absent or not JSON, or if it doesn't match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpBodyError> {
        let body = self
            .body
            .as_ref()
            .ok_or(HttpBodyError::Missing {
                status: self.status,
            })?;

        Ok(T::deserialize(body)?)
    }

    /// A top level field of a JSON object body.
    pub fn json_field(&self, field: &str) -> Option<&Value> {
        self.body.as_ref().and_then(|b| b.get(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Listed {
        item_id: String,
    }

    #[test]
    fn parse_typed_body() {
        let response = HttpResponse::received(201, HashMap::new(), br#"{"item_id":"abc"}"#);
        assert_eq!(
            Listed {
                item_id: "abc".to_string()
            },
            response.json::<Listed>().unwrap()
        );
        assert_eq!(Some(&Value::from("abc")), response.json_field("item_id"));
    }

    #[test]
    fn absent_body_is_an_error() {
        let response = HttpResponse::received(500, HashMap::new(), b"Internal Server Error");
        assert!(response.body.is_none());
        assert!(matches!(
            response.json::<Listed>(),
            Err(HttpBodyError::Missing { status: 500 })
        ));
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let response = HttpResponse::received(201, HashMap::new(), br#"{"id":"abc"}"#);
        assert!(matches!(
            response.json::<Listed>(),
            Err(HttpBodyError::Malformed(_))
        ));
        assert_eq!(None, response.json_field("item_id"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let response = HttpResponse::received(
            200,
            HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            b"{}",
        );
        assert_eq!(Some("application/json"), response.header("Content-Type"));
    }
}

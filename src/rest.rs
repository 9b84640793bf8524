//! The concrete REST transport: one shared `reqwest` client behind the
//! [`ResourceClient`] seam. `RestApi` validates the base URL once and mints a
//! [`RestResource`] per endpoint (`branches/`, `contacts/`, `cases/`, ...).

use crate::client::{CreatedEnvelope, DeleteReceipt, PageEnvelope, PageRequest, ResourceClient};
use crate::error::{ApiError, ApiResult, ConfigError};
use crate::model::{CollectionItem, ItemId, Page};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Base-URL plus request timeout; the crate's whole configuration surface for
/// the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
        let config = Self {
            base_url,
            timeout: crate::DEFAULT_REQUEST_TIMEOUT,
        };
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheme = self.base_url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::UnsupportedScheme(scheme.to_owned()));
        }
        if self.base_url.query().is_some() || self.base_url.fragment().is_some() {
            return Err(ConfigError::BaseUrlNotClean(self.base_url.to_string()));
        }
        Ok(())
    }
}

/// One HTTP client for the whole app; resources share its connection pool.
#[derive(Debug, Clone)]
pub struct RestApi {
    http: reqwest::Client,
    config: RestConfig,
}

impl RestApi {
    pub fn new(config: RestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            http: reqwest::Client::new(),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// A typed client for one collection endpoint. `path` is relative to the
    /// base URL; a missing trailing slash is added so joins behave.
    pub fn resource<T>(&self, path: &str) -> Result<RestResource<T>, ConfigError>
    where
        T: CollectionItem + DeserializeOwned,
    {
        let path = if path.ends_with('/') {
            path.to_owned()
        } else {
            format!("{path}/")
        };
        let endpoint = self
            .config
            .base_url
            .join(&path)
            .map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
        Ok(RestResource {
            http: self.http.clone(),
            endpoint,
            timeout: self.config.timeout,
            _marker: PhantomData,
        })
    }
}

/// `ResourceClient` over one REST collection endpoint. Drafts are raw JSON
/// bodies; the typed record comes back from the server's echo.
#[derive(Debug, Clone)]
pub struct RestResource<T> {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RestResource<T>
where
    T: CollectionItem + DeserializeOwned,
{
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn item_url(&self, id: &ItemId) -> ApiResult<Url> {
        self.endpoint
            .join(&format!("{id}/"))
            .map_err(|e| ApiError::invalid_state(format!("bad item url: {e}")))
    }

    fn first_page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &request.limit.to_string());
            pairs.append_pair("offset", "0");
            for (field, value) in request.filters.iter() {
                pairs.append_pair(field, value);
            }
        }
        url
    }

    /// Sends the request and decodes a 2xx body; a non-2xx body goes through
    /// the error-envelope parser.
    async fn execute<R: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> ApiResult<R> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ApiError::from_status_body(status.as_u16(), Some(&body)));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::deserialization(format!("unexpected response body: {e}")))
    }
}

#[async_trait]
impl<T> ResourceClient for RestResource<T>
where
    T: CollectionItem + DeserializeOwned,
{
    type Item = T;
    type Draft = Value;

    #[instrument(skip(self, request), fields(endpoint = %self.endpoint))]
    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Page<T>> {
        // A cursor is the full `next` URL off the previous envelope; follow it
        // verbatim instead of rebuilding the query.
        let url = match &request.cursor {
            Some(cursor) => Url::parse(cursor.as_str())
                .map_err(|e| ApiError::invalid_state(format!("bad page cursor: {e}")))?,
            None => self.first_page_url(&request),
        };
        debug!(%url, "fetching page");
        let envelope: PageEnvelope<T> = self.execute(self.http.get(url)).await?;
        Ok(envelope.into_page())
    }

    #[instrument(skip(self, draft), fields(endpoint = %self.endpoint))]
    async fn create(&self, draft: Value) -> ApiResult<T> {
        let url = self
            .endpoint
            .join("create/")
            .map_err(|e| ApiError::invalid_state(format!("bad create url: {e}")))?;
        let envelope: CreatedEnvelope<T> = self.execute(self.http.post(url).json(&draft)).await?;
        Ok(envelope.into_parts().0)
    }

    #[instrument(skip(self, draft), fields(endpoint = %self.endpoint, id = %id))]
    async fn update(&self, id: &ItemId, draft: Value) -> ApiResult<T> {
        let url = self.item_url(id)?;
        self.execute(self.http.put(url).json(&draft)).await
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint, id = %id))]
    async fn delete(&self, id: &ItemId) -> ApiResult<DeleteReceipt> {
        let url = self.item_url(id)?;
        self.execute(self.http.delete(url)).await
    }
}

fn transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::timeout(error.to_string())
    } else if error.is_decode() {
        ApiError::deserialization(error.to_string())
    } else {
        ApiError::network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FilterSet;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Row {
        id: u64,
    }

    impl CollectionItem for Row {
        fn item_id(&self) -> ItemId {
            ItemId::from(self.id)
        }
    }

    #[test]
    fn config_rejects_bad_base_urls() {
        assert!(matches!(
            RestConfig::new("not a url"),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            RestConfig::new("ftp://crm.example.com/api/"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            RestConfig::new("https://crm.example.com/api/?debug=1"),
            Err(ConfigError::BaseUrlNotClean(_))
        ));
        assert!(RestConfig::new("https://crm.example.com/api/").is_ok());
    }

    #[test]
    fn resource_endpoint_gets_trailing_slash() {
        let api = RestApi::new(RestConfig::new("https://crm.example.com/api/").unwrap()).unwrap();
        let contacts: RestResource<Row> = api.resource("contacts").unwrap();
        assert_eq!(
            contacts.endpoint().as_str(),
            "https://crm.example.com/api/contacts/"
        );
    }

    #[test]
    fn first_page_url_carries_limit_offset_and_filters() {
        let api = RestApi::new(RestConfig::new("https://crm.example.com/api/").unwrap()).unwrap();
        let contacts: RestResource<Row> = api.resource("contacts/").unwrap();

        let request = PageRequest::first_page(
            FilterSet::search("Suc").with("branch", "north"),
            20,
        );
        let url = contacts.first_page_url(&request);
        let query = url.query().unwrap();

        assert!(query.contains("limit=20"));
        assert!(query.contains("offset=0"));
        assert!(query.contains("q=Suc"));
        assert!(query.contains("branch=north"));
    }

    #[test]
    fn item_url_appends_id_segment() {
        let api = RestApi::new(RestConfig::new("https://crm.example.com/api/").unwrap()).unwrap();
        let cases: RestResource<Row> = api.resource("cases").unwrap();
        let url = cases.item_url(&ItemId::from(12)).unwrap();
        assert_eq!(url.as_str(), "https://crm.example.com/api/cases/12/");
    }
}

use super::{DefinitionLookup, SrsError};
use async_trait::async_trait;

/// Default template for [`HttpLookup`]; `{code}` is replaced by the EPSG code.
pub const DEFAULT_LOOKUP_TEMPLATE: &str = "https://epsg.io/{code}.proj4";

/// Definitions from the embedded crs-definitions database.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinLookup;

impl BuiltinLookup {
    pub fn proj4(code: u32) -> Option<&'static str> {
        u16::try_from(code)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4)
    }
}

#[async_trait]
impl DefinitionLookup for BuiltinLookup {
    async fn lookup(&self, code: u32) -> Result<String, SrsError> {
        Self::proj4(code)
            .map(str::to_string)
            .ok_or(SrsError::UnknownCode(code))
    }
}

/// Definitions fetched over HTTP from a proj4 text endpoint.
#[derive(Clone, Debug)]
pub struct HttpLookup {
    client: reqwest::Client,
    template: String,
}

impl Default for HttpLookup {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TEMPLATE)
    }
}

impl HttpLookup {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            template: template.into(),
        }
    }

    pub fn url_for(&self, code: u32) -> String {
        self.template.replace("{code}", &code.to_string())
    }
}

#[async_trait]
impl DefinitionLookup for HttpLookup {
    async fn lookup(&self, code: u32) -> Result<String, SrsError> {
        let url = self.url_for(code);
        tracing::debug!(code, url = %url, "looking up coordinate definition");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SrsError::Lookup {
                code,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SrsError::Lookup {
                code,
                message: format!("HTTP {}", response.status()),
            });
        }

        let text = response.text().await.map_err(|e| SrsError::Lookup {
            code,
            message: e.to_string(),
        })?;

        let definition = text.trim();
        if definition.is_empty() {
            return Err(SrsError::Lookup {
                code,
                message: "empty definition".to_string(),
            });
        }

        Ok(definition.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_lookup_known_codes() {
        let wgs84 = BuiltinLookup.lookup(4326).await.unwrap();
        assert!(wgs84.contains("+proj=longlat"), "EPSG:4326 should be geographic");

        let mercator = BuiltinLookup.lookup(3857).await.unwrap();
        assert!(mercator.contains("+proj=merc"));
    }

    #[tokio::test]
    async fn test_builtin_lookup_unknown_code() {
        let err = BuiltinLookup.lookup(99_999_999).await.unwrap_err();
        assert!(matches!(err, SrsError::UnknownCode(99_999_999)));
    }

    #[test]
    fn test_http_lookup_url_template() {
        let lookup = HttpLookup::default();
        assert_eq!(lookup.url_for(32633), "https://epsg.io/32633.proj4");

        let custom = HttpLookup::new("http://localhost/srs/{code}");
        assert_eq!(custom.url_for(4326), "http://localhost/srs/4326");
    }
}

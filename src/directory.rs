//! Persona directory
//!
//! Source of target-entity metadata. The aggregator only needs id, name and
//! classification, so that is all this module exposes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{LeadClassification, PersonaInfo};

/// Lookup of persona metadata by lead id
#[async_trait]
pub trait PersonaDirectory: Send + Sync {
    /// Metadata for one lead, `None` when the directory has no record
    async fn lookup(&self, lead_id: &str) -> Result<Option<PersonaInfo>>;

    /// Every persona the directory knows
    async fn list(&self) -> Result<Vec<PersonaInfo>>;
}

// ─────────────────────────────────────────────────────────────────
// HTTP Directory
// ─────────────────────────────────────────────────────────────────

/// Directory served by the persona endpoints of the service
pub struct HttpPersonaDirectory {
    base: Url,
    client: Client,
}

impl HttpPersonaDirectory {
    /// `base_url` is the service root, without the Q&A prefix
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::config_field_invalid("api.base_url", e.to_string()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal(format!("'{}' cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl PersonaDirectory for HttpPersonaDirectory {
    async fn lookup(&self, lead_id: &str) -> Result<Option<PersonaInfo>> {
        let url = self.endpoint(&["get_synthetic_persona", lead_id])?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url.as_str(), e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(lead_id, "Persona not in directory");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
                message: "persona lookup failed".to_string(),
            });
        }

        let persona = response
            .json::<PersonaInfo>()
            .await
            .map_err(|e| Error::from_reqwest(url.as_str(), e))?;
        Ok(Some(persona))
    }

    async fn list(&self) -> Result<Vec<PersonaInfo>> {
        let url = self.endpoint(&["get_synthetic_personas"])?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url.as_str(), e))?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
                message: "persona listing failed".to_string(),
            });
        }
        response
            .json::<Vec<PersonaInfo>>()
            .await
            .map_err(|e| Error::from_reqwest(url.as_str(), e))
    }
}

// ─────────────────────────────────────────────────────────────────
// Static Directory
// ─────────────────────────────────────────────────────────────────

/// In-memory directory, used offline and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    personas: Vec<PersonaInfo>,
    index: HashMap<String, usize>,
}

impl StaticDirectory {
    pub fn new(personas: Vec<PersonaInfo>) -> Self {
        let index = personas
            .iter()
            .enumerate()
            .map(|(i, p)| (p.lead_id.clone(), i))
            .collect();
        Self { personas, index }
    }

    /// `count` demo personas: `LEAD-1000` onward, cycling hot/warm/cold
    pub fn demo(count: u32) -> Self {
        let personas = (0..count)
            .map(|i| {
                let classification = match i % 3 {
                    0 => LeadClassification::Hot,
                    1 => LeadClassification::Warm,
                    _ => LeadClassification::Cold,
                };
                PersonaInfo::new(format!("LEAD-{}", 1000 + i), format!("Person {}", i + 1), classification)
            })
            .collect();
        Self::new(personas)
    }

    /// Synchronous lookup
    pub fn get(&self, lead_id: &str) -> Option<&PersonaInfo> {
        self.index.get(lead_id).map(|&i| &self.personas[i])
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

#[async_trait]
impl PersonaDirectory for StaticDirectory {
    async fn lookup(&self, lead_id: &str) -> Result<Option<PersonaInfo>> {
        Ok(self.get(lead_id).cloned())
    }

    async fn list(&self) -> Result<Vec<PersonaInfo>> {
        Ok(self.personas.clone())
    }
}

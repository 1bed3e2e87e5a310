//! Better BibTeX JSON-RPC client
//!
//! Better BibTeX runs inside Zotero and answers on the Zotero connector port.
//! Only two calls are used: resolving citation keys for item keys and
//! exporting an item as Better BibLaTeX.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::http::{HttpClient, HttpError};

const USER_AGENT: &str = "impress-bibliography";
const EXPORT_TRANSLATOR: &str = "Better BibLaTeX";

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

pub struct BetterBibtexClient {
    http: HttpClient,
    rpc_url: String,
    next_id: AtomicU64,
}

impl BetterBibtexClient {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(USER_AGENT, timeout)?,
            rpc_url: rpc_url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// `http://host:port/better-bibtex/cayw?probe=true`, derived from the RPC url
    fn probe_url(&self) -> String {
        let base = self
            .rpc_url
            .trim_end_matches('/')
            .trim_end_matches("/json-rpc")
            .trim_end_matches("/better-bibtex");
        format!("{}/better-bibtex/cayw?probe=true", base)
    }

    /// Whether Zotero is running with Better BibTeX loaded
    pub async fn is_available(&self) -> bool {
        match self.http.get(&self.probe_url()).await {
            Ok(response) => response.is_success() && response.body.trim() == "ready",
            Err(e) => {
                tracing::debug!("Better BibTeX probe failed: {}", e);
                false
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, HttpError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = self.http.post_json(&self.rpc_url, &request).await?;
        if !response.is_success() {
            return Err(HttpError::RequestFailed {
                message: format!("{} returned HTTP {}", method, response.status),
            });
        }

        let rpc: RpcResponse = response.json()?;
        if let Some(error) = rpc.error {
            return Err(HttpError::Rpc {
                message: error.message,
            });
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }

    /// Citation keys by Zotero item key
    pub async fn citation_keys(
        &self,
        item_keys: &[String],
    ) -> Result<HashMap<String, String>, HttpError> {
        if item_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self.call("item.citationkey", json!([item_keys])).await?;
        Ok(parse_citation_keys(&result))
    }

    /// Better BibLaTeX for one citation key; `None` when Better BibTeX has no
    /// such item
    pub async fn export(&self, citation_key: &str) -> Result<Option<String>, HttpError> {
        let result = self
            .call("item.export", json!([[citation_key], EXPORT_TRANSLATOR]))
            .await?;
        Ok(parse_export(&result))
    }
}

/// `{"1:ABCD1234": "smith2020", ...}`; library prefixes are stripped
fn parse_citation_keys(result: &Value) -> HashMap<String, String> {
    let Some(map) = result.as_object() else {
        return HashMap::new();
    };
    map.iter()
        .filter_map(|(item_key, citekey)| {
            let citekey = citekey.as_str()?.trim();
            if citekey.is_empty() {
                return None;
            }
            let item_key = item_key
                .rsplit_once(':')
                .map(|(_, key)| key)
                .unwrap_or(item_key);
            Some((item_key.to_string(), citekey.to_string()))
        })
        .collect()
}

/// Newer releases answer with the text; older ones with `[status, type, text]`
fn parse_export(result: &Value) -> Option<String> {
    let text = match result {
        Value::String(text) => text.as_str(),
        Value::Array(parts) => parts.get(2).and_then(Value::as_str)?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
